//! # Tabserve
//!
//! Query and caching engine for embedded `SQLite` table data.
//!
//! Tabserve sits in front of a directory of single-file SQL databases and
//! answers paginated, filtered, sorted, searched, and aggregated table
//! queries, hiding connection lifecycle, index maintenance, and result
//! caching from callers.
//!
//! ## Features
//!
//! - Read-only connection pool with modification-time invalidation
//! - Lazy per-column index creation and FTS5 shadow tables for search
//! - Declarative filter and aggregation compilation to parameterized SQL
//! - TTL + LRU result cache keyed by request shape and file freshness
//! - Thin axum HTTP surface mirroring the engine contract
//!
//! ## Example
//!
//! ```rust,ignore
//! use tabserve::{QueryEngine, QueryRequest};
//!
//! let engine = QueryEngine::new(config)?;
//! let result = engine.execute("genomes.db", &QueryRequest {
//!     table_name: "features".to_string(),
//!     limit: 100,
//!     ..Default::default()
//! })?;
//! println!("{} rows of {}", result.data.len(), result.total_count);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod engine;
pub mod models;
pub mod server;

// Re-exports for convenience
pub use config::EngineConfig;
pub use engine::QueryEngine;
pub use models::{
    AggregateFunction, AggregationSpec, ColumnStats, FilterClause, FilterOperator, QueryRequest,
    QueryResult, SortOrder, TableDescriptor,
};

/// Error type for tabserve operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `NotFound` | Database file or table does not exist |
/// | `InvalidFilter` | Filter or aggregation spec is malformed or names an unknown column |
/// | `EngineUnavailable` | FTS5 or REGEXP support is missing; always handled by a fallback |
/// | `Internal` | Unexpected engine error; logged with context, surfaced generically |
#[derive(Debug, ThisError)]
pub enum Error {
    /// A database file or table was not found.
    ///
    /// Raised when:
    /// - The requested database file does not exist in the data directory
    /// - The requested table is absent from the database schema
    #[error("{what} not found: {name}")]
    NotFound {
        /// What kind of thing was missing ("database", "table").
        what: &'static str,
        /// The identifier that was requested.
        name: String,
    },

    /// A filter or aggregation spec was malformed.
    ///
    /// Raised when:
    /// - A filter references a column absent from the table schema
    /// - `between` is missing its second value
    /// - `in`/`not_in` carry a non-list value
    /// - A sort column or aggregation target fails identifier validation
    #[error("invalid filter on '{field}': {reason}")]
    InvalidFilter {
        /// The offending field or column.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An optional engine feature is unavailable.
    ///
    /// Never surfaced to callers as a failure: full-text search falls back to
    /// a LIKE scan and index creation is skipped. Exists so fallback paths
    /// can report *why* they engaged.
    #[error("engine feature unavailable: {0}")]
    EngineUnavailable(String),

    /// An unexpected engine error.
    ///
    /// Raised when:
    /// - `SQLite` operations fail for reasons other than missing objects
    /// - Filesystem metadata cannot be read
    ///
    /// Logged with full context; surfaced to HTTP callers as a generic 500
    /// without leaking internal paths.
    #[error("operation '{operation}' failed: {cause}")]
    Internal {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Builds an [`Error::Internal`] from an underlying error with context.
    pub(crate) fn internal(operation: &str, e: &dyn std::fmt::Display) -> Self {
        Self::Internal {
            operation: operation.to_string(),
            cause: e.to_string(),
        }
    }
}

/// Result type alias for tabserve operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Centralized to avoid duplicate implementations across the codebase.
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound {
            what: "table",
            name: "features".to_string(),
        };
        assert_eq!(err.to_string(), "table not found: features");

        let err = Error::InvalidFilter {
            field: "age".to_string(),
            reason: "unknown column".to_string(),
        };
        assert_eq!(err.to_string(), "invalid filter on 'age': unknown column");

        let err = Error::Internal {
            operation: "open".to_string(),
            cause: "disk I/O error".to_string(),
        };
        assert!(err.to_string().contains("open"));
        assert!(err.to_string().contains("disk I/O error"));
    }

    #[test]
    fn test_current_timestamp_is_reasonable() {
        // 2020-01-01 as a floor
        assert!(current_timestamp() > 1_577_836_800);
    }
}
