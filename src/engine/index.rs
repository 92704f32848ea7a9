//! Lazy index maintenance.
//!
//! Index and full-text creation are performance hints, never correctness
//! requirements. Query handles are read-only, so DDL runs on a separate
//! short-lived read-write connection; on a genuinely immutable file it
//! fails, gets logged at warn, and queries proceed unindexed.

use super::connection::{DatabaseHandle, acquire_lock};
use super::sql::{quote_ident, table_columns};
use crate::Result;
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

/// Returns the name of a table's full-text shadow table.
#[must_use]
pub fn fts_table_name(table: &str) -> String {
    format!("{table}_fts")
}

/// Returns true if a declared column type has text affinity.
///
/// `SQLite` affinity rules: any type containing CHAR, CLOB, or TEXT.
fn is_text_type(declared: &str) -> bool {
    let upper = declared.to_uppercase();
    upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT")
}

/// Lazily creates single-column indices, once per `(path, table)`.
pub struct IndexManager {
    visited: Mutex<HashSet<(PathBuf, String)>>,
}

impl IndexManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            visited: Mutex::new(HashSet::new()),
        }
    }

    /// Ensures a single-column index exists for every column of `table`.
    ///
    /// Idempotent per `(path, table)`: the schema walk runs at most once per
    /// process lifetime unless [`Self::reset`] is called. Index names follow
    /// the `idx_<table>_<column>` convention. All failures are logged and
    /// swallowed.
    pub fn ensure_indices(&self, handle: &DatabaseHandle, table: &str) {
        let key = (handle.path().to_path_buf(), table.to_string());
        if !acquire_lock(&self.visited).insert(key) {
            return;
        }

        if let Err(e) = self.create_indices(handle, table) {
            tracing::warn!(table, error = %e, "index creation skipped");
            metrics::counter!("tabserve_index_create_failed_total").increment(1);
        }
    }

    fn create_indices(&self, handle: &DatabaseHandle, table: &str) -> Result<()> {
        let columns = handle.with_conn(|conn| table_columns(conn, table))?;

        // DDL needs its own writable connection; the query handle is
        // opened read-only.
        let ddl = Connection::open(handle.path())
            .map_err(|e| crate::Error::internal("open_for_ddl", &e))?;

        for (column, _) in columns {
            let sql = format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&format!("idx_{table}_{column}")),
                quote_ident(table),
                quote_ident(&column),
            );
            if let Err(e) = ddl.execute(&sql, []) {
                tracing::warn!(table, column, error = %e, "could not create index");
            }
        }
        Ok(())
    }

    /// Forgets which tables have been visited, forcing the next
    /// `ensure_indices` call to walk the schema again.
    pub fn reset(&self) {
        acquire_lock(&self.visited).clear();
    }
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazily builds FTS5 shadow tables for free-text search.
pub struct FullTextManager {
    built: Mutex<HashSet<(PathBuf, String)>>,
}

impl FullTextManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            built: Mutex::new(HashSet::new()),
        }
    }

    /// Ensures a full-text shadow table exists over `table`'s text columns.
    ///
    /// Returns whether full-text search is now available. On `false` the
    /// caller must fall back to a substring LIKE scan; reasons include a
    /// table with no text columns, a read-only file, or an engine built
    /// without FTS5. Successful builds are remembered so population runs
    /// once; failures are not remembered and may be retried.
    pub fn ensure_full_text(&self, handle: &DatabaseHandle, table: &str) -> bool {
        let key = (handle.path().to_path_buf(), table.to_string());
        if acquire_lock(&self.built).contains(&key) {
            return true;
        }

        match self.build(handle, table) {
            Ok(true) => {
                acquire_lock(&self.built).insert(key);
                true
            },
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(table, error = %e, "full-text build failed, using LIKE fallback");
                metrics::counter!("tabserve_fts_build_failed_total").increment(1);
                false
            },
        }
    }

    fn build(&self, handle: &DatabaseHandle, table: &str) -> Result<bool> {
        let columns = handle.with_conn(|conn| table_columns(conn, table))?;
        let text_columns: Vec<String> = columns
            .into_iter()
            .filter(|(_, ty)| is_text_type(ty))
            .map(|(name, _)| name)
            .collect();
        if text_columns.is_empty() {
            tracing::debug!(table, "no text columns, full-text unavailable");
            return Ok(false);
        }

        let fts = fts_table_name(table);
        let ddl = Connection::open(handle.path())
            .map_err(|e| crate::Error::internal("open_for_ddl", &e))?;

        let already_built: bool = ddl
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                [&fts],
                |row| row.get(0),
            )
            .map_err(|e| crate::Error::internal("fts_probe", &e))?;
        if already_built {
            return Ok(true);
        }

        let quoted_cols: Vec<String> = text_columns.iter().map(|c| quote_ident(c)).collect();
        let create = format!(
            "CREATE VIRTUAL TABLE {} USING fts5({}, content={}, content_rowid='rowid')",
            quote_ident(&fts),
            quoted_cols.join(", "),
            quote_ident(table),
        );
        ddl.execute(&create, [])
            .map_err(|e| crate::Error::internal("fts_create", &e))?;

        // Content-linked FTS tables still need an initial population pass.
        let populate = format!(
            "INSERT INTO {} (rowid, {}) SELECT rowid, {} FROM {}",
            quote_ident(&fts),
            quoted_cols.join(", "),
            quoted_cols.join(", "),
            quote_ident(table),
        );
        ddl.execute(&populate, [])
            .map_err(|e| crate::Error::internal("fts_populate", &e))?;

        tracing::info!(table, fts, columns = text_columns.len(), "built full-text shadow table");
        Ok(true)
    }
}

impl Default for FullTextManager {
    fn default() -> Self {
        Self::new()
    }
}
