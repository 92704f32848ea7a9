//! The shaped query result.

use serde::{Deserialize, Serialize};

/// One page of query results.
///
/// `data` is row-major; each row's value order matches `headers`.
/// `total_count` is the pre-pagination match count, invariant under
/// `limit`/`offset` changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Ordered column names.
    pub headers: Vec<String>,
    /// Row data, column order matching `headers`.
    pub data: Vec<Vec<serde_json::Value>>,
    /// Total matching rows before pagination.
    pub total_count: u64,
    /// Whether this result was served from the result cache.
    pub cached: bool,
    /// Wall-clock execution time in milliseconds.
    pub execution_time_ms: f64,
}

impl QueryResult {
    /// Marks a cached copy of this result as a cache hit.
    #[must_use]
    pub fn as_cache_hit(mut self) -> Self {
        self.cached = true;
        self
    }
}
