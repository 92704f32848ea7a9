//! Table metadata and per-column statistics.

use serde::{Deserialize, Serialize};

/// Read-only snapshot of one table's shape.
///
/// Recomputed on each listing request rather than cached; listing is cheap
/// relative to data queries and staleness here is more confusing than the
/// round-trip is expensive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name as it appears in the database.
    pub name: String,
    /// Number of rows.
    pub row_count: u64,
    /// Number of columns.
    pub column_count: usize,
    /// Display name from the sidecar config, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Description from the sidecar config, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Summary statistics for one column.
///
/// `stddev` uses the engine's single-pass population approximation; see the
/// aggregation compiler for the formula and its caveats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStats {
    /// Column name.
    pub column: String,
    /// Declared SQL type, as reported by the schema.
    pub data_type: String,
    /// Minimum value.
    pub min: serde_json::Value,
    /// Maximum value.
    pub max: serde_json::Value,
    /// Mean, for numeric columns.
    pub mean: Option<f64>,
    /// Median, for numeric columns.
    pub median: Option<f64>,
    /// Approximate population standard deviation, for numeric columns.
    pub stddev: Option<f64>,
    /// Count of distinct values.
    pub distinct_count: u64,
    /// Count of NULL values.
    pub null_count: u64,
    /// Up to five sample values.
    pub sample_values: Vec<serde_json::Value>,
}
