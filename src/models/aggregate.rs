//! Aggregation types.

use serde::{Deserialize, Serialize};

/// Aggregate function applied to a column (or `*` for `count`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    /// Row count (`COUNT(col)` or `COUNT(*)`).
    Count,
    /// Sum of values.
    Sum,
    /// Arithmetic mean.
    Avg,
    /// Minimum value.
    Min,
    /// Maximum value.
    Max,
    /// Population standard deviation, approximated single-pass.
    Stddev,
    /// Population variance, approximated single-pass.
    Variance,
    /// Count of distinct values (`COUNT(DISTINCT col)`).
    DistinctCount,
}

impl AggregateFunction {
    /// Returns the function's wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Stddev => "stddev",
            Self::Variance => "variance",
            Self::DistinctCount => "distinct_count",
        }
    }
}

/// One aggregate expression in an aggregation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationSpec {
    /// Target column, or `*` (only meaningful for `count`).
    pub column: String,
    /// The aggregate function to apply.
    pub function: AggregateFunction,
    /// Output column name; defaults to `<function>_<column>`.
    #[serde(default)]
    pub alias: Option<String>,
}

impl AggregationSpec {
    /// Returns the output column name for this spec.
    ///
    /// When no alias is given, the name is derived deterministically as
    /// `<function>_<column>` (a `*` column renders as `star`), so repeated
    /// requests with the same spec always produce the same result shape.
    #[must_use]
    pub fn effective_alias(&self) -> String {
        self.alias.clone().unwrap_or_else(|| {
            let col = if self.column == "*" { "star" } else { &self.column };
            format!("{}_{}", self.function.as_str(), col)
        })
    }
}
