//! The table-data query request.

use super::{AggregationSpec, FilterClause};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sort direction for the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    /// Returns the SQL keyword for this direction.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// A request for one page of table data.
///
/// Only `table_name` and `limit`/`offset` are required shape; everything else
/// is additive. The legacy `search_value` and `column_filters` fields predate
/// the declarative [`FilterClause`] list and remain supported; all supplied
/// predicate sources are combined with AND.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Target table.
    pub table_name: String,
    /// Maximum rows to return. Clamped server-side to a hard ceiling.
    #[serde(default = "default_limit")]
    pub limit: u64,
    /// Row offset for pagination.
    #[serde(default)]
    pub offset: u64,
    /// Explicit column projection; `None` selects all columns.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    /// Sort column.
    #[serde(default)]
    pub sort_column: Option<String>,
    /// Sort direction; defaults to ascending when a sort column is set.
    #[serde(default)]
    pub sort_order: Option<SortOrder>,
    /// Legacy free-text search, matched across all columns.
    #[serde(default)]
    pub search_value: Option<String>,
    /// Legacy per-column substring filters. A `BTreeMap` keeps the request's
    /// serialized form (and thus the cache key) stable across calls.
    #[serde(default)]
    pub column_filters: BTreeMap<String, String>,
    /// Declarative filter clauses, ANDed together.
    #[serde(default)]
    pub filters: Vec<FilterClause>,
    /// Group-by columns for the aggregation path.
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Aggregate expressions; non-empty routes the request to the
    /// aggregation path.
    #[serde(default)]
    pub aggregations: Vec<AggregationSpec>,
}

const fn default_limit() -> u64 {
    100
}

impl QueryRequest {
    /// Creates a request for the first page of a table with default limit.
    #[must_use]
    pub fn for_table(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            limit: default_limit(),
            ..Self::default()
        }
    }

    /// Returns a stable structural key for result caching.
    ///
    /// Covers every field that changes output. Struct field order and
    /// `BTreeMap` key order make the serialization deterministic.
    #[must_use]
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}
