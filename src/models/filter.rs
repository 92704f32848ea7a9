//! Declarative filter types.

use serde::{Deserialize, Serialize};

/// Comparison operator for a [`FilterClause`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    /// Equality (`col = ?`).
    Eq,
    /// Inequality (`col != ?`).
    Ne,
    /// Greater than (`col > ?`).
    Gt,
    /// Greater than or equal (`col >= ?`).
    Gte,
    /// Less than (`col < ?`).
    Lt,
    /// Less than or equal (`col <= ?`).
    Lte,
    /// Case-sensitive substring match (`col LIKE ?`).
    Like,
    /// Case-insensitive substring match (`LOWER(col) LIKE LOWER(?)`).
    Ilike,
    /// Membership in a value list (`col IN (?,...)`).
    In,
    /// Exclusion from a value list (`col NOT IN (?,...)`).
    NotIn,
    /// Inclusive range (`col BETWEEN ? AND ?`). Requires both values.
    Between,
    /// Null check (`col IS NULL`). Ignores value.
    IsNull,
    /// Non-null check (`col IS NOT NULL`). Ignores value.
    IsNotNull,
    /// Regular expression match (`col REGEXP ?`).
    Regex,
}

impl FilterOperator {
    /// Returns the operator's wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Like => "like",
            Self::Ilike => "ilike",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Between => "between",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
            Self::Regex => "regex",
        }
    }
}

/// A single predicate against one column.
///
/// Invariants enforced by the filter compiler:
/// - `in`/`not_in` require a list value; an *empty* list compiles to no
///   predicate at all (permissive, matches everything)
/// - `between` requires both `value` and `value2`
/// - `is_null`/`is_not_null` ignore both values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterClause {
    /// Target column name.
    pub column: String,
    /// Comparison operator.
    pub operator: FilterOperator,
    /// Primary comparison value (a list for `in`/`not_in`).
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    /// Secondary value, used only by `between`.
    #[serde(default)]
    pub value2: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_deserializes_from_snake_case() {
        let clause: FilterClause =
            serde_json::from_str(r#"{"column":"age","operator":"not_in","value":[1,2]}"#).unwrap();
        assert_eq!(clause.operator, FilterOperator::NotIn);
        assert!(clause.value2.is_none());
    }

    #[test]
    fn test_operator_as_str_round_trips() {
        for op in [
            FilterOperator::Eq,
            FilterOperator::Between,
            FilterOperator::IsNotNull,
            FilterOperator::Regex,
        ] {
            let json = format!("\"{}\"", op.as_str());
            let parsed: FilterOperator = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, op);
        }
    }
}
