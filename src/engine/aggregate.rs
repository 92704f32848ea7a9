//! Compiles group-by + aggregate specs into a select list.
//!
//! `stddev` and `variance` are approximated with the single-pass population
//! formula `AVG(col*col) - AVG(col)*AVG(col)` because `SQLite` ships no
//! native statistical aggregates. The formula can lose precision or go
//! slightly negative under floating-point error on low-variance data; this
//! is a documented approximation, kept deliberately.

use super::sql::quote_ident;
use crate::models::{AggregateFunction, AggregationSpec};
use crate::{Error, Result};

/// A compiled aggregate query head: the select list and its result headers.
#[derive(Debug)]
pub struct AggregateSelect {
    /// Comma-joined select expressions; group-by columns first.
    pub select_list: String,
    /// Result headers: group-by columns, then each spec's alias, in select
    /// list order.
    pub headers: Vec<String>,
}

/// Compiles group-by columns and aggregation specs.
///
/// # Errors
///
/// Returns [`Error::InvalidFilter`] when a group-by or aggregation column
/// is not in the table schema, or when `*` is used with anything but
/// `count`.
pub fn compile(
    group_by: &[String],
    aggregations: &[AggregationSpec],
    columns: &[String],
) -> Result<AggregateSelect> {
    let mut select = Vec::with_capacity(group_by.len() + aggregations.len());
    let mut headers = Vec::with_capacity(group_by.len() + aggregations.len());

    for column in group_by {
        if !columns.iter().any(|c| c == column) {
            return Err(Error::InvalidFilter {
                field: column.clone(),
                reason: "unknown group-by column".to_string(),
            });
        }
        select.push(quote_ident(column));
        headers.push(column.clone());
    }

    for spec in aggregations {
        select.push(format!(
            "{} AS {}",
            expression(spec, columns)?,
            quote_ident(&spec.effective_alias())
        ));
        headers.push(spec.effective_alias());
    }

    Ok(AggregateSelect {
        select_list: select.join(", "),
        headers,
    })
}

fn expression(spec: &AggregationSpec, columns: &[String]) -> Result<String> {
    if spec.column == "*" {
        if spec.function == AggregateFunction::Count {
            return Ok("COUNT(*)".to_string());
        }
        return Err(Error::InvalidFilter {
            field: spec.column.clone(),
            reason: format!("'*' is only valid for count, not {}", spec.function.as_str()),
        });
    }
    if !columns.iter().any(|c| c == &spec.column) {
        return Err(Error::InvalidFilter {
            field: spec.column.clone(),
            reason: "unknown aggregation column".to_string(),
        });
    }

    let col = quote_ident(&spec.column);
    Ok(match spec.function {
        AggregateFunction::Count => format!("COUNT({col})"),
        AggregateFunction::Sum => format!("SUM({col})"),
        AggregateFunction::Avg => format!("AVG({col})"),
        AggregateFunction::Min => format!("MIN({col})"),
        AggregateFunction::Max => format!("MAX({col})"),
        AggregateFunction::DistinctCount => format!("COUNT(DISTINCT {col})"),
        // Single-pass population approximation; see module docs.
        AggregateFunction::Stddev | AggregateFunction::Variance => {
            format!("AVG({col} * {col}) - AVG({col}) * AVG({col})")
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols() -> Vec<String> {
        vec!["dept".to_string(), "age".to_string(), "salary".to_string()]
    }

    fn spec(column: &str, function: AggregateFunction) -> AggregationSpec {
        AggregationSpec {
            column: column.to_string(),
            function,
            alias: None,
        }
    }

    #[test]
    fn test_group_by_columns_come_first() {
        let compiled = compile(
            &["dept".to_string()],
            &[
                spec("salary", AggregateFunction::Avg),
                spec("*", AggregateFunction::Count),
            ],
            &cols(),
        )
        .unwrap();
        assert_eq!(
            compiled.select_list,
            "\"dept\", AVG(\"salary\") AS \"avg_salary\", COUNT(*) AS \"count_star\""
        );
        assert_eq!(compiled.headers, vec!["dept", "avg_salary", "count_star"]);
    }

    #[test]
    fn test_distinct_count() {
        let compiled = compile(&[], &[spec("age", AggregateFunction::DistinctCount)], &cols())
            .unwrap();
        assert_eq!(
            compiled.select_list,
            "COUNT(DISTINCT \"age\") AS \"distinct_count_age\""
        );
    }

    #[test]
    fn test_variance_uses_single_pass_formula() {
        let compiled = compile(&[], &[spec("age", AggregateFunction::Variance)], &cols()).unwrap();
        assert!(
            compiled
                .select_list
                .contains("AVG(\"age\" * \"age\") - AVG(\"age\") * AVG(\"age\")")
        );
    }

    #[test]
    fn test_wildcard_only_valid_for_count() {
        let err = compile(&[], &[spec("*", AggregateFunction::Sum)], &cols()).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter { .. }));
    }

    #[test]
    fn test_unknown_columns_rejected() {
        assert!(compile(&["bogus".to_string()], &[], &cols()).is_err());
        assert!(compile(&[], &[spec("bogus", AggregateFunction::Sum)], &cols()).is_err());
    }

    #[test]
    fn test_explicit_alias_in_headers() {
        let compiled = compile(
            &[],
            &[AggregationSpec {
                column: "salary".to_string(),
                function: AggregateFunction::Max,
                alias: Some("top".to_string()),
            }],
            &cols(),
        )
        .unwrap();
        assert_eq!(compiled.headers, vec!["top"]);
        assert!(compiled.select_list.ends_with("AS \"top\""));
    }
}
