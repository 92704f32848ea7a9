//! Compiles declarative filters into parameterized WHERE clauses.
//!
//! All predicate sources are ANDed in a fixed order: the declarative
//! [`FilterClause`] list, then legacy free-text search, then the legacy
//! per-column filter map. Values always travel as bound parameters;
//! identifiers are validated against the table schema and quoted.

use super::sql::{escape_like_wildcards, json_to_sql, quote_ident};
use crate::models::{FilterClause, FilterOperator};
use crate::{Error, Result};
use rusqlite::types::Value as SqlValue;
use std::collections::BTreeMap;

/// A compiled predicate: clause text plus its bound parameters.
#[derive(Debug, Default)]
pub struct CompiledFilter {
    conditions: Vec<String>,
    /// Bound parameter values, in clause order.
    pub params: Vec<SqlValue>,
}

impl CompiledFilter {
    /// Returns ` WHERE ...` or an empty string when nothing was compiled.
    #[must_use]
    pub fn where_sql(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    /// Number of compiled conditions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// True when no predicate was produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// Compiles all predicate sources for one request.
///
/// `fts_table` carries the shadow-table name when full-text search is
/// available; `None` selects the LIKE fallback that scans every column.
/// `columns` is the table's schema, used to validate filter targets and to
/// expand the fallback search.
///
/// # Errors
///
/// Returns [`Error::InvalidFilter`] when a clause targets an unknown
/// column, `between` is missing a bound, `in`/`not_in` carry a
/// non-list value, or `regex` carries a non-string or unparsable
/// pattern.
pub fn compile(
    filters: &[FilterClause],
    search_value: Option<&str>,
    column_filters: &BTreeMap<String, String>,
    fts_table: Option<&str>,
    columns: &[String],
) -> Result<CompiledFilter> {
    let mut compiled = CompiledFilter::default();

    for clause in filters {
        compile_clause(clause, columns, &mut compiled)?;
    }

    if let Some(term) = search_value.filter(|t| !t.is_empty()) {
        compile_search(term, fts_table, columns, &mut compiled);
    }

    for (column, value) in column_filters {
        if !columns.iter().any(|c| c == column) {
            return Err(Error::InvalidFilter {
                field: column.clone(),
                reason: "unknown column".to_string(),
            });
        }
        compiled.conditions.push(format!(
            "CAST({} AS TEXT) LIKE ?{} ESCAPE '\\'",
            quote_ident(column),
            compiled.params.len() + 1,
        ));
        compiled
            .params
            .push(SqlValue::Text(format!("%{}%", escape_like_wildcards(value))));
    }

    Ok(compiled)
}

fn require_value(clause: &FilterClause) -> Result<&serde_json::Value> {
    clause.value.as_ref().ok_or_else(|| Error::InvalidFilter {
        field: clause.column.clone(),
        reason: format!("operator '{}' requires a value", clause.operator.as_str()),
    })
}

#[allow(clippy::too_many_lines)]
fn compile_clause(
    clause: &FilterClause,
    columns: &[String],
    out: &mut CompiledFilter,
) -> Result<()> {
    if !columns.iter().any(|c| c == &clause.column) {
        return Err(Error::InvalidFilter {
            field: clause.column.clone(),
            reason: "unknown column".to_string(),
        });
    }
    let col = quote_ident(&clause.column);
    let next = out.params.len() + 1;

    match clause.operator {
        FilterOperator::Eq
        | FilterOperator::Ne
        | FilterOperator::Gt
        | FilterOperator::Gte
        | FilterOperator::Lt
        | FilterOperator::Lte => {
            let op = match clause.operator {
                FilterOperator::Eq => "=",
                FilterOperator::Ne => "!=",
                FilterOperator::Gt => ">",
                FilterOperator::Gte => ">=",
                FilterOperator::Lt => "<",
                _ => "<=",
            };
            let value = require_value(clause)?;
            out.conditions.push(format!("{col} {op} ?{next}"));
            out.params.push(json_to_sql(value));
        },
        FilterOperator::Like | FilterOperator::Ilike => {
            let value = require_value(clause)?;
            let term = value.as_str().map_or_else(|| value.to_string(), String::from);
            let pattern = format!("%{}%", escape_like_wildcards(&term));
            if clause.operator == FilterOperator::Like {
                out.conditions
                    .push(format!("{col} LIKE ?{next} ESCAPE '\\'"));
            } else {
                out.conditions
                    .push(format!("LOWER({col}) LIKE LOWER(?{next}) ESCAPE '\\'"));
            }
            out.params.push(SqlValue::Text(pattern));
        },
        FilterOperator::In | FilterOperator::NotIn => {
            let value = require_value(clause)?;
            let Some(items) = value.as_array() else {
                return Err(Error::InvalidFilter {
                    field: clause.column.clone(),
                    reason: format!(
                        "operator '{}' requires a list value",
                        clause.operator.as_str()
                    ),
                });
            };
            // An empty list compiles to no predicate at all: permissive
            // match-everything semantics, kept for compatibility.
            if items.is_empty() {
                tracing::debug!(column = %clause.column, "empty IN list, clause skipped");
                return Ok(());
            }
            let placeholders: Vec<String> = (0..items.len())
                .map(|i| format!("?{}", next + i))
                .collect();
            let keyword = if clause.operator == FilterOperator::In {
                "IN"
            } else {
                "NOT IN"
            };
            out.conditions
                .push(format!("{col} {keyword} ({})", placeholders.join(",")));
            for item in items {
                out.params.push(json_to_sql(item));
            }
        },
        FilterOperator::Between => {
            let low = require_value(clause)?;
            let high = clause.value2.as_ref().ok_or_else(|| Error::InvalidFilter {
                field: clause.column.clone(),
                reason: "'between' requires both values".to_string(),
            })?;
            out.conditions
                .push(format!("{col} BETWEEN ?{next} AND ?{}", next + 1));
            out.params.push(json_to_sql(low));
            out.params.push(json_to_sql(high));
        },
        FilterOperator::IsNull => {
            out.conditions.push(format!("{col} IS NULL"));
        },
        FilterOperator::IsNotNull => {
            out.conditions.push(format!("{col} IS NOT NULL"));
        },
        FilterOperator::Regex => {
            let value = require_value(clause)?;
            let Some(pattern) = value.as_str() else {
                return Err(Error::InvalidFilter {
                    field: clause.column.clone(),
                    reason: "operator 'regex' requires a string pattern".to_string(),
                });
            };
            // Validate here so a malformed pattern is a caller error, not a
            // row-read failure inside the scalar function.
            regex::Regex::new(pattern).map_err(|e| Error::InvalidFilter {
                field: clause.column.clone(),
                reason: format!("invalid regex: {e}"),
            })?;
            out.conditions.push(format!("{col} REGEXP ?{next}"));
            out.params.push(SqlValue::Text(pattern.to_string()));
        },
    }
    Ok(())
}

/// Compiles the free-text search term.
///
/// Prefers the full-text shadow table with a quoted prefix query; without
/// one, expands to an OR of `CAST(col AS TEXT) LIKE ?` across every column
/// so a partial term like `sm` still matches `Smith`.
fn compile_search(
    term: &str,
    fts_table: Option<&str>,
    columns: &[String],
    out: &mut CompiledFilter,
) {
    if let Some(fts) = fts_table {
        let fts = quote_ident(fts);
        out.conditions.push(format!(
            "rowid IN (SELECT rowid FROM {fts} WHERE {fts} MATCH ?{})",
            out.params.len() + 1,
        ));
        // Quote the term so FTS query syntax in user input cannot error,
        // and add a prefix star so partial tokens still match.
        out.params.push(SqlValue::Text(format!(
            "\"{}\"*",
            term.replace('"', "\"\"")
        )));
        return;
    }

    let pattern = format!("%{}%", escape_like_wildcards(term));
    let ors: Vec<String> = columns
        .iter()
        .map(|c| {
            let placeholder = out.params.len() + 1;
            out.params.push(SqlValue::Text(pattern.clone()));
            format!(
                "CAST({} AS TEXT) LIKE ?{placeholder} ESCAPE '\\'",
                quote_ident(c)
            )
        })
        .collect();
    if !ors.is_empty() {
        out.conditions.push(format!("({})", ors.join(" OR ")));
    }
}
