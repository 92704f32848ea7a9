//! SQL construction helpers shared across the engine.
//!
//! Column and table names cannot be bound as parameters, so every
//! identifier that reaches SQL text goes through [`quote_ident`]. Values
//! always travel as bound parameters.

use crate::{Error, Result};
use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;
use std::collections::HashSet;

/// Quotes an identifier for safe interpolation into SQL text.
///
/// Doubles embedded quotes per the SQL standard, so a hostile table or
/// column name cannot break out of its quoted position.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escapes SQL LIKE wildcards in a string to make them literal.
///
/// LIKE treats `%` and `_` as wildcards; user-supplied search terms must
/// have them escaped (with `\`, requiring `ESCAPE '\'` on the clause) to
/// match literally.
#[must_use]
pub fn escape_like_wildcards(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' | '_' | '\\' => {
                result.push('\\');
                result.push(c);
            },
            _ => result.push(c),
        }
    }
    result
}

/// Converts a JSON value into a `SQLite` bind value.
///
/// Booleans become integers (`SQLite` has no boolean type); arrays and
/// objects fall back to their JSON text form.
#[must_use]
pub fn json_to_sql(value: &serde_json::Value) -> SqlValue {
    match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => n.as_i64().map_or_else(
            || SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
            SqlValue::Integer,
        ),
        serde_json::Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Converts a `SQLite` result value into JSON for the response body.
#[must_use]
pub fn sql_to_json(value: rusqlite::types::ValueRef<'_>) -> serde_json::Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) => serde_json::Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => {
            // Blobs are rare in viewer data; surface them as a length marker
            // rather than base64-bloating the payload.
            serde_json::Value::from(format!("<blob {} bytes>", b.len()))
        },
    }
}

/// Returns `(name, declared_type)` for each column of `table`.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the table has no columns (how `SQLite`
/// reports an unknown table through `PRAGMA table_info`).
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<(String, String)>> {
    let sql = format!("PRAGMA table_info({})", quote_ident(table));
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| Error::internal("table_info", &e))?;
    let columns: Vec<(String, String)> = stmt
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))
        .map_err(|e| Error::internal("table_info", &e))?
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::internal("table_info", &e))?;

    if columns.is_empty() {
        return Err(Error::NotFound {
            what: "table",
            name: table.to_string(),
        });
    }
    Ok(columns)
}

/// Lists user tables in the database, skipping `sqlite_*` internals and
/// full-text shadow objects.
///
/// A `<base>_fts` table only counts as a shadow when `<base>` itself
/// exists; a user table that merely ends in `_fts` stays visible.
///
/// # Errors
///
/// Returns [`Error::Internal`] if the schema query fails.
pub fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table'
               AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
             ORDER BY name",
        )
        .map_err(|e| Error::internal("list_tables", &e))?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| Error::internal("list_tables", &e))?
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::internal("list_tables", &e))?;

    let shadows: HashSet<&String> = names
        .iter()
        .filter(|n| {
            n.strip_suffix("_fts")
                .is_some_and(|base| names.iter().any(|m| m == base))
        })
        .collect();
    Ok(names
        .iter()
        .filter(|n| {
            if shadows.contains(n) {
                return false;
            }
            // FTS5 internals (`<fts>_data`, `<fts>_idx`, ...) hang off a
            // shadow's name.
            !shadows.iter().any(|s| {
                n.len() > s.len() + 1
                    && n.starts_with(s.as_str())
                    && n.as_bytes()[s.len()] == b'_'
            })
        })
        .cloned()
        .collect())
}
