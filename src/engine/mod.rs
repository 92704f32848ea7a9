//! The query engine.
//!
//! [`QueryEngine`] owns every process-wide cache (connections, index
//! visited sets, results) as instance state, constructed once and shared
//! by reference with request handlers. Execution itself is stateless
//! between calls.

pub mod aggregate;
pub mod cache;
pub mod connection;
pub mod filter;
pub mod index;
pub mod sql;

use crate::config::{EngineConfig, MAX_LIMIT};
use crate::models::{ColumnStats, QueryRequest, QueryResult, SortOrder, TableDescriptor};
use crate::{Error, Result};
use cache::ResultCache;
use connection::{ConnectionManager, DatabaseHandle};
use index::{FullTextManager, IndexManager, fts_table_name};
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde::Deserialize;
use sql::{quote_ident, sql_to_json, table_columns};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Sidecar display metadata for one database.
///
/// Read from `<db file>.config.json` next to the database file; owned by
/// the external config collaborator, consumed read-only here.
#[derive(Debug, Default, Deserialize)]
pub struct SidecarConfig {
    /// Object type label for the viewer.
    #[serde(default)]
    pub object_type: Option<String>,
    /// Source table identifier for the viewer.
    #[serde(default)]
    pub berdl_table_id: Option<String>,
    /// Per-table display metadata.
    #[serde(default)]
    pub tables: HashMap<String, SidecarTable>,
}

/// Display metadata for one table.
#[derive(Debug, Default, Deserialize)]
pub struct SidecarTable {
    /// Human-readable table name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Table description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Executes paginated, filtered, sorted, searched, and aggregated table
/// queries against embedded database files.
pub struct QueryEngine {
    config: EngineConfig,
    connections: Arc<ConnectionManager>,
    indices: IndexManager,
    full_text: FullTextManager,
    results: ResultCache,
}

impl QueryEngine {
    /// Creates an engine over the configured data directory.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let connections = Arc::new(ConnectionManager::new(
            config.connection_lifespan,
            config.statement_cache_capacity,
        ));
        let results = ResultCache::new(config.cache_max_entries, config.cache_ttl);
        Self {
            config,
            connections,
            indices: IndexManager::new(),
            full_text: FullTextManager::new(),
            results,
        }
    }

    /// The connection manager, for spawning the idle sweeper and shutdown.
    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Closes all database handles. For process shutdown.
    pub fn shutdown(&self) {
        self.connections.close_all();
        self.results.clear();
    }

    /// Resolves a logical database name to a file in the data directory.
    ///
    /// Names are plain file names; anything that could traverse out of the
    /// data directory is reported as not found rather than resolved.
    fn resolve_path(&self, db: &str) -> Result<PathBuf> {
        let suspicious =
            db.is_empty() || db.contains('/') || db.contains('\\') || db.contains("..");
        if suspicious {
            return Err(Error::NotFound {
                what: "database",
                name: db.to_string(),
            });
        }
        Ok(self.config.data_dir.join(db))
    }

    fn open(&self, db: &str) -> Result<Arc<DatabaseHandle>> {
        let path = self.resolve_path(db)?;
        self.connections.handle(&path).map_err(|e| match e {
            // Report the logical name, not the internal path.
            Error::NotFound { what, .. } => Error::NotFound {
                what,
                name: db.to_string(),
            },
            other => other,
        })
    }

    /// Loads the sidecar display config for a database, if present.
    #[must_use]
    pub fn sidecar_config(&self, db: &str) -> SidecarConfig {
        let Ok(path) = self.resolve_path(db) else {
            return SidecarConfig::default();
        };
        let sidecar = path.with_file_name(format!("{db}.config.json"));
        let Ok(contents) = std::fs::read_to_string(&sidecar) else {
            return SidecarConfig::default();
        };
        serde_json::from_str(&contents).unwrap_or_else(|e| {
            tracing::warn!(db, error = %e, "malformed sidecar config ignored");
            SidecarConfig::default()
        })
    }

    /// Lists user tables with row/column counts and display metadata.
    ///
    /// Descriptors are recomputed on each call, not cached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a missing database.
    #[instrument(skip(self))]
    pub fn list_tables(&self, db: &str) -> Result<Vec<TableDescriptor>> {
        let handle = self.open(db)?;
        let sidecar = self.sidecar_config(db);

        handle.with_conn(|conn| {
            let names = sql::list_tables(conn)?;
            let mut tables = Vec::with_capacity(names.len());
            for name in names {
                let row_count: i64 = conn
                    .query_row(&format!("SELECT COUNT(*) FROM {}", quote_ident(&name)), [], |r| {
                        r.get(0)
                    })
                    .map_err(|e| Error::internal("count_rows", &e))?;
                let column_count = table_columns(conn, &name)?.len();
                let meta = sidecar.tables.get(&name);
                tables.push(TableDescriptor {
                    name: name.clone(),
                    row_count: row_count.try_into().unwrap_or(0),
                    column_count,
                    display_name: meta.and_then(|m| m.display_name.clone()),
                    description: meta.and_then(|m| m.description.clone()),
                });
            }
            Ok(tables)
        })
    }

    /// Executes a table-data request.
    ///
    /// Consults the result cache first; on a miss runs the row or
    /// aggregation path and stores the shaped result back. Cache failures
    /// never block execution.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a missing database or table and
    /// [`Error::InvalidFilter`] for specs referencing unknown columns.
    #[instrument(skip(self, request), fields(table = %request.table_name))]
    pub fn execute(&self, db: &str, request: &QueryRequest) -> Result<QueryResult> {
        let started = Instant::now();
        let handle = self.open(db)?;
        let table = &request.table_name;

        // Index and full-text DDL are best-effort file writes; they must
        // happen before the freshness fingerprint is read or a first-touch
        // request would invalidate its own cache entry.
        let fts = if request.aggregations.is_empty() {
            self.indices.ensure_indices(&handle, table);
            request
                .search_value
                .as_deref()
                .filter(|t| !t.is_empty())
                .and_then(|_| {
                    self.full_text
                        .ensure_full_text(&handle, table)
                        .then(|| fts_table_name(table))
                })
        } else {
            None
        };

        let invalidation_key = connection::file_fingerprint(handle.path())?;
        let request_key = format!("{db}\u{1f}{}", request.cache_key());

        if let Some(mut hit) = self.results.get(&request_key, invalidation_key) {
            hit.execution_time_ms = elapsed_ms(started);
            return Ok(hit);
        }
        metrics::counter!("tabserve_result_cache_miss_total").increment(1);

        let columns = handle.with_conn(|conn| table_columns(conn, table))?;
        let column_names: Vec<String> = columns.iter().map(|(n, _)| n.clone()).collect();

        let mut result = if request.aggregations.is_empty() {
            self.execute_rows(&handle, request, fts.as_deref(), &column_names)?
        } else {
            self.execute_aggregation(&handle, request, &column_names)?
        };
        result.execution_time_ms = elapsed_ms(started);

        self.results
            .put(request_key, invalidation_key, result.clone());
        Ok(result)
    }

    /// The plain row path: filters, sort, pagination, parallel count.
    fn execute_rows(
        &self,
        handle: &DatabaseHandle,
        request: &QueryRequest,
        fts: Option<&str>,
        column_names: &[String],
    ) -> Result<QueryResult> {
        let table = &request.table_name;

        let compiled = filter::compile(
            &request.filters,
            request.search_value.as_deref(),
            &request.column_filters,
            fts,
            column_names,
        )?;

        let projection = match &request.columns {
            None => "*".to_string(),
            Some(cols) => {
                for col in cols {
                    if !column_names.contains(col) {
                        return Err(Error::InvalidFilter {
                            field: col.clone(),
                            reason: "unknown projection column".to_string(),
                        });
                    }
                }
                cols.iter()
                    .map(|c| quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", ")
            },
        };

        let order_by = order_by_sql(request, column_names)?;
        let where_sql = compiled.where_sql();
        let next = compiled.params.len() + 1;
        let data_sql = format!(
            "SELECT {projection} FROM {}{where_sql}{order_by} LIMIT ?{next} OFFSET ?{}",
            quote_ident(table),
            next + 1,
        );
        let count_sql = format!("SELECT COUNT(*) FROM {}{where_sql}", quote_ident(table));

        let mut data_params = compiled.params.clone();
        data_params.push(SqlValue::Integer(clamp_limit(request.limit)));
        data_params.push(SqlValue::Integer(
            i64::try_from(request.offset).unwrap_or(i64::MAX),
        ));

        handle.with_conn(|conn| {
            let (headers, data) = run_data_query(conn, &data_sql, &data_params)?;
            let total_count = run_count_query(conn, &count_sql, &compiled.params)?;
            Ok(QueryResult {
                headers,
                data,
                total_count,
                cached: false,
                execution_time_ms: 0.0,
            })
        })
    }

    /// The aggregation path: group-by + aggregate select list, with the
    /// total computed over the grouped result wrapped in a subquery.
    fn execute_aggregation(
        &self,
        handle: &DatabaseHandle,
        request: &QueryRequest,
        column_names: &[String],
    ) -> Result<QueryResult> {
        let table = &request.table_name;
        let select = aggregate::compile(&request.group_by, &request.aggregations, column_names)?;
        let compiled = filter::compile(
            &request.filters,
            request.search_value.as_deref(),
            &request.column_filters,
            None,
            column_names,
        )?;

        let group_sql = if request.group_by.is_empty() {
            String::new()
        } else {
            let cols: Vec<String> = request.group_by.iter().map(|c| quote_ident(c)).collect();
            format!(" GROUP BY {}", cols.join(", "))
        };

        // Sorting an aggregate result refers to output columns (group-by
        // names or aliases), not the base schema.
        let order_sql = match &request.sort_column {
            None => String::new(),
            Some(col) => {
                if !select.headers.contains(col) {
                    return Err(Error::InvalidFilter {
                        field: col.clone(),
                        reason: "unknown sort column in aggregate result".to_string(),
                    });
                }
                let dir = request.sort_order.unwrap_or(SortOrder::Asc);
                format!(" ORDER BY {} {}", quote_ident(col), dir.as_sql())
            },
        };

        let where_sql = compiled.where_sql();
        let inner = format!(
            "SELECT {} FROM {}{where_sql}{group_sql}",
            select.select_list,
            quote_ident(table),
        );
        let next = compiled.params.len() + 1;
        let data_sql = format!("{inner}{order_sql} LIMIT ?{next} OFFSET ?{}", next + 1);
        let count_sql = format!("SELECT COUNT(*) FROM ({inner})");

        let mut data_params = compiled.params.clone();
        data_params.push(SqlValue::Integer(clamp_limit(request.limit)));
        data_params.push(SqlValue::Integer(
            i64::try_from(request.offset).unwrap_or(i64::MAX),
        ));

        handle.with_conn(|conn| {
            let (_, data) = run_data_query(conn, &data_sql, &data_params)?;
            let total_count = run_count_query(conn, &count_sql, &compiled.params)?;
            Ok(QueryResult {
                headers: select.headers.clone(),
                data,
                total_count,
                cached: false,
                execution_time_ms: 0.0,
            })
        })
    }

    /// Computes per-column summary statistics for one table.
    ///
    /// Built on the aggregation compiler; numeric moments are limited to
    /// columns with numeric declared affinity. `stddev` is the square root
    /// of the engine's single-pass variance approximation, clamped at zero
    /// because floating-point error can push the estimate slightly
    /// negative.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a missing database or table.
    #[instrument(skip(self))]
    pub fn table_stats(&self, db: &str, table: &str) -> Result<Vec<ColumnStats>> {
        use crate::models::{AggregateFunction, AggregationSpec};

        let handle = self.open(db)?;
        let columns = handle.with_conn(|conn| table_columns(conn, table))?;
        let column_names: Vec<String> = columns.iter().map(|(n, _)| n.clone()).collect();

        let mut stats = Vec::with_capacity(columns.len());
        for (name, declared) in &columns {
            let numeric = is_numeric_type(declared);
            let mut specs = vec![
                AggregationSpec {
                    column: name.clone(),
                    function: AggregateFunction::Min,
                    alias: Some("min".to_string()),
                },
                AggregationSpec {
                    column: name.clone(),
                    function: AggregateFunction::Max,
                    alias: Some("max".to_string()),
                },
                AggregationSpec {
                    column: name.clone(),
                    function: AggregateFunction::DistinctCount,
                    alias: Some("distinct".to_string()),
                },
                AggregationSpec {
                    column: name.clone(),
                    function: AggregateFunction::Count,
                    alias: Some("non_null".to_string()),
                },
                AggregationSpec {
                    column: "*".to_string(),
                    function: AggregateFunction::Count,
                    alias: Some("total".to_string()),
                },
            ];
            if numeric {
                specs.push(AggregationSpec {
                    column: name.clone(),
                    function: AggregateFunction::Avg,
                    alias: Some("mean".to_string()),
                });
                specs.push(AggregationSpec {
                    column: name.clone(),
                    function: AggregateFunction::Variance,
                    alias: Some("variance".to_string()),
                });
            }
            let select = aggregate::compile(&[], &specs, &column_names)?;
            let sql = format!("SELECT {} FROM {}", select.select_list, quote_ident(table));

            let stat = handle.with_conn(|conn| {
                let (headers, rows) = run_data_query(conn, &sql, &[])?;
                let row = rows.first().cloned().unwrap_or_default();
                let field = |alias: &str| -> serde_json::Value {
                    headers
                        .iter()
                        .position(|h| h == alias)
                        .and_then(|i| row.get(i).cloned())
                        .unwrap_or(serde_json::Value::Null)
                };

                let non_null = field("non_null").as_u64().unwrap_or(0);
                let total = field("total").as_u64().unwrap_or(0);
                let variance = field("variance").as_f64();
                let median = if numeric && non_null > 0 {
                    column_median(conn, table, name, non_null)?
                } else {
                    None
                };

                Ok(ColumnStats {
                    column: name.clone(),
                    data_type: declared.clone(),
                    min: field("min"),
                    max: field("max"),
                    mean: field("mean").as_f64(),
                    median,
                    stddev: variance.map(|v| v.max(0.0).sqrt()),
                    distinct_count: field("distinct").as_u64().unwrap_or(0),
                    null_count: total.saturating_sub(non_null),
                    sample_values: column_samples(conn, table, name)?,
                })
            })?;
            stats.push(stat);
        }
        Ok(stats)
    }
}

fn order_by_sql(request: &QueryRequest, column_names: &[String]) -> Result<String> {
    let Some(col) = &request.sort_column else {
        return Ok(String::new());
    };
    if !column_names.contains(col) {
        return Err(Error::InvalidFilter {
            field: col.clone(),
            reason: "unknown sort column".to_string(),
        });
    }
    let dir = request.sort_order.unwrap_or(SortOrder::Asc);
    Ok(format!(" ORDER BY {} {}", quote_ident(col), dir.as_sql()))
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn clamp_limit(limit: u64) -> i64 {
    i64::try_from(limit.min(MAX_LIMIT)).unwrap_or_default()
}

fn is_numeric_type(declared: &str) -> bool {
    let upper = declared.to_uppercase();
    ["INT", "REAL", "FLOA", "DOUB", "NUM", "DEC"]
        .iter()
        .any(|t| upper.contains(t))
}

/// Runs a data query, shaping headers from statement metadata so empty
/// result sets still carry a header list.
fn run_data_query(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[SqlValue],
) -> Result<(Vec<String>, Vec<Vec<serde_json::Value>>)> {
    let mut stmt = conn
        .prepare_cached(sql)
        .map_err(|e| Error::internal("prepare_query", &e))?;
    let headers: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt
        .query(params_from_iter(params.iter()))
        .map_err(|e| Error::internal("run_query", &e))?;
    let mut data = Vec::new();
    while let Some(row) = rows.next().map_err(|e| Error::internal("read_row", &e))? {
        let mut values = Vec::with_capacity(headers.len());
        for i in 0..headers.len() {
            let value = row
                .get_ref(i)
                .map_err(|e| Error::internal("read_value", &e))?;
            values.push(sql_to_json(value));
        }
        data.push(values);
    }
    Ok((headers, data))
}

fn run_count_query(conn: &rusqlite::Connection, sql: &str, params: &[SqlValue]) -> Result<u64> {
    let mut stmt = conn
        .prepare_cached(sql)
        .map_err(|e| Error::internal("prepare_count", &e))?;
    let count: i64 = stmt
        .query_row(params_from_iter(params.iter()), |row| row.get(0))
        .map_err(|e| Error::internal("run_count", &e))?;
    Ok(count.try_into().unwrap_or(0))
}

fn column_median(
    conn: &rusqlite::Connection,
    table: &str,
    column: &str,
    non_null: u64,
) -> Result<Option<f64>> {
    let col = quote_ident(column);
    let sql = format!(
        "SELECT {col} FROM {} WHERE {col} IS NOT NULL ORDER BY {col} LIMIT 1 OFFSET ?1",
        quote_ident(table),
    );
    let offset = i64::try_from((non_null.saturating_sub(1)) / 2).unwrap_or(0);
    conn.query_row(&sql, [offset], |row| row.get::<_, f64>(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows | rusqlite::Error::InvalidColumnType(..) => {
                Ok(None)
            },
            other => Err(Error::internal("column_median", &other)),
        })
}

fn column_samples(
    conn: &rusqlite::Connection,
    table: &str,
    column: &str,
) -> Result<Vec<serde_json::Value>> {
    let col = quote_ident(column);
    let sql = format!(
        "SELECT DISTINCT {col} FROM {} WHERE {col} IS NOT NULL LIMIT 5",
        quote_ident(table),
    );
    let (_, rows) = run_data_query(conn, &sql, &[])?;
    let samples = rows
        .into_iter()
        .filter_map(|mut row| {
            if row.is_empty() {
                None
            } else {
                Some(row.remove(0))
            }
        })
        .collect();
    Ok(samples)
}
