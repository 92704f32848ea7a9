//! Thin HTTP route layer over the query engine.
//!
//! Routes translate between the wire contract and [`QueryEngine`] calls;
//! no query logic lives here. Engine calls are synchronous, so each one
//! runs on the blocking pool under a request deadline.

use crate::engine::QueryEngine;
use crate::models::{QueryRequest, QueryResult, SortOrder, TableDescriptor};
use crate::{Error, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// Shared state handed to every route handler.
#[derive(Clone)]
struct AppState {
    engine: Arc<QueryEngine>,
    timeout: Duration,
}

/// Response body for the table listing route.
#[derive(Debug, Serialize)]
struct TablesResponse {
    tables: Vec<TableDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    object_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    berdl_table_id: Option<String>,
}

/// `POST /table-data` body: a database name plus the full query request.
#[derive(Debug, Deserialize)]
struct TableDataBody {
    db: String,
    #[serde(flatten)]
    request: QueryRequest,
}

/// Error shape returned to HTTP callers.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

enum ApiError {
    Engine(Error),
    Timeout,
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self::Engine(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "request timed out".to_string(),
            ),
            Self::Engine(e) => match &e {
                Error::NotFound { .. } => (StatusCode::NOT_FOUND, e.to_string()),
                Error::InvalidFilter { .. } => (StatusCode::BAD_REQUEST, e.to_string()),
                // Internal details are logged, never leaked to callers.
                Error::Internal { operation, cause } => {
                    tracing::error!(operation, cause, "request failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal error".to_string(),
                    )
                },
                Error::EngineUnavailable(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                },
            },
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Runs an engine call on the blocking pool under the request deadline.
///
/// A timed-out blocking task cannot be aborted; it finishes in the
/// background while the caller gets a 504.
async fn run_engine<T>(
    state: &AppState,
    f: impl FnOnce(&QueryEngine) -> Result<T> + Send + 'static,
) -> std::result::Result<T, ApiError>
where
    T: Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    let task = tokio::task::spawn_blocking(move || f(&engine));
    match tokio::time::timeout(state.timeout, task).await {
        Err(_) => {
            metrics::counter!("tabserve_request_timeout_total").increment(1);
            Err(ApiError::Timeout)
        },
        Ok(Err(join)) => Err(ApiError::Engine(Error::internal("engine_task", &join))),
        Ok(Ok(result)) => result.map_err(ApiError::Engine),
    }
}

async fn list_tables(
    State(state): State<AppState>,
    Path(db): Path<String>,
) -> ApiResult<TablesResponse> {
    // The sidecar read is file I/O too, so it joins the engine call on the
    // blocking pool.
    let response = run_engine(&state, move |e| {
        let tables = e.list_tables(&db)?;
        let sidecar = e.sidecar_config(&db);
        Ok(TablesResponse {
            tables,
            object_type: sidecar.object_type,
            berdl_table_id: sidecar.berdl_table_id,
        })
    })
    .await?;
    Ok(Json(response))
}

/// Builds a [`QueryRequest`] from legacy GET query parameters, including
/// the `filter_<column>=<value>` convention.
fn request_from_params(table: String, params: &HashMap<String, String>) -> QueryRequest {
    let mut request = QueryRequest::for_table(table);
    if let Some(limit) = params.get("limit").and_then(|v| v.parse().ok()) {
        request.limit = limit;
    }
    if let Some(offset) = params.get("offset").and_then(|v| v.parse().ok()) {
        request.offset = offset;
    }
    if let Some(columns) = params.get("columns") {
        request.columns = Some(
            columns
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
        );
    }
    request.sort_column = params.get("sort_column").cloned();
    request.sort_order = params.get("sort_order").map(|v| {
        if v.eq_ignore_ascii_case("desc") {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    });
    request.search_value = params.get("search_value").cloned();
    for (key, value) in params {
        if let Some(column) = key.strip_prefix("filter_") {
            request
                .column_filters
                .insert(column.to_string(), value.clone());
        }
    }
    request
}

async fn table_data(
    State(state): State<AppState>,
    Path((db, table)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<QueryResult> {
    let request = request_from_params(table, &params);
    let result = run_engine(&state, move |e| e.execute(&db, &request)).await?;
    Ok(Json(result))
}

async fn table_stats(
    State(state): State<AppState>,
    Path((db, table)): Path<(String, String)>,
) -> ApiResult<Vec<crate::models::ColumnStats>> {
    let stats = run_engine(&state, move |e| e.table_stats(&db, &table)).await?;
    Ok(Json(stats))
}

async fn table_data_post(
    State(state): State<AppState>,
    Json(body): Json<TableDataBody>,
) -> ApiResult<QueryResult> {
    let result = run_engine(&state, move |e| e.execute(&body.db, &body.request)).await?;
    Ok(Json(result))
}

async fn aggregate_post(
    State(state): State<AppState>,
    Path((db, table)): Path<(String, String)>,
    Json(mut request): Json<QueryRequest>,
) -> ApiResult<QueryResult> {
    // The path segment is authoritative over any table_name in the body.
    request.table_name = table;
    let result = run_engine(&state, move |e| e.execute(&db, &request)).await?;
    Ok(Json(result))
}

/// Builds the application router.
#[must_use]
pub fn router(engine: Arc<QueryEngine>) -> Router {
    let timeout = engine.config().request_timeout;
    Router::new()
        .route("/object/{db}/tables", get(list_tables))
        .route("/object/{db}/tables/{table}/data", get(table_data))
        .route("/object/{db}/tables/{table}/stats", get(table_stats))
        .route("/table-data", post(table_data_post))
        .route("/api/aggregate/{db}/tables/{table}", post(aggregate_post))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { engine, timeout })
}

/// Binds and serves the HTTP surface until the process exits.
///
/// Spawns the connection manager's idle sweeper alongside the listener.
///
/// # Errors
///
/// Returns [`Error::Internal`] if the listener cannot bind or the server
/// fails.
pub async fn serve(engine: Arc<QueryEngine>, listen: &str) -> Result<()> {
    engine
        .connections()
        .spawn_sweeper(engine.config().sweep_interval);

    let app = router(Arc::clone(&engine));
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| Error::internal("bind", &e))?;
    tracing::info!(listen, "serving table queries");

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::internal("serve", &e))
}
