//! Client-facing route table. Every handler translates one request into a
//! single gateway operation: an orchestrated data query, a pass-through
//! forward, a registry change, or a metrics-table edit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use vigil_common::config::TimeoutConfig;
use vigil_common::error::GatewayError;
use vigil_common::query::ClientQuery;
use vigil_common::types::{BackendEndpoint, ServiceClass};
use vigil_gateway::{
    AggregatedResponse, BackendPath, BackendRegistry, MetricsInfoTable, MetricsTableSnapshot,
    QueryOrchestrator, ResolveMode, SimpleForwarder,
};

use crate::bootstrap;
use crate::health::{self, HealthState};

type Params = Query<HashMap<String, String>>;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<BackendRegistry>,
    pub orchestrator: Arc<QueryOrchestrator>,
    pub forwarder: Arc<SimpleForwarder>,
    pub metrics_table: Arc<MetricsInfoTable>,
    pub health: Arc<HealthState>,
    pub timeouts: TimeoutConfig,
    /// `None` disables the registration probe.
    pub probe_timeout: Option<Duration>,
}

// ── Errors ──

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: GatewayError,
}

impl ApiError {
    fn with_status(status: StatusCode, error: GatewayError) -> Self {
        Self { status, error }
    }

    fn missing(name: &str) -> Self {
        GatewayError::Validation(format!("'{}' is required", name)).into()
    }
}

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        let status =
            StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self { status, error }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "kind": self.error.kind().as_str(),
            "message": self.error.client_message(),
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn required<'a>(params: &'a HashMap<String, String>, name: &str) -> ApiResult<&'a str> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::missing(name))
}

fn parse_param<T: std::str::FromStr>(params: &HashMap<String, String>, name: &str) -> ApiResult<T> {
    let raw = required(params, name)?;
    raw.trim().parse().map_err(|_| {
        GatewayError::Validation(format!("'{}' is not a valid number: '{}'", name, raw)).into()
    })
}

// ── Router ──

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // data query
        .route("/indexData/:from", get(index_data))
        // indexing
        .route("/indexCount/:ts", get(index_count))
        .route("/indexState/:ts", get(index_state))
        .route("/indexKPI", get(index_kpi))
        // storage
        .route("/storageData", get(storage_data))
        .route("/storageGetByKey/:key", get(storage_get_by_key))
        // online
        .route("/onlineStart", get(online_start))
        .route("/onlineStop/:id", get(online_stop))
        .route("/onlineStatus", get(online_status_all))
        .route("/onlineStatus/:id", get(online_status))
        // offline
        .route("/offlineStatus", get(offline_status))
        .route("/offlineStart", get(offline_start))
        .route("/offlineStop", get(offline_stop))
        .route("/offlineNewTask", get(offline_new_task))
        .route("/offlineTask/:id/:action", get(offline_task))
        // data consuming
        .route("/dataStatus/:id", get(data_status))
        .route("/dataStart", get(data_start))
        .route("/dataStop/:id", get(data_stop))
        .route("/dataRestart/:id", get(data_restart))
        .route("/dataAllstatus", get(data_all_status))
        // registration
        .route("/addIndexing", post(add_indexing))
        .route("/addStorage", post(add_storage))
        .route("/addOnline", post(add_online))
        .route("/addOffline", post(add_offline))
        .route("/addDataConsumer", post(add_data_consumer))
        // metrics-info table
        .route("/getMetricsTable", get(get_metrics_table))
        .route("/startMonitoring", post(start_monitoring))
        .route("/stopMonitoring", delete(stop_monitoring))
        // probes
        .route("/live", get(health::live))
        .route("/healthz", get(health::live))
        .route("/ready", get(health::ready))
        .route("/readyz", get(health::ready))
        .route("/status", get(health::status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Data query ──

async fn index_data(
    State(state): State<AppState>,
    Path(from): Path<String>,
    Query(params): Params,
) -> ApiResult<Json<AggregatedResponse>> {
    let query = ClientQuery::from_params(
        Some(from.as_str()),
        params.get("to").map(String::as_str),
        params.get("count").map(String::as_str),
    )?;
    let mode = ResolveMode::from_flag(params.get("stream").map(String::as_str));
    let response = state
        .orchestrator
        .handle(&query, mode, state.timeouts.budgets())
        .await?;
    Ok(Json(response))
}

// ── Pass-through ──

/// Path parameters arrive decoded; each becomes one encoded backend
/// segment.
async fn pass(state: &AppState, service: ServiceClass, path: BackendPath) -> ApiResult<String> {
    Ok(state
        .forwarder
        .forward(service, &path, state.timeouts.forward_timeout())
        .await?)
}

async fn index_count(State(s): State<AppState>, Path(ts): Path<String>) -> ApiResult<String> {
    pass(&s, ServiceClass::Indexing, BackendPath::new(["getIndexCount", ts.as_str()])).await
}

async fn index_state(State(s): State<AppState>, Path(ts): Path<String>) -> ApiResult<String> {
    pass(&s, ServiceClass::Indexing, BackendPath::new(["getIndexState", ts.as_str()])).await
}

async fn index_kpi(State(s): State<AppState>) -> ApiResult<String> {
    pass(&s, ServiceClass::Indexing, BackendPath::new(["getKPI"])).await
}

async fn storage_data(State(s): State<AppState>, Query(params): Params) -> ApiResult<String> {
    let start: u64 = parse_param(&params, "start")?;
    let count: u32 = parse_param(&params, "count")?;
    let path = BackendPath::new(["timestamp".to_string(), start.to_string(), count.to_string()]);
    pass(&s, ServiceClass::Storage, path).await
}

async fn storage_get_by_key(State(s): State<AppState>, Path(key): Path<String>) -> ApiResult<String> {
    pass(&s, ServiceClass::Storage, BackendPath::new(["key", key.as_str()])).await
}

async fn online_start(State(s): State<AppState>) -> ApiResult<String> {
    pass(&s, ServiceClass::Online, BackendPath::new(["start", ""])).await
}

async fn online_stop(State(s): State<AppState>, Path(id): Path<String>) -> ApiResult<String> {
    pass(&s, ServiceClass::Online, BackendPath::new(["stop", id.as_str()])).await
}

async fn online_status_all(State(s): State<AppState>) -> ApiResult<String> {
    pass(&s, ServiceClass::Online, BackendPath::new(["status", ""])).await
}

async fn online_status(State(s): State<AppState>, Path(id): Path<String>) -> ApiResult<String> {
    pass(&s, ServiceClass::Online, BackendPath::new(["status", id.as_str()])).await
}

async fn offline_status(State(s): State<AppState>) -> ApiResult<String> {
    pass(&s, ServiceClass::Offline, BackendPath::new(["status"])).await
}

async fn offline_start(State(s): State<AppState>) -> ApiResult<String> {
    pass(&s, ServiceClass::Offline, BackendPath::new(["start"])).await
}

async fn offline_stop(State(s): State<AppState>) -> ApiResult<String> {
    pass(&s, ServiceClass::Offline, BackendPath::new(["stop"])).await
}

const NEW_TASK_PARAMS: [&str; 5] = ["task", "metric", "from", "to", "calcStart"];

/// The query string is forwarded as received, keeping the client's encoding.
async fn offline_new_task(
    State(s): State<AppState>,
    Query(params): Params,
    RawQuery(raw): RawQuery,
) -> ApiResult<String> {
    for name in NEW_TASK_PARAMS {
        required(&params, name)?;
    }
    let path = BackendPath::new(["task", "new"]).with_query(raw.unwrap_or_default());
    pass(&s, ServiceClass::Offline, path).await
}

async fn offline_task(
    State(s): State<AppState>,
    Path((id, action)): Path<(String, String)>,
) -> ApiResult<String> {
    match action.as_str() {
        "discard" | "status" | "result" => {
            let path = BackendPath::new(["task", id.as_str(), action.as_str()]);
            pass(&s, ServiceClass::Offline, path).await
        }
        other => Err(ApiError::with_status(
            StatusCode::NOT_FOUND,
            GatewayError::Validation(format!("unknown task action '{}'", other)),
        )),
    }
}

async fn data_status(State(s): State<AppState>, Path(id): Path<String>) -> ApiResult<String> {
    pass(&s, ServiceClass::DataConsuming, BackendPath::new(["status", id.as_str()])).await
}

async fn data_start(State(s): State<AppState>, Query(params): Params) -> ApiResult<String> {
    let port: u16 = parse_param(&params, "port")?;
    let path = BackendPath::new(["start", ""]).with_query(format!("port={}", port));
    pass(&s, ServiceClass::DataConsuming, path).await
}

async fn data_stop(State(s): State<AppState>, Path(id): Path<String>) -> ApiResult<String> {
    pass(&s, ServiceClass::DataConsuming, BackendPath::new(["stop", id.as_str()])).await
}

async fn data_restart(State(s): State<AppState>, Path(id): Path<String>) -> ApiResult<String> {
    pass(&s, ServiceClass::DataConsuming, BackendPath::new(["restart", id.as_str()])).await
}

async fn data_all_status(State(s): State<AppState>) -> ApiResult<String> {
    pass(&s, ServiceClass::DataConsuming, BackendPath::new(["allstatus"])).await
}

// ── Registration ──

async fn add_backend(
    state: &AppState,
    service: ServiceClass,
    params: &HashMap<String, String>,
) -> ApiResult<Json<serde_json::Value>> {
    let host = required(params, "host")?.trim().to_string();
    let port: u16 = parse_param(params, "port")?;
    let endpoint = BackendEndpoint::new(service, host, port);
    let outcome = bootstrap::register_backend(&state.registry, endpoint.clone(), state.probe_timeout)
        .await
        .map_err(|e| {
            tracing::warn!(endpoint = %endpoint, error = %e, "registration probe failed");
            ApiError::with_status(StatusCode::BAD_GATEWAY, e)
        })?;
    tracing::info!(endpoint = %endpoint, outcome = outcome.as_str(), "backend registration");
    Ok(Json(json!({
        "pool": service.as_str(),
        "endpoint": endpoint.authority(),
        "outcome": outcome.as_str(),
    })))
}

async fn add_indexing(State(s): State<AppState>, Query(p): Params) -> ApiResult<Json<serde_json::Value>> {
    add_backend(&s, ServiceClass::Indexing, &p).await
}

async fn add_storage(State(s): State<AppState>, Query(p): Params) -> ApiResult<Json<serde_json::Value>> {
    add_backend(&s, ServiceClass::Storage, &p).await
}

async fn add_online(State(s): State<AppState>, Query(p): Params) -> ApiResult<Json<serde_json::Value>> {
    add_backend(&s, ServiceClass::Online, &p).await
}

async fn add_offline(State(s): State<AppState>, Query(p): Params) -> ApiResult<Json<serde_json::Value>> {
    add_backend(&s, ServiceClass::Offline, &p).await
}

async fn add_data_consumer(
    State(s): State<AppState>,
    Query(p): Params,
) -> ApiResult<Json<serde_json::Value>> {
    add_backend(&s, ServiceClass::DataConsuming, &p).await
}

// ── Metrics-info table ──

async fn get_metrics_table(State(s): State<AppState>) -> Json<MetricsTableSnapshot> {
    Json(s.metrics_table.snapshot())
}

fn monitoring_triple(params: &HashMap<String, String>) -> ApiResult<(String, u16, String)> {
    let host = required(params, "host")?.trim().to_string();
    let port: u16 = parse_param(params, "port")?;
    let metric_type = required(params, "type")?.trim().to_string();
    Ok((host, port, metric_type))
}

async fn start_monitoring(
    State(s): State<AppState>,
    Query(params): Params,
) -> ApiResult<Json<serde_json::Value>> {
    let (host, port, metric_type) = monitoring_triple(&params)?;
    if let Some(previous) = s.metrics_table.get(&host, port, &metric_type) {
        tracing::info!(host = %host, port, metric_type = %metric_type, previous, "re-monitoring, metric id replaced");
    }
    let id = s.metrics_table.add(&host, port, &metric_type)?;
    Ok(Json(json!({ "metricId": id })))
}

async fn stop_monitoring(
    State(s): State<AppState>,
    Query(params): Params,
) -> ApiResult<Json<serde_json::Value>> {
    let (host, port, metric_type) = monitoring_triple(&params)?;
    match s.metrics_table.remove(&host, port, &metric_type)? {
        Some(id) => Ok(Json(json!({ "metricId": id }))),
        None => Err(ApiError::with_status(
            StatusCode::NOT_FOUND,
            GatewayError::Validation(format!(
                "{}:{} is not monitored for '{}'",
                host, port, metric_type
            )),
        )),
    }
}
