//! Liveness/readiness probes for the gateway process.
//!
//! Serves lightweight JSON responses on:
//! - `GET /live` (alias `/healthz`): 200 while the process is up
//! - `GET /ready` (alias `/readyz`): 200 while accepting queries, 503 once
//!   shutdown has begun
//! - `GET /status`: uptime and backend pool sizes

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use vigil_gateway::BackendRegistry;

use crate::routes::AppState;

/// Shared state for health check responses.
pub struct HealthState {
    start_time: Instant,
    /// Set to false during graceful shutdown so load balancers stop routing traffic.
    ready: AtomicBool,
    live: AtomicBool,
    registry: Arc<BackendRegistry>,
}

impl HealthState {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            start_time: Instant::now(),
            ready: AtomicBool::new(true),
            live: AtomicBool::new(true),
            registry,
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    #[allow(dead_code)]
    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

pub async fn live(State(state): State<AppState>) -> Response {
    let health = &state.health;
    if health.is_live() {
        Json(json!({ "live": true, "uptime_secs": health.uptime_secs() })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "live": false, "reason": "fatal error" })),
        )
            .into_response()
    }
}

pub async fn ready(State(state): State<AppState>) -> Response {
    let health = &state.health;
    if health.is_ready() {
        Json(json!({ "ready": true, "uptime_secs": health.uptime_secs() })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "reason": "shutting down" })),
        )
            .into_response()
    }
}

pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = &state.health;
    let pools: serde_json::Map<String, serde_json::Value> = health
        .registry
        .sizes()
        .into_iter()
        .map(|(service, size)| (service.as_str().to_string(), json!(size)))
        .collect();
    Json(json!({
        "status": "ok",
        "uptime_secs": health.uptime_secs(),
        "live": health.is_live(),
        "ready": health.is_ready(),
        "pools": pools,
        "monitored_metrics": state.metrics_table.len(),
    }))
}
