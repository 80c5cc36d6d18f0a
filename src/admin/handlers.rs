use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::config::TierBudgets;
use crate::http::server::AppState;
use crate::resilience::BreakerSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub pipelines: Vec<String>,
    pub downstreams: Vec<String>,
    pub budgets: TierBudgets,
    pub events_dropped: u64,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let inner = &state.inner;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: inner.started_at.elapsed().as_secs(),
        pipelines: inner.composer.pipeline_names(),
        downstreams: inner.downstreams.names(),
        budgets: inner.limiter.budgets(),
        events_dropped: inner.events.dropped(),
    })
}

pub async fn get_breakers(State(state): State<AppState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.inner.breakers.snapshot())
}

pub async fn reset_breaker(State(state): State<AppState>, Path(service): Path<String>) -> Response {
    if state.inner.breakers.reset(&service) {
        let state = state.inner.breakers.state(&service);
        Json(json!({ "service": service, "state": state })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No breaker for service", "service": service })),
        )
            .into_response()
    }
}
