//! Route handlers behind the guard middleware.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::http::downstream::{DownstreamError, DownstreamRequest};
use crate::http::server::AppState;
use crate::observability::events::{EventOutcome, SecurityEvent};
use crate::pipeline::{GuardError, Rejection, RequestContext};

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Forward an admitted request to the named downstream through its breaker.
pub async fn dispatch(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    let correlation_id = ctx.annotations().correlation_id().unwrap_or_else(Uuid::new_v4);

    let Some(downstream) = state.inner.downstreams.get(&service) else {
        tracing::debug!(correlation_id = %correlation_id, service = %service, "Unknown downstream service");
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Unknown service", "service": service })),
        )
            .into_response();
    };

    let timeout = state.inner.config.timeouts.downstream();
    let request = DownstreamRequest::from_context(&service, &ctx);
    let result = state
        .inner
        .breakers
        .call(&service, || async move {
            match tokio::time::timeout(timeout, downstream.call(request)).await {
                Ok(result) => result,
                Err(_) => Err(DownstreamError::Timeout(timeout)),
            }
        })
        .await;

    match result {
        Ok(Ok(response)) => (response.status, Json(response.body)).into_response(),
        Ok(Err(e)) => {
            tracing::warn!(correlation_id = %correlation_id, service = %service, error = %e, "Downstream call failed");
            Rejection::new(correlation_id, GuardError::Internal(e.to_string())).into_response()
        }
        Err(open) => {
            state.inner.events.record(SecurityEvent {
                correlation_id,
                timestamp: Utc::now(),
                origin: ctx.origin(),
                endpoint: ctx.endpoint().to_string(),
                pipeline: "dispatch".to_string(),
                guard: Some("circuit_breaker".to_string()),
                outcome: EventOutcome::Rejected,
                error_code: Some(open.code()),
                identity_subject: ctx.annotations().identity().map(|i| i.subject.clone()),
            });
            Rejection::new(correlation_id, open).into_response()
        }
    }
}
