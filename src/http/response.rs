//! Rendering pipeline rejections as HTTP responses.
//!
//! # Design Decisions
//! - Every rejection is the same three-field JSON envelope
//! - 429 responses carry `Retry-After` in whole seconds, rounded up
//! - The correlation id travels in `x-correlation-id`, never in the body

use axum::{
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use crate::pipeline::Rejection;

pub const X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let mut response = (self.error.status(), Json(self.envelope())).into_response();
        let headers = response.headers_mut();

        if let Some(wait) = self.retry_after() {
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
        set_correlation_id(headers, self.correlation_id);
        response
    }
}

pub fn set_correlation_id(headers: &mut HeaderMap, id: Uuid) {
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        headers.insert(X_CORRELATION_ID, value);
    }
}
