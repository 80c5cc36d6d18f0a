//! Request-path middleware.
//!
//! # Responsibilities
//! - Build a [`RequestContext`] from the HTTP request
//! - Run it through the route's pipeline
//! - Attach the security header policy to every response
//!
//! # Design Decisions
//! - The body is buffered once; guards and handlers see the same bytes
//! - A non-JSON body is rejected before any guard runs
//! - Headers are applied in an outer layer so rejections get them too

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::http::response::set_correlation_id;
use crate::http::server::AppState;
use crate::pipeline::{GuardError, PipelineOutcome, Rejection, RequestContext};
use crate::security::headers::SecurityHeaderPolicy;
use crate::security::service_auth::{SERVICE_NAME_HEADER, SERVICE_TOKEN_HEADER};

/// State for [`guard_middleware`]: the app plus the pipeline to run.
#[derive(Clone)]
pub struct GuardLayerState {
    pub app: AppState,
    pub pipeline: &'static str,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = header_str(headers, header::AUTHORIZATION.as_str())?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim())
    } else {
        None
    }
}

fn origin_of(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Build the pipeline input from request parts and the buffered body.
pub fn build_context(request: &Request, body: &Bytes) -> Result<RequestContext, GuardError> {
    let headers = request.headers();
    let mut ctx = RequestContext::new(origin_of(request), request.uri().path())
        .with_method(request.method().as_str())
        .with_client_signature(header_str(headers, header::USER_AGENT.as_str()).unwrap_or_default())
        .with_service_credentials(
            header_str(headers, SERVICE_NAME_HEADER).map(String::from),
            header_str(headers, SERVICE_TOKEN_HEADER).map(String::from),
        );

    if let Some(token) = bearer(headers) {
        ctx = ctx.with_credential(token);
    }

    if !body.is_empty() {
        let payload = serde_json::from_slice(body)
            .map_err(|_| GuardError::Validation("request body must be valid JSON".into()))?;
        ctx = ctx.with_payload(payload);
    }
    Ok(ctx)
}

/// Run the route's pipeline; admitted requests continue with the final
/// context in their extensions.
pub async fn guard_middleware(
    State(layer): State<GuardLayerState>,
    request: Request,
    next: Next,
) -> Response {
    let max_body = layer.app.inner.config.limits.max_body_size;
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, max_body).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "Request body rejected");
            let error = GuardError::Validation("request body too large or unreadable".into());
            return Rejection::new(Uuid::new_v4(), error).into_response();
        }
    };
    let mut request = Request::from_parts(parts, Body::from(bytes.clone()));

    let ctx = match build_context(&request, &bytes) {
        Ok(ctx) => ctx,
        Err(error) => return Rejection::new(Uuid::new_v4(), error).into_response(),
    };

    match layer.app.inner.composer.run(layer.pipeline, ctx).await {
        PipelineOutcome::Passed(ctx) => {
            let correlation_id = ctx.annotations().correlation_id();
            request.extensions_mut().insert(ctx);
            let mut response = next.run(request).await;
            if let Some(id) = correlation_id {
                set_correlation_id(response.headers_mut(), id);
            }
            response
        }
        PipelineOutcome::Rejected(rejection) => rejection.into_response(),
    }
}

/// Apply the current header policy to every response.
pub async fn security_headers_middleware(
    State(policy): State<Arc<ArcSwap<SecurityHeaderPolicy>>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    policy.load().apply(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    fn request(headers: &[(&str, &str)]) -> Request {
        let mut builder = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/secure/echo?x=1");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 7], 40000))));
        request
    }

    #[test]
    fn test_context_from_headers() {
        let request = request(&[
            ("authorization", "Bearer abc123"),
            ("user-agent", "cli/2.0"),
            ("x-service-name", "ledger"),
            ("x-service-token", "s3cret"),
        ]);
        let body = Bytes::from_static(br#"{"address":"0x00"}"#);
        let ctx = build_context(&request, &body).unwrap();

        assert_eq!(ctx.origin(), IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)));
        assert_eq!(ctx.endpoint(), "/api/secure/echo");
        assert_eq!(ctx.method(), "POST");
        assert_eq!(ctx.credential(), Some("abc123"));
        assert_eq!(ctx.client_signature(), "cli/2.0");
        assert_eq!(ctx.service_name(), Some("ledger"));
        assert_eq!(ctx.service_token(), Some("s3cret"));
        assert_eq!(ctx.payload().unwrap()["address"], "0x00");
    }

    #[test]
    fn test_non_bearer_scheme_ignored() {
        let ctx = build_context(&request(&[("authorization", "Basic dXNlcg==")]), &Bytes::new()).unwrap();
        assert!(ctx.credential().is_none());
        assert!(ctx.payload().is_none());
    }

    #[test]
    fn test_invalid_json_is_validation_error() {
        let err = build_context(&request(&[]), &Bytes::from_static(b"{nope")).unwrap_err();
        assert_eq!(err.code().as_str(), "VALIDATION_ERROR");
    }
}
