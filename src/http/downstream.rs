//! Downstream services reached after a request clears its pipeline.
//!
//! Every call goes through the circuit breaker registry under the service
//! name it was registered with.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use axum::http::StatusCode;
use dashmap::DashMap;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::pipeline::RequestContext;

/// What a downstream sees of an admitted request.
#[derive(Debug, Clone)]
pub struct DownstreamRequest {
    pub service: String,
    pub method: String,
    pub endpoint: String,
    pub correlation_id: Option<Uuid>,
    pub subject: Option<String>,
    pub owner: Option<Address>,
    pub payload: Option<Value>,
}

impl DownstreamRequest {
    pub fn from_context(service: &str, ctx: &RequestContext) -> Self {
        let annotations = ctx.annotations();
        Self {
            service: service.to_string(),
            method: ctx.method().to_string(),
            endpoint: ctx.endpoint().to_string(),
            correlation_id: annotations.correlation_id(),
            subject: annotations.identity().map(|i| i.subject.clone()),
            owner: annotations.owner(),
            payload: ctx.payload().cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownstreamResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Failures that count against the service's breaker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DownstreamError {
    #[error("downstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("downstream failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Downstream: Send + Sync {
    async fn call(&self, request: DownstreamRequest) -> Result<DownstreamResponse, DownstreamError>;
}

/// Answers with what it was sent.
#[derive(Debug, Default)]
pub struct EchoDownstream;

#[async_trait]
impl Downstream for EchoDownstream {
    async fn call(&self, request: DownstreamRequest) -> Result<DownstreamResponse, DownstreamError> {
        Ok(DownstreamResponse {
            status: StatusCode::OK,
            body: json!({
                "service": request.service,
                "method": request.method,
                "endpoint": request.endpoint,
                "correlation_id": request.correlation_id,
                "subject": request.subject,
                "owner": request.owner,
                "payload": request.payload,
            }),
        })
    }
}

/// Downstreams by service name.
#[derive(Default, Clone)]
pub struct DownstreamRegistry {
    services: Arc<DashMap<String, Arc<dyn Downstream>>>,
}

impl DownstreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, service: impl Into<String>, downstream: Arc<dyn Downstream>) {
        self.services.insert(service.into(), downstream);
    }

    pub fn get(&self, service: &str) -> Option<Arc<dyn Downstream>> {
        self.services.get(service).map(|d| d.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
