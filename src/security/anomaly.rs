//! Observation-tier guards: request logging and the anomaly hook.
//!
//! Neither ever rejects. They see requests that every enforcing guard has
//! already allowed.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::pipeline::{ContextPatch, Guard, GuardResult, GuardTier, RequestContext};

/// What an anomaly detector gets to look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSnapshot {
    pub correlation_id: Option<Uuid>,
    pub origin: IpAddr,
    pub method: String,
    pub endpoint: String,
    pub subject: Option<String>,
    pub fingerprint: Option<String>,
}

impl RequestSnapshot {
    pub fn from_context(ctx: &RequestContext) -> Self {
        let annotations = ctx.annotations();
        Self {
            correlation_id: annotations.correlation_id(),
            origin: ctx.origin(),
            method: ctx.method().to_string(),
            endpoint: ctx.endpoint().to_string(),
            subject: annotations.identity().map(|i| i.subject.clone()),
            fingerprint: annotations.fingerprint().map(|f| f.to_string()),
        }
    }
}

/// Receives snapshots of allowed requests. Must not block.
pub trait AnomalyDetector: Send + Sync {
    /// Returns whether the snapshot was accepted for analysis.
    fn observe(&self, snapshot: RequestSnapshot) -> bool;
}

/// Hands snapshots to a background consumer through a bounded queue.
#[derive(Debug)]
pub struct QueuedAnomalyDetector {
    tx: mpsc::Sender<RequestSnapshot>,
    dropped: AtomicU64,
}

impl QueuedAnomalyDetector {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RequestSnapshot>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AnomalyDetector for QueuedAnomalyDetector {
    fn observe(&self, snapshot: RequestSnapshot) -> bool {
        match self.tx.try_send(snapshot) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

/// Logs every request that reached the end of the enforcing tiers.
#[derive(Debug, Default)]
pub struct RequestLogGuard;

#[async_trait]
impl Guard for RequestLogGuard {
    fn name(&self) -> &str {
        "request_log"
    }

    fn tier(&self) -> GuardTier {
        GuardTier::Observation
    }

    async fn check(&self, ctx: &RequestContext) -> GuardResult {
        let annotations = ctx.annotations();
        tracing::info!(
            correlation_id = ?annotations.correlation_id(),
            origin = %ctx.origin(),
            method = %ctx.method(),
            endpoint = %ctx.endpoint(),
            subject = annotations.identity().map(|i| i.subject.as_str()).unwrap_or("anonymous"),
            service = annotations.service().unwrap_or("-"),
            "Request admitted"
        );
        Ok(ContextPatch::new())
    }
}

/// Forwards snapshots to the configured detector, if any.
#[derive(Default)]
pub struct AnomalyGuard {
    detector: Option<Arc<dyn AnomalyDetector>>,
}

impl AnomalyGuard {
    pub fn new(detector: Option<Arc<dyn AnomalyDetector>>) -> Self {
        Self { detector }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Guard for AnomalyGuard {
    fn name(&self) -> &str {
        "anomaly"
    }

    fn tier(&self) -> GuardTier {
        GuardTier::Observation
    }

    async fn check(&self, ctx: &RequestContext) -> GuardResult {
        let Some(detector) = &self.detector else {
            return Ok(ContextPatch::new());
        };

        if detector.observe(RequestSnapshot::from_context(ctx)) {
            Ok(ContextPatch::new().with_label("anomaly", "queued"))
        } else {
            tracing::debug!(endpoint = %ctx.endpoint(), "Anomaly queue full, snapshot skipped");
            Ok(ContextPatch::new().with_label("anomaly", "skipped"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ctx() -> RequestContext {
        RequestContext::new(IpAddr::V4(Ipv4Addr::LOCALHOST), "/api/secure/echo").with_method("POST")
    }

    #[tokio::test]
    async fn test_disabled_guard_is_noop() {
        let patch = AnomalyGuard::disabled().check(&ctx()).await.unwrap();
        assert!(patch.is_empty());
    }

    #[tokio::test]
    async fn test_queued_detector_receives_snapshot() {
        let (detector, mut rx) = QueuedAnomalyDetector::channel(4);
        let guard = AnomalyGuard::new(Some(Arc::new(detector)));

        let mut ctx = ctx();
        let patch = guard.check(&ctx).await.unwrap();
        ctx.apply(patch);
        assert_eq!(ctx.annotations().label("anomaly"), Some("queued"));

        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.method, "POST");
        assert_eq!(snapshot.endpoint, "/api/secure/echo");
    }

    #[tokio::test]
    async fn test_full_queue_never_blocks_or_rejects() {
        let (detector, _rx) = QueuedAnomalyDetector::channel(1);
        let detector = Arc::new(detector);
        let guard = AnomalyGuard::new(Some(detector.clone()));

        for _ in 0..5 {
            assert!(guard.check(&ctx()).await.is_ok());
        }
        assert_eq!(detector.dropped(), 4);
    }

    #[tokio::test]
    async fn test_request_log_allows() {
        assert!(RequestLogGuard.check(&ctx()).await.unwrap().is_empty());
    }
}
