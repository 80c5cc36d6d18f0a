//! Security event recording.
//!
//! [`SecurityEventLogger::record`] never waits on the sink: events go into a
//! bounded channel and an [`EventPump`] drains them to an [`EventSink`] on
//! its own task. When the queue is full the event is dropped and counted.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::observability::metrics;
use crate::pipeline::ErrorCode;

/// What happened at the point the event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// A guard allowed the request.
    Allowed,
    /// A guard (or the composer) rejected the request.
    Rejected,
    /// Every guard of the pipeline allowed the request.
    Passed,
}

/// One pipeline decision. Write-once.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub correlation_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub origin: IpAddr,
    pub endpoint: String,
    pub pipeline: String,
    /// Guard that produced the decision; `None` for run-level events.
    pub guard: Option<String>,
    pub outcome: EventOutcome,
    pub error_code: Option<ErrorCode>,
    pub identity_subject: Option<String>,
}

/// Destination for drained security events.
pub trait EventSink: Send + Sync + 'static {
    fn write(&self, event: &SecurityEvent);
}

/// Writes events as structured log lines under the `security_event` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn write(&self, event: &SecurityEvent) {
        let error_code = event.error_code.map(|c| c.as_str()).unwrap_or("-");
        let subject = event.identity_subject.as_deref().unwrap_or("anonymous");
        let guard = event.guard.as_deref().unwrap_or("-");

        match event.outcome {
            EventOutcome::Rejected => tracing::warn!(
                target: "security_event",
                correlation_id = %event.correlation_id,
                timestamp = %event.timestamp.to_rfc3339(),
                origin = %event.origin,
                endpoint = %event.endpoint,
                pipeline = %event.pipeline,
                guard,
                error_code,
                subject,
                "request rejected"
            ),
            outcome => tracing::info!(
                target: "security_event",
                correlation_id = %event.correlation_id,
                timestamp = %event.timestamp.to_rfc3339(),
                origin = %event.origin,
                endpoint = %event.endpoint,
                pipeline = %event.pipeline,
                guard,
                outcome = ?outcome,
                subject,
                "request allowed"
            ),
        }
    }
}

/// Collects events in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<SecurityEvent>>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().expect("memory sink mutex poisoned").clone()
    }
}

impl EventSink for MemorySink {
    fn write(&self, event: &SecurityEvent) {
        self.events
            .lock()
            .expect("memory sink mutex poisoned")
            .push(event.clone());
    }
}

/// Non-blocking producer side of the event channel.
#[derive(Debug)]
pub struct SecurityEventLogger {
    tx: mpsc::Sender<SecurityEvent>,
    dropped: AtomicU64,
}

impl SecurityEventLogger {
    /// Create a logger with a queue of `capacity` events and its pump.
    pub fn channel(capacity: usize) -> (Self, EventPump) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            EventPump { rx },
        )
    }

    /// Queue an event. Never blocks.
    pub fn record(&self, event: SecurityEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_event_dropped();
                tracing::debug!(correlation_id = %event.correlation_id, "Security event queue full, event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_event_dropped();
            }
        }
    }

    /// Events lost to a full or closed queue.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer side of the event channel.
#[derive(Debug)]
pub struct EventPump {
    rx: mpsc::Receiver<SecurityEvent>,
}

impl EventPump {
    /// Deliver events until every logger handle is dropped.
    pub async fn run<S: EventSink>(mut self, sink: S) {
        while let Some(event) = self.rx.recv().await {
            sink.write(&event);
        }
        tracing::debug!("Security event pump stopped");
    }

    /// Deliver whatever is queued right now. Returns the number written.
    pub fn drain(&mut self, sink: &dyn EventSink) -> usize {
        let mut written = 0;
        while let Ok(event) = self.rx.try_recv() {
            sink.write(&event);
            written += 1;
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn event(outcome: EventOutcome) -> SecurityEvent {
        SecurityEvent {
            correlation_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            origin: IpAddr::V4(Ipv4Addr::LOCALHOST),
            endpoint: "/api/quick/echo".into(),
            pipeline: "quick".into(),
            guard: Some("token_auth".into()),
            outcome,
            error_code: None,
            identity_subject: None,
        }
    }

    #[test]
    fn test_record_and_drain() {
        let (logger, mut pump) = SecurityEventLogger::channel(8);
        logger.record(event(EventOutcome::Allowed));
        logger.record(event(EventOutcome::Rejected));

        let sink = MemorySink::default();
        assert_eq!(pump.drain(&sink), 2);
        assert_eq!(sink.events()[1].outcome, EventOutcome::Rejected);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (logger, mut pump) = SecurityEventLogger::channel(2);
        for _ in 0..5 {
            logger.record(event(EventOutcome::Allowed));
        }

        assert_eq!(logger.dropped(), 3);
        let sink = MemorySink::default();
        assert_eq!(pump.drain(&sink), 2);
    }

    #[tokio::test]
    async fn test_pump_runs_until_logger_dropped() {
        let (logger, pump) = SecurityEventLogger::channel(8);
        let sink = MemorySink::default();
        let handle = tokio::spawn(pump.run(sink.clone()));

        logger.record(event(EventOutcome::Passed));
        drop(logger);
        handle.await.unwrap();

        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_event_serializes_with_codes() {
        let mut e = event(EventOutcome::Rejected);
        e.error_code = Some(ErrorCode::NoToken);
        let json = serde_json::to_value(&e).unwrap();

        assert_eq!(json["outcome"], "rejected");
        assert_eq!(json["error_code"], "NO_TOKEN");
    }
}
