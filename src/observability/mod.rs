//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline runs produce:
//!     → events.rs (SecurityEvent per guard decision, correlation-tagged)
//!     → metrics.rs (counters, gauges, histograms)
//!     → tracing macros (operational logs, set up by logging.rs)
//!
//! Consumers:
//!     → EventSink (tracing target `security_event` by default)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Event recording never waits: bounded queue, drop on overflow
//! - One correlation id per pipeline run, on every event of that run
//! - Metrics are cheap (no-op until a recorder is installed)

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{
    EventOutcome, EventPump, EventSink, MemorySink, SecurityEvent, SecurityEventLogger, TracingSink,
};
