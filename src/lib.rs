//! Endpoint Guardian: layered request security for HTTP services.
//!
//! Requests pass through named pipelines of guards grouped by tier
//! (macro, mezo, micro, observation) before reaching a downstream service
//! behind a per-service circuit breaker.

// Core
pub mod clock;
pub mod config;
pub mod pipeline;
pub mod security;

// Surfaces
pub mod admin;
pub mod http;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::GuardianConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pipeline::{PipelineComposer, PipelineOutcome, RequestContext};
