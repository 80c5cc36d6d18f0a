//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Admitted request to a downstream service:
//!     → circuit_breaker.rs (short-circuit while open, track outcomes)
//!     → downstream call, bounded by the server's request timeout
//! ```
//!
//! # Design Decisions
//! - Circuit breaker prevents cascading failures
//! - Breakers are per service, never global

pub mod circuit_breaker;

pub use circuit_breaker::{
    BreakerSnapshot, CallPermit, CircuitBreaker, CircuitBreakerRegistry, CircuitState,
};
