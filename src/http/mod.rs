//! HTTP surface.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs      (Axum setup, request id, timeout, body limit)
//!     → middleware.rs  (header policy on every response; build context,
//!                       run the route's pipeline)
//!     → handlers.rs    (dispatch through the circuit breaker)
//!     → downstream.rs  (registered service)
//!     → response.rs    (rejection envelope, Retry-After, correlation id)
//! ```

pub mod downstream;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod server;

pub use downstream::{Downstream, DownstreamError, DownstreamRegistry, DownstreamRequest, DownstreamResponse, EchoDownstream};
pub use response::X_CORRELATION_ID;
pub use server::{AppState, GuardianState, HttpServer, ServerError};
