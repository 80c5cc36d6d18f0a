//! Security guards.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs       (macro: header policy)
//!     → throttle.rs      (macro: per-origin ceiling)
//!     → rate_limit.rs    (mezo: per-identity tier budget)
//!     → service_auth.rs  (mezo: service token registry)
//!     → auth.rs          (micro: bearer credential → identity)
//!     → validation.rs    (micro: per-endpoint payload schema)
//!     → ownership.rs     (micro: owner allow-list + signature)
//!     → anomaly.rs       (observation: request log, anomaly hook)
//!     → downstream via the circuit breaker registry
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - Rejections carry a public code only; details stay in the logs
//! - Shared state lives behind stores and registries passed in by `Arc`

pub mod anomaly;
pub mod auth;
pub mod fingerprint;
pub mod headers;
pub mod identity;
pub mod ownership;
pub mod rate_limit;
pub mod service_auth;
pub mod throttle;
pub mod validation;

pub use anomaly::{AnomalyDetector, AnomalyGuard, QueuedAnomalyDetector, RequestLogGuard, RequestSnapshot};
pub use auth::{Claims, CredentialVerifier, StaticTokenVerifier, TokenAuthGuard, TokenAuthenticator, VerifyError};
pub use fingerprint::{fingerprint, Fingerprint};
pub use headers::{HeaderPolicyError, SecurityHeaderPolicy, SecurityHeadersGuard};
pub use identity::{Identity, Tier};
pub use ownership::{OwnershipCheck, OwnershipGuard};
pub use rate_limit::{AdaptiveRateLimiter, MemoryRateStore, RateLimitGuard, RateLimitStore, RateWindow};
pub use service_auth::{secrets_match, ServiceAuthGuard};
pub use throttle::GlobalThrottleGuard;
pub use validation::{FieldKind, FieldRule, InputSchema, InputValidationGuard};
