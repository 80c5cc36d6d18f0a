//! Guard pipeline subsystem.
//!
//! # Data Flow
//! ```text
//! RequestContext (inbound facts)
//!     → composer.rs (assign correlation id, look up pipeline)
//!     → macro guards   (security headers, global throttle)
//!     → mezo guards    (adaptive rate limit, service auth)
//!     → micro guards   (token auth, ownership check)
//!     → observation    (request log, anomaly hook)
//!     → PipelineOutcome::Passed(ctx) | PipelineOutcome::Rejected(rejection)
//!
//! Every guard decision → SecurityEventLogger
//! ```
//!
//! # Design Decisions
//! - Sequential, short-circuit on the first rejection
//! - Annotations are additive: first writer wins
//! - Guard faults stop at the composer and surface as INTERNAL_ERROR

pub mod composer;
pub mod context;
pub mod guard;
pub mod outcome;
pub mod tiers;
pub mod types;

pub use composer::{Pipeline, PipelineBuilder, PipelineComposer, PipelineError};
pub use context::{Annotations, ContextPatch, RequestContext};
pub use guard::{guard_fn, FnGuard, Guard};
pub use outcome::{PipelineOutcome, Rejection, RejectionEnvelope};
pub use tiers::{GuardSet, MacroGuards, MezoGuards, MicroGuards, ObservationGuards, FULL_PIPELINE, QUICK_PIPELINE};
pub use types::{ErrorCode, ErrorKind, GuardError, GuardResult, GuardTier};
