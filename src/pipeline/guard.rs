//! The guard contract.

use async_trait::async_trait;

use crate::pipeline::context::RequestContext;
use crate::pipeline::types::{GuardResult, GuardTier};

/// A single security check.
///
/// Guards see the context accumulated so far and either allow, returning
/// annotations to add, or reject with a [`GuardError`](crate::pipeline::GuardError).
/// A guard must not assume it runs to completion: the pipeline future can
/// be dropped at any await point when the client goes away.
#[async_trait]
pub trait Guard: Send + Sync {
    /// Stable name used in events, metrics and logs.
    fn name(&self) -> &str;

    fn tier(&self) -> GuardTier;

    async fn check(&self, ctx: &RequestContext) -> GuardResult;
}

/// Guard backed by a synchronous closure.
pub struct FnGuard<F> {
    name: String,
    tier: GuardTier,
    f: F,
}

/// Wrap a closure as a guard.
pub fn guard_fn<F>(name: impl Into<String>, tier: GuardTier, f: F) -> FnGuard<F>
where
    F: Fn(&RequestContext) -> GuardResult + Send + Sync,
{
    FnGuard {
        name: name.into(),
        tier,
        f,
    }
}

#[async_trait]
impl<F> Guard for FnGuard<F>
where
    F: Fn(&RequestContext) -> GuardResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> GuardTier {
        self.tier
    }

    async fn check(&self, ctx: &RequestContext) -> GuardResult {
        (self.f)(ctx)
    }
}
