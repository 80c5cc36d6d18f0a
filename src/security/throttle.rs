//! Per-origin throttle.
//!
//! Coarse flood protection ahead of everything else: a fixed request count
//! per origin address per window, regardless of who the caller claims to be.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::Clock;
use crate::config::ThrottleConfig;
use crate::observability::metrics;
use crate::pipeline::{ContextPatch, Guard, GuardError, GuardResult, GuardTier, RequestContext};
use crate::security::rate_limit::RateLimitStore;

/// Macro-tier guard counting requests per origin.
#[derive(Debug)]
pub struct GlobalThrottleGuard {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
    max_requests: u64,
    enabled: bool,
}

impl GlobalThrottleGuard {
    pub fn new(config: &ThrottleConfig, store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            window: config.window(),
            max_requests: config.max_requests,
            enabled: config.enabled,
        }
    }

    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired(self.window, self.clock.now())
    }
}

#[async_trait]
impl Guard for GlobalThrottleGuard {
    fn name(&self) -> &str {
        "global_throttle"
    }

    fn tier(&self) -> GuardTier {
        GuardTier::Macro
    }

    async fn check(&self, ctx: &RequestContext) -> GuardResult {
        if !self.enabled {
            return Ok(ContextPatch::new());
        }

        let key = ctx.origin().to_string();
        let decision = self
            .store
            .hit(&key, self.max_requests, self.window, self.clock.now());

        if !decision.allowed {
            tracing::warn!(origin = %key, count = decision.count, "Origin throttled");
            metrics::record_rate_limited("origin");
            return Err(GuardError::RateLimited {
                retry_after: decision.retry_after,
            });
        }
        Ok(ContextPatch::new())
    }
}
