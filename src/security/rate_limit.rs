//! Adaptive rate limiting with per-tier budgets.
//!
//! Fixed windows: a key's count resets only once the full window has
//! elapsed since it started. The budget is looked up from the current
//! [`TierBudgets`] on every check, so a config reload takes effect on the
//! next request.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;

use crate::clock::Clock;
use crate::config::TierBudgets;
use crate::observability::metrics;
use crate::pipeline::{ContextPatch, Guard, GuardError, GuardResult, GuardTier, RequestContext};
use crate::security::auth::TokenAuthenticator;
use crate::security::fingerprint::fingerprint;
use crate::security::identity::Tier;

/// Count accumulated for one key in its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub window_start: Instant,
    pub count: u64,
}

/// Result of recording one hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    pub allowed: bool,
    pub count: u64,
    /// Time left until the window resets.
    pub retry_after: Duration,
}

/// Storage for rate windows.
///
/// `hit` must reset, increment and compare as one atomic step per key.
/// A shared external store can implement this without touching the guards.
pub trait RateLimitStore: Send + Sync + Debug {
    fn hit(&self, key: &str, budget: u64, window: Duration, now: Instant) -> WindowDecision;

    fn snapshot(&self, key: &str) -> Option<RateWindow>;

    /// Drop windows that have fully elapsed. Returns how many were removed.
    fn purge_expired(&self, window: Duration, now: Instant) -> usize;
}

/// In-process store. Each hit runs under the key's shard write lock.
#[derive(Debug, Default)]
pub struct MemoryRateStore {
    windows: DashMap<String, RateWindow>,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl RateLimitStore for MemoryRateStore {
    fn hit(&self, key: &str, budget: u64, window: Duration, now: Instant) -> WindowDecision {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(RateWindow {
                window_start: now,
                count: 0,
            });
        let state = entry.value_mut();

        if now.saturating_duration_since(state.window_start) >= window {
            state.window_start = now;
            state.count = 0;
        }
        state.count = state.count.saturating_add(1);

        let elapsed = now.saturating_duration_since(state.window_start);
        WindowDecision {
            allowed: state.count <= budget,
            count: state.count,
            retry_after: window.saturating_sub(elapsed),
        }
    }

    fn snapshot(&self, key: &str) -> Option<RateWindow> {
        self.windows.get(key).map(|r| *r.value())
    }

    fn purge_expired(&self, window: Duration, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.window_start) < window);
        before.saturating_sub(self.windows.len())
    }
}

/// Tier-aware fixed-window limiter.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    store: Arc<dyn RateLimitStore>,
    budgets: Arc<ArcSwap<TierBudgets>>,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl AdaptiveRateLimiter {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        budgets: Arc<ArcSwap<TierBudgets>>,
        window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            budgets,
            window,
            clock,
        }
    }

    /// Count one request for `key` against the budget of `tier`.
    pub fn check(&self, key: &str, tier: Tier) -> Result<(), GuardError> {
        let budget = self.budgets.load().budget_for(tier);
        let decision = self.store.hit(key, budget, self.window, self.clock.now());

        if decision.allowed {
            Ok(())
        } else {
            tracing::warn!(
                client = %key,
                tier = %tier,
                count = decision.count,
                budget,
                "Rate limit exceeded"
            );
            metrics::record_rate_limited(tier.as_str());
            Err(GuardError::RateLimited {
                retry_after: decision.retry_after,
            })
        }
    }

    pub fn snapshot(&self, key: &str) -> Option<RateWindow> {
        self.store.snapshot(key)
    }

    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired(self.window, self.clock.now())
    }

    pub fn budgets(&self) -> TierBudgets {
        **self.budgets.load()
    }
}

/// Rate-limit key and tier for a request: the identity subject when known,
/// otherwise the fingerprint at the standard tier.
pub fn rate_key(ctx: &RequestContext) -> (String, Tier) {
    match ctx.annotations().identity() {
        Some(identity) => (format!("id:{}", identity.subject), identity.tier),
        None => {
            let fp = ctx
                .annotations()
                .fingerprint()
                .cloned()
                .unwrap_or_else(|| fingerprint(ctx.origin(), ctx.client_signature()));
            (format!("fp:{}", fp), Tier::Standard)
        }
    }
}

/// Mezo-tier guard around [`AdaptiveRateLimiter`].
///
/// When the request carries a credential that no guard has verified yet,
/// the guard resolves it first so the caller's tier applies. A credential
/// that fails verification here is limited as anonymous; rejecting it is
/// left to the token guard.
pub struct RateLimitGuard {
    limiter: Arc<AdaptiveRateLimiter>,
    identities: Option<Arc<TokenAuthenticator>>,
}

impl RateLimitGuard {
    pub fn new(limiter: Arc<AdaptiveRateLimiter>) -> Self {
        Self {
            limiter,
            identities: None,
        }
    }

    pub fn with_identity_resolver(mut self, authenticator: Arc<TokenAuthenticator>) -> Self {
        self.identities = Some(authenticator);
        self
    }
}

#[async_trait]
impl Guard for RateLimitGuard {
    fn name(&self) -> &str {
        "rate_limit"
    }

    fn tier(&self) -> GuardTier {
        GuardTier::Mezo
    }

    async fn check(&self, ctx: &RequestContext) -> GuardResult {
        let mut patch = ContextPatch::new();

        let resolved = match (ctx.annotations().identity(), &self.identities) {
            (None, Some(authenticator)) => authenticator.peek(ctx).await,
            _ => None,
        };

        let (key, tier) = match &resolved {
            Some(identity) => (format!("id:{}", identity.subject), identity.tier),
            None => rate_key(ctx),
        };
        if resolved.is_none() && ctx.annotations().identity().is_none() {
            patch = patch.with_fingerprint(fingerprint(ctx.origin(), ctx.client_signature()));
        }

        self.limiter.check(&key, tier)?;

        if let Some(identity) = resolved {
            patch = patch.with_identity(identity);
        }
        Ok(patch.with_label("rate_limit_tier", tier.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Barrier;

    fn limiter(clock: &ManualClock, budgets: TierBudgets) -> AdaptiveRateLimiter {
        AdaptiveRateLimiter::new(
            Arc::new(MemoryRateStore::new()),
            Arc::new(ArcSwap::from_pointee(budgets)),
            Duration::from_secs(900),
            Arc::new(clock.clone()),
        )
    }

    fn small_budgets() -> TierBudgets {
        TierBudgets {
            enterprise: 10,
            premium: 5,
            standard: 3,
        }
    }

    #[test]
    fn test_budget_boundary() {
        let clock = ManualClock::new();
        let limiter = limiter(&clock, small_budgets());

        for _ in 0..3 {
            assert!(limiter.check("id:bob", Tier::Standard).is_ok());
        }
        let err = limiter.check("id:bob", Tier::Standard).unwrap_err();
        assert_eq!(err.code().as_str(), "RATE_LIMIT_EXCEEDED");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_budget_depends_on_tier() {
        let clock = ManualClock::new();
        let limiter = limiter(&clock, small_budgets());

        let allowed = |key: &str, tier| (0..20).filter(|_| limiter.check(key, tier).is_ok()).count();
        assert_eq!(allowed("id:ent", Tier::Enterprise), 10);
        assert_eq!(allowed("id:pre", Tier::Premium), 5);
        assert_eq!(allowed("id:std", Tier::Standard), 3);
    }

    #[test]
    fn test_window_resets_exactly_at_boundary() {
        let clock = ManualClock::new();
        let limiter = limiter(&clock, small_budgets());

        for _ in 0..3 {
            limiter.check("k", Tier::Standard).unwrap();
        }
        clock.advance(Duration::from_secs(600));
        let err = limiter.check("k", Tier::Standard).unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(300)));

        clock.advance(Duration::from_secs(299));
        assert!(limiter.check("k", Tier::Standard).is_err());

        clock.advance(Duration::from_secs(1));
        assert!(limiter.check("k", Tier::Standard).is_ok());
        assert_eq!(limiter.snapshot("k").unwrap().count, 1);
    }

    #[test]
    fn test_budget_swap_applies_immediately() {
        let clock = ManualClock::new();
        let budgets = Arc::new(ArcSwap::from_pointee(small_budgets()));
        let limiter = AdaptiveRateLimiter::new(
            Arc::new(MemoryRateStore::new()),
            budgets.clone(),
            Duration::from_secs(60),
            Arc::new(clock.clone()),
        );

        for _ in 0..3 {
            limiter.check("k", Tier::Standard).unwrap();
        }
        assert!(limiter.check("k", Tier::Standard).is_err());

        budgets.store(Arc::new(TierBudgets {
            standard: 10,
            ..small_budgets()
        }));
        assert!(limiter.check("k", Tier::Standard).is_ok());
    }

    #[test]
    fn test_concurrent_last_slot() {
        let clock = ManualClock::new();
        let limiter = Arc::new(limiter(&clock, small_budgets()));
        limiter.check("id:racer", Tier::Standard).unwrap();
        limiter.check("id:racer", Tier::Standard).unwrap();

        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let limiter = limiter.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    limiter.check("id:racer", Tier::Standard).is_ok()
                })
            })
            .collect();

        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(allowed, 1);
    }

    #[test]
    fn test_purge_expired() {
        let clock = ManualClock::new();
        let limiter = limiter(&clock, small_budgets());
        limiter.check("old", Tier::Standard).unwrap();
        clock.advance(Duration::from_secs(600));
        limiter.check("fresh", Tier::Standard).unwrap();
        clock.advance(Duration::from_secs(300));

        assert_eq!(limiter.purge_expired(), 1);
        assert!(limiter.snapshot("old").is_none());
        assert!(limiter.snapshot("fresh").is_some());
    }

    #[tokio::test]
    async fn test_guard_keys_anonymous_traffic_by_fingerprint() {
        let clock = ManualClock::new();
        let limiter = Arc::new(limiter(&clock, small_budgets()));
        let guard = RateLimitGuard::new(limiter.clone());
        let origin = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10));
        let ctx = RequestContext::new(origin, "/api/quick/echo").with_client_signature("bot/1.0");

        for _ in 0..3 {
            assert!(guard.check(&ctx).await.is_ok());
        }
        assert!(guard.check(&ctx).await.is_err());

        let key = format!("fp:{}", fingerprint(origin, "bot/1.0"));
        assert_eq!(limiter.snapshot(&key).unwrap().count, 4);
    }
}
