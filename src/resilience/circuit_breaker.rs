//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: service assumed down, requests fail fast
//! - Half-Open: one trial call decides whether the service recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: first call after reset_timeout (no background timer)
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails
//! ```
//!
//! # Design Decisions
//! - One breaker per service name, created on first use
//! - Single trial in Half-Open; the permit is RAII so a cancelled trial
//!   frees the slot
//! - Outcomes reported by non-trial permits never move a Half-Open breaker

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::clock::Clock;
use crate::config::{BreakerSettings, CircuitBreakerConfig};
use crate::observability::metrics;
use crate::pipeline::GuardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn gauge_value(&self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    /// Seconds since the breaker last opened, while not closed.
    pub open_for_secs: Option<u64>,
}

/// Breaker for a single service.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, settings: BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            service: service.into(),
            settings,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Ask to make one call. Rejects with CIRCUIT_BREAKER_OPEN while open
    /// or while another caller holds the Half-Open trial.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CallPermit, GuardError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self.clone(), false)),
            CircuitState::Open => {
                let now = self.clock.now();
                let elapsed = inner
                    .opened_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.settings.reset_timeout() {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    Ok(CallPermit::new(self.clone(), true))
                } else {
                    Err(self.reject())
                }
            }
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Ok(CallPermit::new(self.clone(), true))
            }
            CircuitState::HalfOpen => Err(self.reject()),
        }
    }

    /// Run `f` under a permit, recording `Err` as a failure.
    ///
    /// The outer `Err` means the call was short-circuited and `f` never ran.
    pub async fn call<F, Fut, T, E>(self: &Arc<Self>, f: F) -> Result<Result<T, E>, GuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire()?;
        let result = f().await;
        match &result {
            Ok(_) => permit.success(),
            Err(_) => permit.failure(),
        }
        Ok(result)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let now = self.clock.now();
        BreakerSnapshot {
            service: self.service.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.settings.failure_threshold,
            reset_timeout_secs: self.settings.reset_timeout_secs,
            open_for_secs: match inner.state {
                CircuitState::Closed => None,
                _ => inner.opened_at.map(|at| now.saturating_duration_since(at).as_secs()),
            },
        }
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
        self.transition(&mut inner, CircuitState::Closed);
        tracing::info!(service = %self.service, "Circuit breaker reset");
    }

    fn reject(&self) -> GuardError {
        metrics::record_breaker_rejection(&self.service);
        tracing::debug!(service = %self.service, "Circuit open, call short-circuited");
        GuardError::CircuitOpen {
            service: self.service.clone(),
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        if inner.state == to {
            return;
        }
        let from = inner.state;
        inner.state = to;
        if to == CircuitState::Open {
            inner.opened_at = Some(self.clock.now());
        }
        metrics::record_breaker_state(&self.service, to.gauge_value());
        match to {
            CircuitState::Open => tracing::warn!(
                service = %self.service,
                from = from.as_str(),
                failures = inner.consecutive_failures,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(
                service = %self.service,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit breaker state change"
            ),
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen if trial => {
                inner.consecutive_failures = 0;
                inner.trial_in_flight = false;
                inner.opened_at = None;
                self.transition(&mut inner, CircuitState::Closed);
            }
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.settings.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if trial => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                inner.trial_in_flight = false;
                self.transition(&mut inner, CircuitState::Open);
            }
            _ => {}
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }
}

/// Permission to make one call. Report the outcome with
/// [`success`](Self::success) or [`failure`](Self::failure); dropping an
/// unreported trial permit frees the Half-Open slot.
#[derive(Debug)]
#[must_use = "report the call outcome on the permit"]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    reported: bool,
}

impl CallPermit {
    fn new(breaker: Arc<CircuitBreaker>, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            reported: false,
        }
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.reported = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.reported = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.reported && self.trial {
            self.breaker.release_trial();
        }
    }
}

/// All breakers, keyed by service name.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            clock,
        }
    }

    /// Breaker for `service`, created with its configured settings on first use.
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(service) {
            return existing.clone();
        }
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    service,
                    self.config.settings_for(service),
                    self.clock.clone(),
                ))
            })
            .clone()
    }

    pub fn try_acquire(&self, service: &str) -> Result<CallPermit, GuardError> {
        self.breaker(service).try_acquire()
    }

    pub async fn call<F, Fut, T, E>(&self, service: &str, f: F) -> Result<Result<T, E>, GuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.breaker(service).call(f).await
    }

    /// Current state; services never called are Closed.
    pub fn state(&self, service: &str) -> CircuitState {
        self.breakers
            .get(service)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Every known breaker, sorted by service name.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut all: Vec<_> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        all.sort_by(|a, b| a.service.cmp(&b.service));
        all
    }

    /// Close the breaker for `service`. Returns false if it does not exist.
    pub fn reset(&self, service: &str) -> bool {
        match self.breakers.get(service) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry(clock: &ManualClock) -> CircuitBreakerRegistry {
        let mut config = CircuitBreakerConfig::default();
        config.default = BreakerSettings {
            failure_threshold: 3,
            reset_timeout_secs: 60,
        };
        config.services.insert(
            "fragile".into(),
            BreakerSettings {
                failure_threshold: 1,
                reset_timeout_secs: 5,
            },
        );
        CircuitBreakerRegistry::new(config, Arc::new(clock.clone()))
    }

    async fn fail(registry: &CircuitBreakerRegistry, service: &str, calls: &AtomicUsize) -> Result<(), GuardError> {
        registry
            .call(service, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), &str>("boom")
            })
            .await
            .map(|_| ())
    }

    async fn succeed(registry: &CircuitBreakerRegistry, service: &str, calls: &AtomicUsize) -> Result<(), GuardError> {
        registry
            .call(service, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), &str>(())
            })
            .await
            .map(|_| ())
    }

    #[tokio::test]
    async fn test_opens_at_threshold_and_short_circuits() {
        let clock = ManualClock::new();
        let registry = registry(&clock);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            fail(&registry, "ledger", &calls).await.unwrap();
        }
        assert_eq!(registry.state("ledger"), CircuitState::Open);

        let err = succeed(&registry, "ledger", &calls).await.unwrap_err();
        assert_eq!(err.code().as_str(), "CIRCUIT_BREAKER_OPEN");
        assert_eq!(err.status().as_u16(), 503);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let clock = ManualClock::new();
        let registry = registry(&clock);
        let calls = AtomicUsize::new(0);

        fail(&registry, "ledger", &calls).await.unwrap();
        fail(&registry, "ledger", &calls).await.unwrap();
        succeed(&registry, "ledger", &calls).await.unwrap();
        fail(&registry, "ledger", &calls).await.unwrap();
        fail(&registry, "ledger", &calls).await.unwrap();

        assert_eq!(registry.state("ledger"), CircuitState::Closed);
        assert_eq!(registry.snapshot()[0].consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_half_open_trial_success_closes() {
        let clock = ManualClock::new();
        let registry = registry(&clock);
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            fail(&registry, "ledger", &calls).await.unwrap();
        }

        clock.advance(Duration::from_secs(59));
        assert!(registry.try_acquire("ledger").is_err());

        clock.advance(Duration::from_secs(1));
        let trial = registry.try_acquire("ledger").unwrap();
        assert!(trial.is_trial());
        assert_eq!(registry.state("ledger"), CircuitState::HalfOpen);
        assert!(registry.try_acquire("ledger").is_err(), "second caller during trial");

        trial.success();
        assert_eq!(registry.state("ledger"), CircuitState::Closed);
        assert_eq!(registry.snapshot()[0].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_half_open_trial_failure_reopens() {
        let clock = ManualClock::new();
        let registry = registry(&clock);
        let calls = AtomicUsize::new(0);
        fail(&registry, "fragile", &calls).await.unwrap();
        assert_eq!(registry.state("fragile"), CircuitState::Open);

        clock.advance(Duration::from_secs(5));
        fail(&registry, "fragile", &calls).await.unwrap();
        assert_eq!(registry.state("fragile"), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Timeout restarted from the failed trial.
        clock.advance(Duration::from_secs(4));
        assert!(registry.try_acquire("fragile").is_err());
        clock.advance(Duration::from_secs(1));
        assert!(registry.try_acquire("fragile").is_ok());
    }

    #[tokio::test]
    async fn test_dropped_trial_frees_slot() {
        let clock = ManualClock::new();
        let registry = registry(&clock);
        let calls = AtomicUsize::new(0);
        fail(&registry, "fragile", &calls).await.unwrap();
        clock.advance(Duration::from_secs(5));

        let trial = registry.try_acquire("fragile").unwrap();
        drop(trial);

        assert_eq!(registry.state("fragile"), CircuitState::HalfOpen);
        let retry = registry.try_acquire("fragile").unwrap();
        assert!(retry.is_trial());
        retry.success();
        assert_eq!(registry.state("fragile"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_stale_closed_permit_does_not_close_half_open() {
        let clock = ManualClock::new();
        let registry = registry(&clock);
        let calls = AtomicUsize::new(0);

        let stale = registry.try_acquire("fragile").unwrap();
        fail(&registry, "fragile", &calls).await.unwrap();
        clock.advance(Duration::from_secs(5));
        let _trial = registry.try_acquire("fragile").unwrap();

        stale.success();
        assert_eq!(registry.state("fragile"), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_services_are_isolated_and_reset() {
        let clock = ManualClock::new();
        let registry = registry(&clock);
        let calls = AtomicUsize::new(0);
        fail(&registry, "fragile", &calls).await.unwrap();
        succeed(&registry, "ledger", &calls).await.unwrap();

        assert_eq!(registry.state("fragile"), CircuitState::Open);
        assert_eq!(registry.state("ledger"), CircuitState::Closed);
        assert_eq!(registry.state("never-called"), CircuitState::Closed);

        let names: Vec<_> = registry.snapshot().into_iter().map(|s| s.service).collect();
        assert_eq!(names, vec!["fragile", "ledger"]);

        assert!(registry.reset("fragile"));
        assert!(!registry.reset("never-called"));
        assert_eq!(registry.state("fragile"), CircuitState::Closed);
    }
}
