//! HTTP server setup and wiring.
//!
//! # Responsibilities
//! - Build every guard, store and registry from one [`GuardianConfig`]
//! - Compose the quick and full pipelines
//! - Create the Axum router with guard and header middleware
//! - Run background tasks (event pump, window purge, config reload)
//! - Serve until the shutdown signal, then drain

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    http::StatusCode,
    middleware,
    routing::{any, get},
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::setup_admin_router;
use crate::clock::{Clock, SystemClock};
use crate::config::{GuardianConfig, TierBudgets};
use crate::http::downstream::{Downstream, DownstreamRegistry, EchoDownstream};
use crate::http::handlers::{dispatch, health};
use crate::http::middleware::{guard_middleware, security_headers_middleware, GuardLayerState};
use crate::observability::events::{EventPump, SecurityEventLogger, TracingSink};
use crate::pipeline::{
    guard_fn, ContextPatch, Guard, GuardSet, GuardTier, MacroGuards, MezoGuards, MicroGuards,
    ObservationGuards, PipelineComposer, PipelineError, RequestContext, FULL_PIPELINE, QUICK_PIPELINE,
};
use crate::resilience::CircuitBreakerRegistry;
use crate::security::{
    AdaptiveRateLimiter, AnomalyDetector, AnomalyGuard, GlobalThrottleGuard, HeaderPolicyError,
    InputValidationGuard, MemoryRateStore, OwnershipCheck, OwnershipGuard, QueuedAnomalyDetector, RateLimitGuard,
    RequestLogGuard, RequestSnapshot, SecurityHeaderPolicy, SecurityHeadersGuard, ServiceAuthGuard,
    StaticTokenVerifier, TokenAuthGuard, TokenAuthenticator,
};

/// Errors building or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("header policy: {0}")]
    HeaderPolicy(#[from] HeaderPolicyError),

    #[error("pipeline: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the handlers share.
pub struct GuardianState {
    pub config: GuardianConfig,
    pub composer: PipelineComposer,
    pub events: Arc<SecurityEventLogger>,
    pub header_policy: Arc<ArcSwap<SecurityHeaderPolicy>>,
    pub budgets: Arc<ArcSwap<TierBudgets>>,
    pub limiter: Arc<AdaptiveRateLimiter>,
    pub throttle: Arc<GlobalThrottleGuard>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub downstreams: DownstreamRegistry,
    pub started_at: Instant,
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<GuardianState>,
}

impl AppState {
    /// Apply the hot-reloadable parts of a new configuration: tier budgets
    /// and the header policy. Everything else needs a restart.
    pub fn reload(&self, config: &GuardianConfig) {
        self.inner.budgets.store(Arc::new(config.rate_limit.budgets));

        match SecurityHeaderPolicy::new(&config.headers) {
            Ok(policy) => self.inner.header_policy.store(Arc::new(policy)),
            Err(e) => tracing::error!(error = %e, "Reloaded header policy invalid, keeping current policy"),
        }

        tracing::info!(
            enterprise = config.rate_limit.budgets.enterprise,
            premium = config.rate_limit.budgets.premium,
            standard = config.rate_limit.budgets.standard,
            "Configuration reloaded"
        );
    }
}

/// HTTP server for the guardian.
pub struct HttpServer {
    state: AppState,
    event_pump: Option<EventPump>,
    anomaly_rx: Option<mpsc::Receiver<RequestSnapshot>>,
}

impl HttpServer {
    /// Create a server on the system clock.
    pub fn new(config: GuardianConfig) -> Result<Self, ServerError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a server whose limiter and breakers read `clock`.
    pub fn with_clock(config: GuardianConfig, clock: Arc<dyn Clock>) -> Result<Self, ServerError> {
        let header_policy = Arc::new(ArcSwap::from_pointee(SecurityHeaderPolicy::new(&config.headers)?));
        let budgets = Arc::new(ArcSwap::from_pointee(config.rate_limit.budgets));

        let limiter = Arc::new(AdaptiveRateLimiter::new(
            Arc::new(MemoryRateStore::new()),
            budgets.clone(),
            config.rate_limit.window(),
            clock.clone(),
        ));
        let throttle = Arc::new(GlobalThrottleGuard::new(
            &config.throttle,
            Arc::new(MemoryRateStore::new()),
            clock.clone(),
        ));
        let authenticator = Arc::new(TokenAuthenticator::new(Arc::new(
            StaticTokenVerifier::from_config(&config.auth),
        )));

        let rate_limit: Arc<dyn Guard> = if config.rate_limit.enabled {
            Arc::new(RateLimitGuard::new(limiter.clone()).with_identity_resolver(authenticator.clone()))
        } else {
            Arc::new(guard_fn("rate_limit", GuardTier::Mezo, |_ctx: &RequestContext| {
                Ok(ContextPatch::new())
            }))
        };

        let (anomaly_detector, anomaly_rx) = if config.anomaly.enabled {
            let (detector, rx) = QueuedAnomalyDetector::channel(config.anomaly.queue_capacity);
            (Some(Arc::new(detector) as Arc<dyn AnomalyDetector>), Some(rx))
        } else {
            (None, None)
        };

        let guards = GuardSet {
            macro_tier: MacroGuards {
                security_headers: Arc::new(SecurityHeadersGuard::new(header_policy.clone())),
                global_throttle: throttle.clone(),
            },
            mezo_tier: MezoGuards {
                rate_limit,
                service_auth: Arc::new(ServiceAuthGuard::new(&config.service_auth)),
            },
            micro_tier: MicroGuards {
                token_auth: Arc::new(TokenAuthGuard::new(authenticator)),
                input_validation: Arc::new(InputValidationGuard::from_config(&config.validation)),
                ownership: Arc::new(OwnershipGuard::new(OwnershipCheck::from_config(&config.ownership))),
            },
            observation: ObservationGuards {
                request_log: Arc::new(RequestLogGuard),
                anomaly: Arc::new(AnomalyGuard::new(anomaly_detector)),
            },
        };

        let (logger, event_pump) = SecurityEventLogger::channel(config.events.queue_capacity);
        let events = Arc::new(logger);
        let mut composer = PipelineComposer::new(events.clone());
        composer
            .register(guards.quick_pipeline()?)
            .register(guards.full_pipeline()?)
            .alias("fast", QUICK_PIPELINE);

        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone(), clock));
        let downstreams = DownstreamRegistry::new();
        downstreams.register("echo", Arc::new(EchoDownstream));

        let inner = GuardianState {
            config,
            composer,
            events,
            header_policy,
            budgets,
            limiter,
            throttle,
            breakers,
            downstreams,
            started_at: Instant::now(),
        };

        Ok(Self {
            state: AppState { inner: Arc::new(inner) },
            event_pump: Some(event_pump),
            anomaly_rx,
        })
    }

    /// Make `downstream` reachable as `/api/{quick,secure}/{service}`.
    pub fn register_downstream(&self, service: impl Into<String>, downstream: Arc<dyn Downstream>) {
        self.state.inner.downstreams.register(service, downstream);
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Take the event pump to drive it yourself. `run` spawns it otherwise.
    pub fn take_event_pump(&mut self) -> Option<EventPump> {
        self.event_pump.take()
    }

    /// Take the anomaly queue receiver. `run` drains it to the log otherwise.
    pub fn take_anomaly_receiver(&mut self) -> Option<mpsc::Receiver<RequestSnapshot>> {
        self.anomaly_rx.take()
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Bodies are capped by the guard middleware so that oversized requests
    /// get the rejection envelope.
    pub fn router(&self) -> Router {
        let state = self.state.clone();
        let config = &state.inner.config;

        let guarded = |path: &str, pipeline: &'static str| {
            Router::new()
                .route(path, any(dispatch))
                .route_layer(middleware::from_fn_with_state(
                    GuardLayerState {
                        app: state.clone(),
                        pipeline,
                    },
                    guard_middleware,
                ))
        };

        let mut app = Router::new()
            .route("/health", get(health))
            .merge(guarded("/api/quick/{service}", QUICK_PIPELINE))
            .merge(guarded("/api/secure/{service}", FULL_PIPELINE));

        if config.admin.enabled {
            app = app.merge(setup_admin_router(state.clone()));
        }

        app.with_state(state.clone())
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                config.timeouts.request(),
            ))
            .layer(middleware::from_fn_with_state(
                state.inner.header_policy.clone(),
                security_headers_middleware,
            ))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        mut self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GuardianConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        if let Some(pump) = self.event_pump.take() {
            tokio::spawn(pump.run(TracingSink));
        }
        if let Some(rx) = self.anomaly_rx.take() {
            tokio::spawn(log_anomaly_snapshots(rx));
        }

        let inner = self.state.inner.clone();
        let purge_every = Duration::from_secs(inner.config.rate_limit.purge_interval_secs.max(1));
        let mut purge_stop = shutdown.resubscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(purge_every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = inner.limiter.purge_expired() + inner.throttle.purge_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "Purged expired rate windows");
                        }
                    }
                    _ = purge_stop.recv() => break,
                }
            }
        });

        let reload_state = self.state.clone();
        let mut reload_stop = shutdown.resubscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = config_updates.recv() => match update {
                        Some(config) => reload_state.reload(&config),
                        None => break,
                    },
                    _ = reload_stop.recv() => break,
                }
            }
        });

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Default consumer for queued anomaly snapshots.
async fn log_anomaly_snapshots(mut rx: mpsc::Receiver<RequestSnapshot>) {
    while let Some(snapshot) = rx.recv().await {
        tracing::debug!(
            target: "anomaly",
            correlation_id = ?snapshot.correlation_id,
            origin = %snapshot.origin,
            method = %snapshot.method,
            endpoint = %snapshot.endpoint,
            subject = snapshot.subject.as_deref().unwrap_or("anonymous"),
            "Request snapshot"
        );
    }
}
