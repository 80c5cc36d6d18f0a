//! Pipeline assembly and execution.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::FutureExt;
use thiserror::Error;
use uuid::Uuid;

use crate::observability::events::{EventOutcome, SecurityEvent, SecurityEventLogger};
use crate::observability::metrics;
use crate::pipeline::context::{ContextPatch, RequestContext};
use crate::pipeline::guard::Guard;
use crate::pipeline::outcome::{PipelineOutcome, Rejection};
use crate::pipeline::types::{ErrorCode, GuardError, GuardTier};

/// Pipeline construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline '{0}' has no guards")]
    Empty(String),

    #[error("guard '{guard}' ({tier}) cannot run after a {previous} guard")]
    OutOfOrder {
        guard: String,
        tier: GuardTier,
        previous: GuardTier,
    },
}

/// An ordered, named list of guards.
#[derive(Clone)]
pub struct Pipeline {
    name: String,
    guards: Vec<Arc<dyn Guard>>,
}

impl Pipeline {
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder {
            name: name.into(),
            guards: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn guard_names(&self) -> Vec<&str> {
        self.guards.iter().map(|g| g.name()).collect()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("guards", &self.guard_names())
            .finish()
    }
}

/// Builds a [`Pipeline`], enforcing macro → mezo → micro → observation order.
pub struct PipelineBuilder {
    name: String,
    guards: Vec<Arc<dyn Guard>>,
}

impl PipelineBuilder {
    pub fn guard(mut self, guard: Arc<dyn Guard>) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        if self.guards.is_empty() {
            return Err(PipelineError::Empty(self.name));
        }
        for pair in self.guards.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.tier() < prev.tier() {
                return Err(PipelineError::OutOfOrder {
                    guard: next.name().to_string(),
                    tier: next.tier(),
                    previous: prev.tier(),
                });
            }
        }
        Ok(Pipeline {
            name: self.name,
            guards: self.guards,
        })
    }
}

/// Holds the named pipelines and runs requests through them.
pub struct PipelineComposer {
    pipelines: HashMap<String, Pipeline>,
    aliases: HashMap<String, String>,
    events: Arc<SecurityEventLogger>,
}

impl PipelineComposer {
    pub fn new(events: Arc<SecurityEventLogger>) -> Self {
        Self {
            pipelines: HashMap::new(),
            aliases: HashMap::new(),
            events,
        }
    }

    /// Register a pipeline under its name, replacing any previous one.
    pub fn register(&mut self, pipeline: Pipeline) -> &mut Self {
        tracing::debug!(pipeline = %pipeline.name, guards = ?pipeline.guard_names(), "Pipeline registered");
        self.pipelines.insert(pipeline.name.clone(), pipeline);
        self
    }

    /// Make `alias` run the pipeline registered as `target`.
    pub fn alias(&mut self, alias: impl Into<String>, target: impl Into<String>) -> &mut Self {
        self.aliases.insert(alias.into(), target.into());
        self
    }

    pub fn pipeline(&self, name: &str) -> Option<&Pipeline> {
        let name = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        self.pipelines.get(name)
    }

    /// Registered pipeline names, sorted.
    pub fn pipeline_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.pipelines.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn events(&self) -> &Arc<SecurityEventLogger> {
        &self.events
    }

    /// Run `ctx` through the pipeline called `name`.
    ///
    /// Guards run one at a time in order; the first rejection ends the run.
    /// A panicking guard is reported as `INTERNAL_ERROR`.
    pub async fn run(&self, name: &str, mut ctx: RequestContext) -> PipelineOutcome {
        let start = Instant::now();
        ctx.apply(ContextPatch::new().with_correlation_id(Uuid::new_v4()));
        let correlation_id = ctx
            .annotations()
            .correlation_id()
            .unwrap_or_else(Uuid::new_v4);

        let Some(pipeline) = self.pipeline(name) else {
            tracing::error!(correlation_id = %correlation_id, pipeline = name, "Unknown pipeline requested");
            let error = GuardError::Internal(format!("unknown pipeline '{}'", name));
            self.emit(&ctx, correlation_id, name, None, EventOutcome::Rejected, Some(error.code()));
            return PipelineOutcome::Rejected(Rejection::new(correlation_id, error));
        };

        for guard in &pipeline.guards {
            let result = match AssertUnwindSafe(guard.check(&ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(GuardError::Internal(panic_message(panic.as_ref()))),
            };

            match result {
                Ok(patch) => {
                    let conflicts = ctx.apply(patch);
                    if !conflicts.is_empty() {
                        tracing::warn!(
                            correlation_id = %correlation_id,
                            guard = guard.name(),
                            conflicts = ?conflicts,
                            "Guard tried to override existing annotations; ignored"
                        );
                    }
                    metrics::record_guard_decision(name, guard.name(), "allow");
                    self.emit(&ctx, correlation_id, name, Some(guard.name()), EventOutcome::Allowed, None);
                }
                Err(error) => {
                    if let GuardError::Internal(detail) = &error {
                        tracing::error!(
                            correlation_id = %correlation_id,
                            pipeline = name,
                            guard = guard.name(),
                            origin = %ctx.origin(),
                            endpoint = ctx.endpoint(),
                            detail = %detail,
                            "Guard fault"
                        );
                    } else {
                        tracing::debug!(
                            correlation_id = %correlation_id,
                            guard = guard.name(),
                            code = %error.code(),
                            "Guard rejected request"
                        );
                    }
                    metrics::record_guard_decision(name, guard.name(), "reject");
                    metrics::record_pipeline(name, "rejected", start);
                    self.emit(
                        &ctx,
                        correlation_id,
                        name,
                        Some(guard.name()),
                        EventOutcome::Rejected,
                        Some(error.code()),
                    );
                    return PipelineOutcome::Rejected(Rejection::new(correlation_id, error));
                }
            }
        }

        metrics::record_pipeline(name, "passed", start);
        self.emit(&ctx, correlation_id, name, None, EventOutcome::Passed, None);
        PipelineOutcome::Passed(ctx)
    }

    fn emit(
        &self,
        ctx: &RequestContext,
        correlation_id: Uuid,
        pipeline: &str,
        guard: Option<&str>,
        outcome: EventOutcome,
        error_code: Option<ErrorCode>,
    ) {
        self.events.record(SecurityEvent {
            correlation_id,
            timestamp: Utc::now(),
            origin: ctx.origin(),
            endpoint: ctx.endpoint().to_string(),
            pipeline: pipeline.to_string(),
            guard: guard.map(str::to_string),
            outcome,
            error_code,
            identity_subject: ctx.annotations().identity().map(|i| i.subject.clone()),
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("guard panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("guard panicked: {}", s)
    } else {
        "guard panicked".to_string()
    }
}
