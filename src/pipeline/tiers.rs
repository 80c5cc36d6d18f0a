//! Guards grouped by enforcement tier, and the two standard compositions.

use std::sync::Arc;

use crate::pipeline::composer::{Pipeline, PipelineError};
use crate::pipeline::guard::Guard;

/// Name of the minimal pipeline.
pub const QUICK_PIPELINE: &str = "quick";
/// Name of the comprehensive pipeline.
pub const FULL_PIPELINE: &str = "full";

/// Edge / infrastructure guards.
#[derive(Clone)]
pub struct MacroGuards {
    pub security_headers: Arc<dyn Guard>,
    pub global_throttle: Arc<dyn Guard>,
}

/// Service-mesh guards.
#[derive(Clone)]
pub struct MezoGuards {
    pub rate_limit: Arc<dyn Guard>,
    pub service_auth: Arc<dyn Guard>,
}

/// Per-endpoint guards.
#[derive(Clone)]
pub struct MicroGuards {
    pub token_auth: Arc<dyn Guard>,
    pub input_validation: Arc<dyn Guard>,
    pub ownership: Arc<dyn Guard>,
}

/// Hooks that observe an already-authorized request.
#[derive(Clone)]
pub struct ObservationGuards {
    pub request_log: Arc<dyn Guard>,
    pub anomaly: Arc<dyn Guard>,
}

/// Every guard the standard pipelines are composed from.
#[derive(Clone)]
pub struct GuardSet {
    pub macro_tier: MacroGuards,
    pub mezo_tier: MezoGuards,
    pub micro_tier: MicroGuards,
    pub observation: ObservationGuards,
}

impl GuardSet {
    /// headers → rate limit → token auth
    pub fn quick_pipeline(&self) -> Result<Pipeline, PipelineError> {
        Pipeline::builder(QUICK_PIPELINE)
            .guard(self.macro_tier.security_headers.clone())
            .guard(self.mezo_tier.rate_limit.clone())
            .guard(self.micro_tier.token_auth.clone())
            .build()
    }

    /// headers → throttle → rate limit → service auth → token auth →
    /// input validation → ownership → request log → anomaly hook
    pub fn full_pipeline(&self) -> Result<Pipeline, PipelineError> {
        Pipeline::builder(FULL_PIPELINE)
            .guard(self.macro_tier.security_headers.clone())
            .guard(self.macro_tier.global_throttle.clone())
            .guard(self.mezo_tier.rate_limit.clone())
            .guard(self.mezo_tier.service_auth.clone())
            .guard(self.micro_tier.token_auth.clone())
            .guard(self.micro_tier.input_validation.clone())
            .guard(self.micro_tier.ownership.clone())
            .guard(self.observation.request_log.clone())
            .guard(self.observation.anomaly.clone())
            .build()
    }
}
