//! Service-to-service authentication.
//!
//! Callers inside the mesh present `x-service-name` and `x-service-token`.
//! The pair must match the configured registry; unknown services are
//! rejected rather than trusted.

use std::collections::BTreeMap;

use async_trait::async_trait;
use subtle::ConstantTimeEq;

use crate::config::ServiceAuthConfig;
use crate::pipeline::{ContextPatch, Guard, GuardError, GuardResult, GuardTier, RequestContext};

pub const SERVICE_NAME_HEADER: &str = "x-service-name";
pub const SERVICE_TOKEN_HEADER: &str = "x-service-token";

/// Mezo-tier guard for service credentials.
#[derive(Debug, Default)]
pub struct ServiceAuthGuard {
    services: BTreeMap<String, String>,
}

impl ServiceAuthGuard {
    pub fn new(config: &ServiceAuthConfig) -> Self {
        Self {
            services: config.services.clone(),
        }
    }

    fn verify(&self, name: &str, token: &str) -> bool {
        self.services
            .get(name)
            .is_some_and(|expected| secrets_match(expected, token))
    }
}

/// Compare a configured secret with a presented one in constant time.
pub fn secrets_match(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

#[async_trait]
impl Guard for ServiceAuthGuard {
    fn name(&self) -> &str {
        "service_auth"
    }

    fn tier(&self) -> GuardTier {
        GuardTier::Mezo
    }

    async fn check(&self, ctx: &RequestContext) -> GuardResult {
        let (Some(name), Some(token)) = (ctx.service_name(), ctx.service_token()) else {
            return Err(GuardError::MissingServiceAuth);
        };

        if !self.verify(name, token) {
            tracing::warn!(service = name, origin = %ctx.origin(), "Service credentials rejected");
            return Err(GuardError::InvalidServiceAuth);
        }

        Ok(ContextPatch::new().with_service(name))
    }
}
