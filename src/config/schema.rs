//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guardian.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::security::identity::Tier;
use crate::security::validation::InputSchema;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardianConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Per-tier adaptive rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Macro-tier per-origin throttle.
    pub throttle: ThrottleConfig,

    /// Circuit breaker thresholds per downstream service.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Response security headers.
    pub headers: HeaderPolicyConfig,

    /// Bearer credential table.
    pub auth: AuthConfig,

    /// Service-to-service credentials.
    pub service_auth: ServiceAuthConfig,

    /// Ownership allow-list.
    pub ownership: OwnershipConfig,

    /// Payload schemas for the full pipeline.
    pub validation: ValidationConfig,

    /// Security event delivery.
    pub events: EventConfig,

    /// Anomaly detection hook.
    pub anomaly: AnomalyConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole-request timeout in seconds, pipeline and downstream included.
    pub request_secs: u64,

    /// Per-call downstream timeout in seconds. Must be shorter than
    /// `request_secs` so the breaker sees the failure.
    pub downstream_secs: u64,
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn downstream(&self) -> Duration {
        Duration::from_secs(self.downstream_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            downstream_secs: 25,
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Adaptive rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Fixed window length in seconds.
    pub window_secs: u64,

    /// Request budget per tier per window.
    pub budgets: TierBudgets,

    /// How often expired windows are swept, in seconds.
    pub purge_interval_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 15 * 60,
            budgets: TierBudgets::default(),
            purge_interval_secs: 60,
        }
    }
}

/// Requests allowed per window, keyed by tier name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TierBudgets {
    pub enterprise: u64,
    pub premium: u64,
    pub standard: u64,
}

impl TierBudgets {
    pub fn budget_for(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Enterprise => self.enterprise,
            Tier::Premium => self.premium,
            Tier::Standard => self.standard,
        }
    }
}

impl Default for TierBudgets {
    fn default() -> Self {
        Self {
            enterprise: 1000,
            premium: 500,
            standard: 100,
        }
    }
}

/// Per-origin throttle (DDoS protection).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub enabled: bool,
    pub window_secs: u64,
    /// Requests per origin per window.
    pub max_requests: u64,
}

impl ThrottleConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 60,
            max_requests: 1000,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Settings for services without an explicit entry.
    pub default: BreakerSettings,

    /// Per-service overrides, keyed by service name.
    pub services: BTreeMap<String, BreakerSettings>,
}

impl CircuitBreakerConfig {
    pub fn settings_for(&self, service: &str) -> BreakerSettings {
        self.services.get(service).copied().unwrap_or(self.default)
    }
}

/// Thresholds for one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,

    /// Seconds to stay open before admitting a trial call.
    pub reset_timeout_secs: u64,
}

impl BreakerSettings {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 60,
        }
    }
}

/// Response security header policy.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HeaderPolicyConfig {
    pub enabled: bool,
    pub content_security_policy: CspDirectives,
    pub frame_options: String,
    pub referrer_policy: String,
    pub hsts_max_age_secs: u64,
    pub hsts_include_subdomains: bool,
    pub cross_origin_opener_policy: String,
    pub cross_origin_resource_policy: String,
    /// Not sent when unset.
    pub cross_origin_embedder_policy: Option<String>,
}

impl Default for HeaderPolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            content_security_policy: CspDirectives::default(),
            frame_options: "DENY".to_string(),
            referrer_policy: "no-referrer".to_string(),
            hsts_max_age_secs: 15_552_000,
            hsts_include_subdomains: true,
            cross_origin_opener_policy: "same-origin".to_string(),
            cross_origin_resource_policy: "same-origin".to_string(),
            cross_origin_embedder_policy: None,
        }
    }
}

/// Content-Security-Policy source lists.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CspDirectives {
    pub default_src: Vec<String>,
    pub script_src: Vec<String>,
    pub style_src: Vec<String>,
    pub img_src: Vec<String>,
    pub connect_src: Vec<String>,
    pub font_src: Vec<String>,
    pub object_src: Vec<String>,
    pub media_src: Vec<String>,
    pub frame_src: Vec<String>,
}

fn sources(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for CspDirectives {
    fn default() -> Self {
        Self {
            default_src: sources(&["'self'"]),
            script_src: sources(&["'self'", "'unsafe-inline'"]),
            style_src: sources(&["'self'", "'unsafe-inline'"]),
            img_src: sources(&["'self'", "data:", "https:"]),
            connect_src: sources(&["'self'"]),
            font_src: sources(&["'self'"]),
            object_src: sources(&["'none'"]),
            media_src: sources(&["'self'"]),
            frame_src: sources(&["'none'"]),
        }
    }
}

/// Static bearer credential table.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub tokens: Vec<StaticTokenConfig>,
}

/// One bearer credential and the identity it resolves to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticTokenConfig {
    pub token: String,
    pub subject: String,
    #[serde(default)]
    pub tier: Tier,
    /// Lifetime from process start; unlimited when absent.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

/// Service-to-service credentials.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceAuthConfig {
    /// Service name -> shared token.
    pub services: BTreeMap<String, String>,
}

/// Ownership allow-list configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OwnershipConfig {
    /// The single authorized owner address (hex). Every owner is rejected
    /// when unset.
    pub authorized_owner: Option<String>,

    /// Require a signature recovering to the authorized owner.
    pub require_signature: bool,
}

impl Default for OwnershipConfig {
    fn default() -> Self {
        Self {
            authorized_owner: None,
            require_signature: true,
        }
    }
}

/// Payload schemas keyed by endpoint path, e.g. `"/api/secure/ledger"`.
/// Endpoints without a schema accept any JSON body.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ValidationConfig {
    pub endpoints: BTreeMap<String, InputSchema>,
}

/// Security event delivery.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventConfig {
    /// Events buffered before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
        }
    }
}

/// Anomaly detection hook.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Queue request snapshots for background analysis.
    pub enabled: bool,
    pub queue_capacity: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            queue_capacity: 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

/// Placeholder admin key rejected by validation when admin is enabled.
pub const ADMIN_KEY_PLACEHOLDER: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: ADMIN_KEY_PLACEHOLDER.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: GuardianConfig = toml::from_str("").unwrap();
        assert_eq!(config.rate_limit.window_secs, 900);
        assert_eq!(config.rate_limit.budgets.standard, 100);
        assert_eq!(config.throttle.max_requests, 1000);
        assert!(config.ownership.require_signature);
    }

    #[test]
    fn test_parse_full_sections() {
        let raw = r#"
            [rate_limit]
            window_secs = 60

            [rate_limit.budgets]
            enterprise = 50
            premium = 20
            standard = 5

            [circuit_breaker.default]
            failure_threshold = 3
            reset_timeout_secs = 10

            [circuit_breaker.services.billing]
            failure_threshold = 1
            reset_timeout_secs = 2

            [[auth.tokens]]
            token = "t-1"
            subject = "acme"
            tier = "enterprise"

            [service_auth.services]
            ledger = "s3cret"

            [[validation.endpoints."/api/secure/ledger".fields]]
            name = "amount"
            kind = "number"
            required = true
        "#;
        let config: GuardianConfig = toml::from_str(raw).unwrap();

        assert_eq!(config.rate_limit.budgets.budget_for(Tier::Premium), 20);
        assert_eq!(config.circuit_breaker.settings_for("billing").failure_threshold, 1);
        assert_eq!(config.circuit_breaker.settings_for("other").failure_threshold, 3);
        assert_eq!(config.auth.tokens[0].tier, Tier::Enterprise);
        assert_eq!(config.auth.tokens[0].ttl_secs, None);
        assert_eq!(config.service_auth.services["ledger"], "s3cret");
        assert_eq!(config.validation.endpoints["/api/secure/ledger"].fields[0].name, "amount");
    }
}
