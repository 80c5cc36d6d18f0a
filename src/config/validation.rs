//! Configuration validation.
//!
//! Serde handles syntax; this pass checks value ranges and cross-field
//! rules. Every problem is collected, not just the first.

use std::collections::HashSet;

use alloy::primitives::Address;
use thiserror::Error;

use crate::config::schema::{GuardianConfig, ADMIN_KEY_PLACEHOLDER};
use crate::security::headers::SecurityHeaderPolicy;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GuardianConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "must be a socket address"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.timeouts.downstream_secs == 0 || config.timeouts.downstream_secs >= config.timeouts.request_secs {
        errors.push(ValidationError::new(
            "timeouts.downstream_secs",
            "must be greater than 0 and less than timeouts.request_secs",
        ));
    }
    if config.limits.max_body_size == 0 {
        errors.push(ValidationError::new("limits.max_body_size", "must be greater than 0"));
    }

    let rl = &config.rate_limit;
    if rl.window_secs == 0 {
        errors.push(ValidationError::new("rate_limit.window_secs", "must be greater than 0"));
    }
    for (tier, budget) in [
        ("enterprise", rl.budgets.enterprise),
        ("premium", rl.budgets.premium),
        ("standard", rl.budgets.standard),
    ] {
        if budget == 0 {
            errors.push(ValidationError::new(
                format!("rate_limit.budgets.{}", tier),
                "must be greater than 0",
            ));
        }
    }

    if config.throttle.enabled && (config.throttle.window_secs == 0 || config.throttle.max_requests == 0) {
        errors.push(ValidationError::new(
            "throttle",
            "window_secs and max_requests must be greater than 0",
        ));
    }

    let breakers = std::iter::once(("default".to_string(), config.circuit_breaker.default)).chain(
        config
            .circuit_breaker
            .services
            .iter()
            .map(|(name, s)| (format!("services.{}", name), *s)),
    );
    for (name, settings) in breakers {
        if settings.failure_threshold == 0 {
            errors.push(ValidationError::new(
                format!("circuit_breaker.{}.failure_threshold", name),
                "must be greater than 0",
            ));
        }
    }

    if let Err(e) = SecurityHeaderPolicy::new(&config.headers) {
        errors.push(ValidationError::new("headers", e.to_string()));
    }

    let mut seen = HashSet::new();
    for (i, entry) in config.auth.tokens.iter().enumerate() {
        if entry.token.is_empty() || entry.subject.is_empty() {
            errors.push(ValidationError::new(
                format!("auth.tokens[{}]", i),
                "token and subject must not be empty",
            ));
        }
        if !seen.insert(entry.token.as_str()) {
            errors.push(ValidationError::new(format!("auth.tokens[{}]", i), "duplicate token"));
        }
    }

    for (name, token) in &config.service_auth.services {
        if token.is_empty() {
            errors.push(ValidationError::new(
                format!("service_auth.services.{}", name),
                "token must not be empty",
            ));
        }
    }

    if let Some(owner) = &config.ownership.authorized_owner {
        if owner.parse::<Address>().is_err() {
            errors.push(ValidationError::new(
                "ownership.authorized_owner",
                "must be a 20-byte hex address",
            ));
        }
    }

    for (endpoint, schema) in &config.validation.endpoints {
        if !endpoint.starts_with('/') {
            errors.push(ValidationError::new(
                format!("validation.endpoints.{}", endpoint),
                "endpoint must be a path starting with '/'",
            ));
        }
        if schema.fields.iter().any(|rule| rule.name.is_empty()) {
            errors.push(ValidationError::new(
                format!("validation.endpoints.{}", endpoint),
                "field names must not be empty",
            ));
        }
    }

    if config.events.queue_capacity == 0 {
        errors.push(ValidationError::new("events.queue_capacity", "must be greater than 0"));
    }
    if config.anomaly.enabled && config.anomaly.queue_capacity == 0 {
        errors.push(ValidationError::new("anomaly.queue_capacity", "must be greater than 0"));
    }

    if config.admin.enabled && (config.admin.api_key.is_empty() || config.admin.api_key == ADMIN_KEY_PLACEHOLDER) {
        errors.push(ValidationError::new("admin.api_key", "must be set when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::StaticTokenConfig;
    use crate::security::identity::Tier;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GuardianConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GuardianConfig::default();
        config.rate_limit.window_secs = 0;
        config.rate_limit.budgets.premium = 0;
        config.circuit_breaker.default.failure_threshold = 0;
        config.ownership.authorized_owner = Some("not-an-address".into());
        config.admin.enabled = true;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();

        assert!(fields.contains(&"rate_limit.window_secs"));
        assert!(fields.contains(&"rate_limit.budgets.premium"));
        assert!(fields.contains(&"circuit_breaker.default.failure_threshold"));
        assert!(fields.contains(&"ownership.authorized_owner"));
        assert!(fields.contains(&"admin.api_key"));
    }

    #[test]
    fn test_duplicate_tokens_rejected() {
        let mut config = GuardianConfig::default();
        let entry = StaticTokenConfig {
            token: "same".into(),
            subject: "a".into(),
            tier: Tier::Standard,
            ttl_secs: None,
        };
        config.auth.tokens = vec![entry.clone(), entry];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "duplicate token");
    }

    #[test]
    fn test_downstream_timeout_must_be_shorter_than_request() {
        let mut config = GuardianConfig::default();
        config.timeouts.request_secs = 10;
        config.timeouts.downstream_secs = 10;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "timeouts.downstream_secs");
    }

    #[test]
    fn test_invalid_header_value_rejected() {
        let mut config = GuardianConfig::default();
        config.headers.frame_options = "DENY\n".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "headers");
    }
}
