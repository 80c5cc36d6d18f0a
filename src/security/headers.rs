//! Security response headers.
//!
//! # Responsibilities
//! - Compile the header policy once from configuration
//! - Attach the same header set to every response, rejections included
//! - Expose a macro-tier guard marking requests as header-protected
//!
//! # Design Decisions
//! - No request-specific branching: output depends on configuration only
//! - Header order is fixed, so identical configs give byte-identical output
//! - Invalid header values are a configuration error, caught at load time

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue};
use thiserror::Error;

use crate::config::schema::{CspDirectives, HeaderPolicyConfig};
use crate::pipeline::{ContextPatch, Guard, GuardResult, GuardTier, RequestContext};

/// Header policy compilation failure.
#[derive(Debug, Error)]
#[error("invalid value for header {header}: {source}")]
pub struct HeaderPolicyError {
    header: &'static str,
    #[source]
    source: InvalidHeaderValue,
}

/// Compiled, ordered set of response headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityHeaderPolicy {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaderPolicy {
    pub fn new(config: &HeaderPolicyConfig) -> Result<Self, HeaderPolicyError> {
        if !config.enabled {
            return Ok(Self::default());
        }

        let mut hsts = format!("max-age={}", config.hsts_max_age_secs);
        if config.hsts_include_subdomains {
            hsts.push_str("; includeSubDomains");
        }

        let mut raw: Vec<(HeaderName, &'static str, String)> = vec![
            (
                header::CONTENT_SECURITY_POLICY,
                "content-security-policy",
                render_csp(&config.content_security_policy),
            ),
            (
                HeaderName::from_static("cross-origin-opener-policy"),
                "cross-origin-opener-policy",
                config.cross_origin_opener_policy.clone(),
            ),
            (
                HeaderName::from_static("cross-origin-resource-policy"),
                "cross-origin-resource-policy",
                config.cross_origin_resource_policy.clone(),
            ),
        ];
        if let Some(coep) = &config.cross_origin_embedder_policy {
            raw.push((
                HeaderName::from_static("cross-origin-embedder-policy"),
                "cross-origin-embedder-policy",
                coep.clone(),
            ));
        }
        raw.extend([
            (HeaderName::from_static("origin-agent-cluster"), "origin-agent-cluster", "?1".to_string()),
            (header::REFERRER_POLICY, "referrer-policy", config.referrer_policy.clone()),
            (header::STRICT_TRANSPORT_SECURITY, "strict-transport-security", hsts),
            (header::X_CONTENT_TYPE_OPTIONS, "x-content-type-options", "nosniff".to_string()),
            (header::X_DNS_PREFETCH_CONTROL, "x-dns-prefetch-control", "off".to_string()),
            (HeaderName::from_static("x-download-options"), "x-download-options", "noopen".to_string()),
            (header::X_FRAME_OPTIONS, "x-frame-options", config.frame_options.clone()),
            (
                HeaderName::from_static("x-permitted-cross-domain-policies"),
                "x-permitted-cross-domain-policies",
                "none".to_string(),
            ),
            (header::X_XSS_PROTECTION, "x-xss-protection", "0".to_string()),
        ]);

        let headers = raw
            .into_iter()
            .map(|(name, label, value)| {
                HeaderValue::from_str(&value)
                    .map(|v| (name, v))
                    .map_err(|source| HeaderPolicyError { header: label, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { headers })
    }

    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    /// Insert every policy header, replacing values set by handlers.
    pub fn apply(&self, target: &mut HeaderMap) {
        for (name, value) in &self.headers {
            target.insert(name.clone(), value.clone());
        }
    }
}

fn render_csp(csp: &CspDirectives) -> String {
    let directives = [
        ("default-src", &csp.default_src),
        ("script-src", &csp.script_src),
        ("style-src", &csp.style_src),
        ("img-src", &csp.img_src),
        ("connect-src", &csp.connect_src),
        ("font-src", &csp.font_src),
        ("object-src", &csp.object_src),
        ("media-src", &csp.media_src),
        ("frame-src", &csp.frame_src),
    ];

    directives
        .iter()
        .filter(|(_, sources)| !sources.is_empty())
        .map(|(name, sources)| format!("{} {}", name, sources.join(" ")))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Macro-tier guard for the header policy.
///
/// Headers are written by the HTTP layer on the way out; the guard only
/// records that the request is covered.
pub struct SecurityHeadersGuard {
    policy: Arc<ArcSwap<SecurityHeaderPolicy>>,
}

impl SecurityHeadersGuard {
    pub fn new(policy: Arc<ArcSwap<SecurityHeaderPolicy>>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Guard for SecurityHeadersGuard {
    fn name(&self) -> &str {
        "security_headers"
    }

    fn tier(&self) -> GuardTier {
        GuardTier::Macro
    }

    async fn check(&self, _ctx: &RequestContext) -> GuardResult {
        let count = self.policy.load().headers().len();
        Ok(ContextPatch::new().with_label("security_headers", count.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_headers() {
        let policy = SecurityHeaderPolicy::new(&HeaderPolicyConfig::default()).unwrap();
        let mut map = HeaderMap::new();
        policy.apply(&mut map);

        assert_eq!(
            map.get(header::CONTENT_SECURITY_POLICY).unwrap(),
            "default-src 'self'; script-src 'self' 'unsafe-inline'; style-src 'self' 'unsafe-inline'; \
             img-src 'self' data: https:; connect-src 'self'; font-src 'self'; object-src 'none'; \
             media-src 'self'; frame-src 'none'"
        );
        assert_eq!(map.get(header::X_FRAME_OPTIONS).unwrap(), "DENY");
        assert_eq!(map.get(header::X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
        assert_eq!(
            map.get(header::STRICT_TRANSPORT_SECURITY).unwrap(),
            "max-age=15552000; includeSubDomains"
        );
        assert!(map.get("cross-origin-embedder-policy").is_none());
    }

    #[test]
    fn test_policy_is_idempotent() {
        let config = HeaderPolicyConfig::default();
        let a = SecurityHeaderPolicy::new(&config).unwrap();
        let b = SecurityHeaderPolicy::new(&config).unwrap();
        assert_eq!(a, b);

        let mut first = HeaderMap::new();
        a.apply(&mut first);
        let mut twice = first.clone();
        a.apply(&mut twice);
        assert_eq!(first, twice);
    }

    #[test]
    fn test_embedder_policy_opt_in() {
        let config = HeaderPolicyConfig {
            cross_origin_embedder_policy: Some("require-corp".into()),
            ..Default::default()
        };
        let policy = SecurityHeaderPolicy::new(&config).unwrap();
        assert!(policy
            .headers()
            .iter()
            .any(|(n, v)| n == "cross-origin-embedder-policy" && v == "require-corp"));
    }

    #[test]
    fn test_disabled_policy_is_empty() {
        let config = HeaderPolicyConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(SecurityHeaderPolicy::new(&config).unwrap().headers().is_empty());
    }

    #[test]
    fn test_invalid_value() {
        let config = HeaderPolicyConfig {
            referrer_policy: "bad\r\nvalue".into(),
            ..Default::default()
        };
        let err = SecurityHeaderPolicy::new(&config).unwrap_err();
        assert!(err.to_string().contains("referrer-policy"));
    }
}
