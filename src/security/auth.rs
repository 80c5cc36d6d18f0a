//! Bearer credential authentication.
//!
//! # Responsibilities
//! - Read the credential, verify it through an injected verifier
//! - Turn verified claims into an [`Identity`] with a tier
//! - Attach identity and request fingerprint to the context
//!
//! # Design Decisions
//! - Verification failures collapse into INVALID_TOKEN; the reason is only
//!   logged, so callers cannot probe which check failed
//! - Expiry is re-checked here even if the verifier already did

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::config::AuthConfig;
use crate::pipeline::{ContextPatch, Guard, GuardError, GuardResult, GuardTier, RequestContext};
use crate::security::fingerprint::fingerprint;
use crate::security::identity::{Identity, Tier};

/// Claims a verifier extracts from a valid credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub subject: String,
    pub tier: Tier,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Why a verifier refused a credential. Internal only.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("unknown credential")]
    Unknown,
    #[error("credential expired")]
    Expired,
    #[error("malformed credential: {0}")]
    Malformed(String),
    #[error("bad signature")]
    BadSignature,
}

/// Verifies a raw credential and returns its claims.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<Claims, VerifyError>;
}

/// Verifier backed by the `[[auth.tokens]]` table.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Claims>,
}

impl StaticTokenVerifier {
    /// Build the table; lifetimes count from now.
    pub fn from_config(config: &AuthConfig) -> Self {
        let now = Utc::now();
        let tokens = config
            .tokens
            .iter()
            .map(|entry| {
                let expires_at = entry
                    .ttl_secs
                    .and_then(|ttl| i64::try_from(ttl).ok())
                    .and_then(Duration::try_seconds)
                    .and_then(|ttl| now.checked_add_signed(ttl))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                let claims = Claims {
                    subject: entry.subject.clone(),
                    tier: entry.tier,
                    issued_at: now,
                    expires_at,
                };
                (entry.token.clone(), claims)
            })
            .collect();
        Self { tokens }
    }

    pub fn insert(&mut self, token: impl Into<String>, claims: Claims) {
        self.tokens.insert(token.into(), claims);
    }
}

#[async_trait]
impl CredentialVerifier for StaticTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<Claims, VerifyError> {
        if credential.trim().is_empty() {
            return Err(VerifyError::Malformed("empty".into()));
        }
        let claims = self.tokens.get(credential).ok_or(VerifyError::Unknown)?;
        if Utc::now() >= claims.expires_at {
            return Err(VerifyError::Expired);
        }
        Ok(claims.clone())
    }
}

/// Turns credentials into identities.
pub struct TokenAuthenticator {
    verifier: Arc<dyn CredentialVerifier>,
}

impl TokenAuthenticator {
    pub fn new(verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self { verifier }
    }

    /// Authenticate a credential.
    ///
    /// `None` is NO_TOKEN; any verifier failure is INVALID_TOKEN.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<Identity, GuardError> {
        let credential = credential.ok_or(GuardError::MissingCredential)?;

        let claims = self.verifier.verify(credential).await.map_err(|reason| {
            tracing::debug!(reason = %reason, "Credential rejected");
            GuardError::InvalidCredential
        })?;

        let now = Utc::now();
        if now >= claims.expires_at {
            tracing::debug!(subject = %claims.subject, "Credential past expiry");
            return Err(GuardError::InvalidCredential);
        }

        Ok(Identity {
            subject: claims.subject,
            tier: claims.tier,
            issued_at: claims.issued_at,
            expires_at: claims.expires_at,
        })
    }

    /// Best-effort identity lookup that never rejects.
    pub async fn peek(&self, ctx: &RequestContext) -> Option<Identity> {
        match ctx.credential() {
            Some(credential) => self.authenticate(Some(credential)).await.ok(),
            None => None,
        }
    }
}

/// Micro-tier guard requiring a valid bearer credential.
pub struct TokenAuthGuard {
    authenticator: Arc<TokenAuthenticator>,
}

impl TokenAuthGuard {
    pub fn new(authenticator: Arc<TokenAuthenticator>) -> Self {
        Self { authenticator }
    }
}

#[async_trait]
impl Guard for TokenAuthGuard {
    fn name(&self) -> &str {
        "token_auth"
    }

    fn tier(&self) -> GuardTier {
        GuardTier::Micro
    }

    async fn check(&self, ctx: &RequestContext) -> GuardResult {
        // An earlier guard may already have verified this credential.
        let identity = match (ctx.credential(), ctx.annotations().identity()) {
            (Some(_), Some(known)) => known.clone(),
            (credential, _) => self.authenticator.authenticate(credential).await?,
        };

        let fp = fingerprint(ctx.origin(), ctx.client_signature());
        tracing::debug!(subject = %identity.subject, tier = %identity.tier, "Caller authenticated");

        Ok(ContextPatch::new().with_identity(identity).with_fingerprint(fp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticTokenConfig;
    use std::net::{IpAddr, Ipv4Addr};

    fn verifier() -> Arc<dyn CredentialVerifier> {
        let config = AuthConfig {
            tokens: vec![
                StaticTokenConfig {
                    token: "good".into(),
                    subject: "acme".into(),
                    tier: Tier::Enterprise,
                    ttl_secs: Some(3600),
                },
                StaticTokenConfig {
                    token: "stale".into(),
                    subject: "old".into(),
                    tier: Tier::Standard,
                    ttl_secs: Some(0),
                },
            ],
        };
        Arc::new(StaticTokenVerifier::from_config(&config))
    }

    fn ctx() -> RequestContext {
        RequestContext::new(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 4)), "/api/quick/echo")
            .with_client_signature("test-agent")
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let auth = TokenAuthenticator::new(verifier());
        assert_eq!(auth.authenticate(None).await.unwrap_err(), GuardError::MissingCredential);
    }

    #[tokio::test]
    async fn test_invalid_reasons_collapse() {
        let auth = TokenAuthenticator::new(verifier());
        for credential in ["nope", "stale", ""] {
            assert_eq!(
                auth.authenticate(Some(credential)).await.unwrap_err(),
                GuardError::InvalidCredential,
                "credential {:?}",
                credential
            );
        }
    }

    #[tokio::test]
    async fn test_guard_attaches_identity_and_fingerprint() {
        let guard = TokenAuthGuard::new(Arc::new(TokenAuthenticator::new(verifier())));
        let mut ctx = ctx().with_credential("good");

        let patch = guard.check(&ctx).await.unwrap();
        ctx.apply(patch);

        let identity = ctx.annotations().identity().unwrap();
        assert_eq!(identity.subject, "acme");
        assert_eq!(identity.tier, Tier::Enterprise);
        assert_eq!(
            ctx.annotations().fingerprint(),
            Some(&fingerprint(ctx.origin(), "test-agent"))
        );
    }

    #[tokio::test]
    async fn test_guard_without_credential_rejects() {
        let guard = TokenAuthGuard::new(Arc::new(TokenAuthenticator::new(verifier())));
        let err = guard.check(&ctx()).await.unwrap_err();
        assert_eq!(err.code().as_str(), "NO_TOKEN");
        assert_eq!(err.status().as_u16(), 401);
    }

    #[tokio::test]
    async fn test_peek_never_rejects() {
        let auth = TokenAuthenticator::new(verifier());
        assert!(auth.peek(&ctx()).await.is_none());
        assert!(auth.peek(&ctx().with_credential("bad")).await.is_none());
        assert_eq!(auth.peek(&ctx().with_credential("good")).await.unwrap().subject, "acme");
    }
}
