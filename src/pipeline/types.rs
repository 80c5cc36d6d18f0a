//! Guard-level types and error definitions.

use std::fmt;
use std::time::Duration;

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::pipeline::context::ContextPatch;

/// Result of a single guard: `Ok` allows (with annotations to merge),
/// `Err` rejects and terminates the pipeline.
pub type GuardResult = Result<ContextPatch, GuardError>;

/// Enforcement tier a guard belongs to.
///
/// Pipelines execute tiers in declaration order; observation guards
/// (request logging, anomaly hooks) always run last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardTier {
    /// Edge / infrastructure guards.
    Macro,
    /// Service-mesh guards.
    Mezo,
    /// Per-endpoint guards.
    Micro,
    /// Post-decision observation hooks.
    Observation,
}

impl fmt::Display for GuardTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GuardTier::Macro => "macro",
            GuardTier::Mezo => "mezo",
            GuardTier::Micro => "micro",
            GuardTier::Observation => "observation",
        };
        f.write_str(s)
    }
}

/// Wire-level error codes carried in the rejection envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoToken,
    InvalidToken,
    UnauthorizedWallet,
    ValidationError,
    NoServiceAuth,
    InvalidServiceAuth,
    RateLimitExceeded,
    CircuitBreakerOpen,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoToken => "NO_TOKEN",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::UnauthorizedWallet => "UNAUTHORIZED_WALLET",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::NoServiceAuth => "NO_SERVICE_AUTH",
            ErrorCode::InvalidServiceAuth => "INVALID_SERVICE_AUTH",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// HTTP status paired with this code.
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::NoToken | ErrorCode::NoServiceAuth => StatusCode::UNAUTHORIZED,
            ErrorCode::InvalidToken
            | ErrorCode::UnauthorizedWallet
            | ErrorCode::InvalidServiceAuth => StatusCode::FORBIDDEN,
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::CircuitBreakerOpen => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    Authorization,
    Validation,
    RateLimit,
    CircuitOpen,
    Internal,
}

/// Errors a guard can reject a request with.
///
/// The `Display` text of each variant is the public message placed in the
/// rejection envelope, so it never carries internal detail.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GuardError {
    /// No bearer credential on the request.
    #[error("Access denied - No token provided")]
    MissingCredential,

    /// Verifier rejected the credential. Sub-reasons stay internal.
    #[error("Invalid token")]
    InvalidCredential,

    /// Declared owner is not the authorized one, or its signature failed.
    #[error("Unauthorized wallet address")]
    UnauthorizedOwner,

    /// Service-mesh headers absent.
    #[error("Service authentication required")]
    MissingServiceAuth,

    /// Service-mesh credentials did not match the registry.
    #[error("Invalid service credentials")]
    InvalidServiceAuth,

    /// Payload failed validation.
    #[error("Invalid input data: {0}")]
    Validation(String),

    /// Budget exhausted for the current window.
    #[error("Too many requests")]
    RateLimited { retry_after: Duration },

    /// Downstream service presumed unhealthy.
    #[error("Service temporarily unavailable")]
    CircuitOpen { service: String },

    /// Unexpected fault. The detail is logged, never returned.
    #[error("Internal server error")]
    Internal(String),
}

impl GuardError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GuardError::MissingCredential => ErrorCode::NoToken,
            GuardError::InvalidCredential => ErrorCode::InvalidToken,
            GuardError::UnauthorizedOwner => ErrorCode::UnauthorizedWallet,
            GuardError::MissingServiceAuth => ErrorCode::NoServiceAuth,
            GuardError::InvalidServiceAuth => ErrorCode::InvalidServiceAuth,
            GuardError::Validation(_) => ErrorCode::ValidationError,
            GuardError::RateLimited { .. } => ErrorCode::RateLimitExceeded,
            GuardError::CircuitOpen { .. } => ErrorCode::CircuitBreakerOpen,
            GuardError::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.code().status()
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GuardError::MissingCredential | GuardError::InvalidCredential => {
                ErrorKind::Authentication
            }
            GuardError::UnauthorizedOwner
            | GuardError::MissingServiceAuth
            | GuardError::InvalidServiceAuth => ErrorKind::Authorization,
            GuardError::Validation(_) => ErrorKind::Validation,
            GuardError::RateLimited { .. } => ErrorKind::RateLimit,
            GuardError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            GuardError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Retry hint for rate-limit rejections.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GuardError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_table() {
        let cases = [
            (GuardError::MissingCredential, "NO_TOKEN", 401),
            (GuardError::InvalidCredential, "INVALID_TOKEN", 403),
            (GuardError::UnauthorizedOwner, "UNAUTHORIZED_WALLET", 403),
            (GuardError::Validation("x".into()), "VALIDATION_ERROR", 400),
            (GuardError::MissingServiceAuth, "NO_SERVICE_AUTH", 401),
            (GuardError::InvalidServiceAuth, "INVALID_SERVICE_AUTH", 403),
            (
                GuardError::RateLimited { retry_after: Duration::from_secs(1) },
                "RATE_LIMIT_EXCEEDED",
                429,
            ),
            (
                GuardError::CircuitOpen { service: "x".into() },
                "CIRCUIT_BREAKER_OPEN",
                503,
            ),
            (GuardError::Internal("boom".into()), "INTERNAL_ERROR", 500),
        ];

        for (err, code, status) in cases {
            assert_eq!(err.code().as_str(), code);
            assert_eq!(err.status().as_u16(), status);
        }
    }

    #[test]
    fn test_internal_message_hides_detail() {
        let err = GuardError::Internal("db password leaked in stack".into());
        assert_eq!(err.to_string(), "Internal server error");
    }

    #[test]
    fn test_tier_ordering() {
        assert!(GuardTier::Macro < GuardTier::Mezo);
        assert!(GuardTier::Mezo < GuardTier::Micro);
        assert!(GuardTier::Micro < GuardTier::Observation);
    }
}
