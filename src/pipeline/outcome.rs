//! Final result of a pipeline run.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::pipeline::context::RequestContext;
use crate::pipeline::types::{ErrorCode, GuardError};

/// Outcome of running one request through a pipeline.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Every guard allowed; the context carries their annotations.
    Passed(RequestContext),
    /// A guard rejected; later guards did not run.
    Rejected(Rejection),
}

impl PipelineOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, PipelineOutcome::Passed(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            PipelineOutcome::Rejected(r) => Some(r),
            PipelineOutcome::Passed(_) => None,
        }
    }
}

/// A terminal rejection, ready to be rendered as the JSON envelope.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub correlation_id: Uuid,
    pub error: GuardError,
    pub timestamp: DateTime<Utc>,
}

impl Rejection {
    pub fn new(correlation_id: Uuid, error: GuardError) -> Self {
        Self {
            correlation_id,
            error,
            timestamp: Utc::now(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.error.code()
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.error.retry_after()
    }

    /// Public body. Internal errors never expose their detail.
    pub fn envelope(&self) -> RejectionEnvelope {
        RejectionEnvelope {
            error: self.error.to_string(),
            code: self.code(),
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// JSON body returned for every rejected request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RejectionEnvelope {
    pub error: String,
    pub code: ErrorCode,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let rejection = Rejection::new(Uuid::new_v4(), GuardError::MissingCredential);
        let json = serde_json::to_value(rejection.envelope()).unwrap();

        assert_eq!(json["error"], "Access denied - No token provided");
        assert_eq!(json["code"], "NO_TOKEN");
        let ts = json["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
        assert_eq!(json.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_internal_envelope_is_generic() {
        let rejection = Rejection::new(Uuid::new_v4(), GuardError::Internal("stack trace".into()));
        let envelope = rejection.envelope();
        assert_eq!(envelope.error, "Internal server error");
        assert_eq!(envelope.code, ErrorCode::InternalError);
    }
}
