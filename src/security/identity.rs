//! Caller identity and tier classification.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller classification driving rate-limit budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Enterprise,
    Premium,
    #[default]
    Standard,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Enterprise => "enterprise",
            Tier::Premium => "premium",
            Tier::Standard => "standard",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "enterprise" => Ok(Tier::Enterprise),
            "premium" => Ok(Tier::Premium),
            "standard" => Ok(Tier::Standard),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

/// Authenticated caller, produced from verified claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject: String,
    pub tier: Tier,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Identity {
    /// True once `now` has reached the expiry instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_tier_parse() {
        assert_eq!("Enterprise".parse::<Tier>().unwrap(), Tier::Enterprise);
        assert_eq!("premium".parse::<Tier>().unwrap(), Tier::Premium);
        assert!("gold".parse::<Tier>().is_err());
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let identity = Identity {
            subject: "alice".into(),
            tier: Tier::Premium,
            issued_at: now - Duration::minutes(5),
            expires_at: now + Duration::minutes(5),
        };

        assert!(!identity.is_expired_at(now));
        assert!(identity.is_expired_at(now + Duration::minutes(5)));
    }
}
