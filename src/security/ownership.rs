//! Ownership-signature check.
//!
//! The request payload declares an owner `address`. It must equal the single
//! configured authorized owner. When signatures are required, the payload
//! also carries `message` and `signature`, and the EIP-191 signer recovered
//! from them must be that same owner.

use std::net::IpAddr;

use alloy::primitives::{Address, Signature};
use async_trait::async_trait;
use serde_json::Value;

use crate::config::OwnershipConfig;
use crate::pipeline::{ContextPatch, Guard, GuardError, GuardResult, GuardTier, RequestContext};

/// Allow-list plus signature verification for a single owner.
#[derive(Debug, Clone)]
pub struct OwnershipCheck {
    authorized: Option<Address>,
    require_signature: bool,
}

impl OwnershipCheck {
    pub fn new(authorized: Option<Address>, require_signature: bool) -> Self {
        Self {
            authorized,
            require_signature,
        }
    }

    /// Build from config. An unparseable owner leaves the allow-list empty;
    /// validation reports it before this point.
    pub fn from_config(config: &OwnershipConfig) -> Self {
        let authorized = config
            .authorized_owner
            .as_deref()
            .and_then(|raw| raw.parse::<Address>().ok());
        Self::new(authorized, config.require_signature)
    }

    /// Check the declared owner against the allow-list.
    pub fn verify_ownership_signature(
        &self,
        origin: IpAddr,
        declared_owner: &str,
    ) -> Result<Address, GuardError> {
        let declared: Address = declared_owner
            .trim()
            .parse()
            .map_err(|_| GuardError::Validation("address must be a 20-byte hex string".into()))?;

        match self.authorized {
            Some(authorized) if authorized == declared => Ok(declared),
            _ => {
                tracing::warn!(origin = %origin, declared = %declared, "Unauthorized owner address");
                Err(GuardError::UnauthorizedOwner)
            }
        }
    }

    /// Require `signature` over `message` to recover to `owner`.
    pub fn verify_signature(&self, owner: Address, message: &str, signature: &str) -> Result<(), GuardError> {
        let signature: Signature = signature.trim().parse().map_err(|e| {
            tracing::debug!(error = %e, "Malformed ownership signature");
            GuardError::UnauthorizedOwner
        })?;

        let signer = signature.recover_address_from_msg(message.as_bytes()).map_err(|e| {
            tracing::debug!(error = %e, "Ownership signature recovery failed");
            GuardError::UnauthorizedOwner
        })?;

        if signer != owner {
            tracing::warn!(expected = %owner, recovered = %signer, "Ownership signature from wrong key");
            return Err(GuardError::UnauthorizedOwner);
        }
        Ok(())
    }

    pub fn requires_signature(&self) -> bool {
        self.require_signature
    }
}

fn string_field<'a>(payload: &'a Value, field: &str) -> Result<&'a str, GuardError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| GuardError::Validation(format!("{} is required", field)))
}

/// Micro-tier guard around [`OwnershipCheck`].
pub struct OwnershipGuard {
    check: OwnershipCheck,
}

impl OwnershipGuard {
    pub fn new(check: OwnershipCheck) -> Self {
        Self { check }
    }
}

#[async_trait]
impl Guard for OwnershipGuard {
    fn name(&self) -> &str {
        "ownership_signature"
    }

    fn tier(&self) -> GuardTier {
        GuardTier::Micro
    }

    async fn check(&self, ctx: &RequestContext) -> GuardResult {
        let payload = ctx
            .payload()
            .ok_or_else(|| GuardError::Validation("request body is required".into()))?;

        let declared = string_field(payload, "address")?;
        let owner = self.check.verify_ownership_signature(ctx.origin(), declared)?;

        if self.check.requires_signature() {
            let message = string_field(payload, "message")?;
            let signature = string_field(payload, "signature")?;
            self.check.verify_signature(owner, message, signature)?;
        }

        Ok(ContextPatch::new().with_owner(owner))
    }
}
