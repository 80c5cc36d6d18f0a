//! Request fingerprinting for abuse correlation.
//!
//! The fingerprint is a SHA-256 digest of the origin address followed by the
//! client signature. It is used as a rate-limit key for anonymous traffic
//! and as a log field. It is never an authorization input.

use std::fmt;
use std::net::IpAddr;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the fingerprint for an origin and client signature.
pub fn fingerprint(origin: IpAddr, client_signature: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(origin.to_string().as_bytes());
    hasher.update(client_signature.as_bytes());
    Fingerprint(hex::encode(hasher.finalize()))
}
