//! Per-request context shared by every guard in a pipeline run.
//!
//! Inbound facts are fixed at construction. Guards contribute
//! [`ContextPatch`]es which are merged into the [`Annotations`] with
//! first-writer-wins semantics: a value, once set, is never replaced or
//! removed by a later guard.

use std::collections::BTreeMap;
use std::net::IpAddr;

use alloy::primitives::Address;
use serde_json::Value;
use uuid::Uuid;

use crate::security::fingerprint::Fingerprint;
use crate::security::identity::Identity;

/// Inbound request facts plus guard annotations.
#[derive(Debug, Clone)]
pub struct RequestContext {
    origin: IpAddr,
    client_signature: String,
    credential: Option<String>,
    service_name: Option<String>,
    service_token: Option<String>,
    method: String,
    endpoint: String,
    payload: Option<Value>,
    annotations: Annotations,
}

impl RequestContext {
    /// Create a context for a request from `origin` targeting `endpoint`.
    pub fn new(origin: IpAddr, endpoint: impl Into<String>) -> Self {
        Self {
            origin,
            client_signature: String::new(),
            credential: None,
            service_name: None,
            service_token: None,
            method: "GET".to_string(),
            endpoint: endpoint.into(),
            payload: None,
            annotations: Annotations::default(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Client signature, typically the `User-Agent` header.
    pub fn with_client_signature(mut self, signature: impl Into<String>) -> Self {
        self.client_signature = signature.into();
        self
    }

    /// Raw bearer credential (without the `Bearer ` prefix).
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_service_credentials(
        mut self,
        name: Option<String>,
        token: Option<String>,
    ) -> Self {
        self.service_name = name;
        self.service_token = token;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn origin(&self) -> IpAddr {
        self.origin
    }

    pub fn client_signature(&self) -> &str {
        &self.client_signature
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    pub fn service_token(&self) -> Option<&str> {
        self.service_token.as_deref()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    /// Merge a patch into the annotations.
    ///
    /// Returns the names of annotations the patch tried to change; those
    /// keep their existing value.
    pub fn apply(&mut self, patch: ContextPatch) -> Vec<String> {
        self.annotations.merge(patch.0)
    }
}

/// Values guards attach to a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    correlation_id: Option<Uuid>,
    identity: Option<Identity>,
    fingerprint: Option<Fingerprint>,
    service: Option<String>,
    owner: Option<Address>,
    labels: BTreeMap<String, String>,
}

impl Annotations {
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    /// Authenticated calling service (service-mesh auth).
    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    /// Owner address that passed the ownership check.
    pub fn owner(&self) -> Option<Address> {
        self.owner
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    fn merge(&mut self, patch: Annotations) -> Vec<String> {
        let mut conflicts = Vec::new();

        merge_slot(&mut self.correlation_id, patch.correlation_id, "correlation_id", &mut conflicts);
        merge_slot(&mut self.identity, patch.identity, "identity", &mut conflicts);
        merge_slot(&mut self.fingerprint, patch.fingerprint, "fingerprint", &mut conflicts);
        merge_slot(&mut self.service, patch.service, "service", &mut conflicts);
        merge_slot(&mut self.owner, patch.owner, "owner", &mut conflicts);

        for (key, value) in patch.labels {
            match self.labels.get(&key) {
                Some(existing) if *existing != value => conflicts.push(format!("label:{}", key)),
                Some(_) => {}
                None => {
                    self.labels.insert(key, value);
                }
            }
        }

        conflicts
    }
}

fn merge_slot<T: PartialEq>(
    slot: &mut Option<T>,
    incoming: Option<T>,
    name: &str,
    conflicts: &mut Vec<String>,
) {
    let Some(value) = incoming else { return };
    match slot {
        Some(existing) if *existing != value => conflicts.push(name.to_string()),
        Some(_) => {}
        None => *slot = Some(value),
    }
}

/// Annotations a guard wants added to the context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextPatch(Annotations);

impl ContextPatch {
    /// Empty patch: allow without annotating.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0 == Annotations::default()
    }

    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.0.correlation_id = Some(id);
        self
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.0.identity = Some(identity);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.0.fingerprint = Some(fingerprint);
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.0.service = Some(service.into());
        self
    }

    pub fn with_owner(mut self, owner: Address) -> Self {
        self.0.owner = Some(owner);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.labels.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ctx() -> RequestContext {
        RequestContext::new(IpAddr::V4(Ipv4Addr::LOCALHOST), "/api/test")
    }

    #[test]
    fn test_patch_adds_annotations() {
        let mut ctx = ctx();
        let conflicts = ctx.apply(
            ContextPatch::new()
                .with_service("billing")
                .with_label("stage", "mezo"),
        );

        assert!(conflicts.is_empty());
        assert_eq!(ctx.annotations().service(), Some("billing"));
        assert_eq!(ctx.annotations().label("stage"), Some("mezo"));
    }

    #[test]
    fn test_later_patch_cannot_override() {
        let mut ctx = ctx();
        ctx.apply(ContextPatch::new().with_service("billing").with_label("k", "v1"));

        let conflicts = ctx.apply(ContextPatch::new().with_service("intruder").with_label("k", "v2"));

        assert_eq!(conflicts, vec!["service".to_string(), "label:k".to_string()]);
        assert_eq!(ctx.annotations().service(), Some("billing"));
        assert_eq!(ctx.annotations().label("k"), Some("v1"));
    }

    #[test]
    fn test_identical_value_is_not_conflict() {
        let mut ctx = ctx();
        let id = Uuid::new_v4();
        ctx.apply(ContextPatch::new().with_correlation_id(id));
        let conflicts = ctx.apply(ContextPatch::new().with_correlation_id(id));

        assert!(conflicts.is_empty());
        assert_eq!(ctx.annotations().correlation_id(), Some(id));
    }

    #[test]
    fn test_empty_patch() {
        assert!(ContextPatch::new().is_empty());
        assert!(!ContextPatch::new().with_label("a", "b").is_empty());
    }
}
