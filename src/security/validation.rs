//! Payload validation.
//!
//! A small declarative schema over the JSON body: which top-level fields
//! must be present, their JSON type, and an optional length cap for
//! strings and arrays. Schemas are attached per endpoint path. All
//! violations are reported together.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ValidationConfig;
use crate::pipeline::{ContextPatch, Guard, GuardError, GuardResult, GuardTier, RequestContext};

/// JSON type a field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Bool,
    Object,
    Array,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Bool => "bool",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
        }
    }
}

/// Rule for one top-level field.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FieldRule {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_len: Option<usize>,
}

impl FieldRule {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            max_len: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    pub fn max_len(mut self, max: usize) -> Self {
        self.max_len = Some(max);
        self
    }
}

/// Set of field rules for a request body.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InputSchema {
    pub fields: Vec<FieldRule>,
}

impl InputSchema {
    pub fn new(fields: Vec<FieldRule>) -> Self {
        Self { fields }
    }

    /// Every violation, in rule order.
    pub fn violations(&self, payload: Option<&Value>) -> Vec<String> {
        let object = match payload {
            Some(Value::Object(map)) => Some(map),
            Some(_) => return vec!["body must be a JSON object".to_string()],
            None => None,
        };

        let mut problems = Vec::new();
        for rule in &self.fields {
            match object.and_then(|map| map.get(&rule.name)) {
                None | Some(Value::Null) => {
                    if rule.required {
                        problems.push(format!("'{}' is required", rule.name));
                    }
                }
                Some(value) if !rule.kind.matches(value) => {
                    problems.push(format!("'{}' must be of type {}", rule.name, rule.kind.as_str()));
                }
                Some(value) => {
                    let len = match value {
                        Value::String(s) => Some(s.chars().count()),
                        Value::Array(items) => Some(items.len()),
                        _ => None,
                    };
                    if let (Some(len), Some(max)) = (len, rule.max_len) {
                        if len > max {
                            problems.push(format!("'{}' exceeds maximum length {}", rule.name, max));
                        }
                    }
                }
            }
        }
        problems
    }
}

/// Micro-tier guard rejecting bodies that fail their endpoint's
/// [`InputSchema`].
#[derive(Debug, Default)]
pub struct InputValidationGuard {
    schemas: BTreeMap<String, InputSchema>,
}

impl InputValidationGuard {
    pub fn new(schemas: BTreeMap<String, InputSchema>) -> Self {
        Self { schemas }
    }

    pub fn from_config(config: &ValidationConfig) -> Self {
        Self::new(config.endpoints.clone())
    }

    /// Attach `schema` to `endpoint`.
    pub fn with_schema(mut self, endpoint: impl Into<String>, schema: InputSchema) -> Self {
        self.schemas.insert(endpoint.into(), schema);
        self
    }
}

#[async_trait]
impl Guard for InputValidationGuard {
    fn name(&self) -> &str {
        "input_validation"
    }

    fn tier(&self) -> GuardTier {
        GuardTier::Micro
    }

    async fn check(&self, ctx: &RequestContext) -> GuardResult {
        let Some(schema) = self.schemas.get(ctx.endpoint()) else {
            return Ok(ContextPatch::new());
        };

        let problems = schema.violations(ctx.payload());
        if problems.is_empty() {
            Ok(ContextPatch::new())
        } else {
            tracing::debug!(endpoint = ctx.endpoint(), problems = ?problems, "Payload failed validation");
            Err(GuardError::Validation(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::{IpAddr, Ipv4Addr};

    fn schema() -> InputSchema {
        InputSchema::new(vec![
            FieldRule::required("command", FieldKind::String).max_len(16),
            FieldRule::optional("priority", FieldKind::String),
            FieldRule::optional("tags", FieldKind::Array).max_len(2),
        ])
    }

    fn guard() -> InputValidationGuard {
        InputValidationGuard::default().with_schema("/api/secure/ai", schema())
    }

    fn ctx_at(endpoint: &str, payload: Option<Value>) -> RequestContext {
        let ctx = RequestContext::new(IpAddr::V4(Ipv4Addr::LOCALHOST), endpoint);
        match payload {
            Some(p) => ctx.with_payload(p),
            None => ctx,
        }
    }

    fn ctx(payload: Option<Value>) -> RequestContext {
        ctx_at("/api/secure/ai", payload)
    }

    #[tokio::test]
    async fn test_valid_body_passes() {
        let guard = guard();
        let body = json!({ "command": "analyze", "tags": ["a"] });
        assert!(guard.check(&ctx(Some(body))).await.is_ok());
    }

    #[tokio::test]
    async fn test_reports_every_violation() {
        let guard = guard();
        let body = json!({ "priority": 3, "tags": ["a", "b", "c"] });

        let err = guard.check(&ctx(Some(body))).await.unwrap_err();
        assert_eq!(
            err,
            GuardError::Validation(
                "'command' is required; 'priority' must be of type string; 'tags' exceeds maximum length 2".into()
            )
        );
        assert_eq!(err.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn test_missing_body_with_required_field() {
        let guard = guard();
        assert!(matches!(guard.check(&ctx(None)).await, Err(GuardError::Validation(_))));
    }

    #[tokio::test]
    async fn test_endpoint_without_schema_passes() {
        let body = json!({ "anything": [1, 2, 3] });
        assert!(guard().check(&ctx_at("/api/secure/echo", Some(body))).await.is_ok());
    }

    #[test]
    fn test_non_object_body() {
        assert_eq!(
            schema().violations(Some(&json!([1, 2]))),
            vec!["body must be a JSON object".to_string()]
        );
    }

    #[test]
    fn test_schema_from_toml() {
        let schema: InputSchema = toml::from_str(
            r#"
            [[fields]]
            name = "address"
            kind = "string"
            required = true
            "#,
        )
        .unwrap();
        assert_eq!(schema.fields[0].kind, FieldKind::String);
        assert!(schema.fields[0].required);
    }
}
