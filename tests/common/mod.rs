//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;

use alloy::signers::{local::PrivateKeySigner, Signer};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Method, Request, Response},
};
use serde_json::Value;

use endpoint_guardian::config::{GuardianConfig, StaticTokenConfig};
use endpoint_guardian::security::Tier;

pub const STANDARD_TOKEN: &str = "std-token";
pub const ENTERPRISE_TOKEN: &str = "ent-token";
pub const ADMIN_KEY: &str = "test-admin-key";
pub const LEDGER_SECRET: &str = "ledger-secret";

// anvil account 0
pub const OWNER_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const OWNER: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
// anvil account 1
pub const OTHER_KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

pub fn test_config() -> GuardianConfig {
    let mut config = GuardianConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.auth.tokens = vec![
        StaticTokenConfig {
            token: STANDARD_TOKEN.into(),
            subject: "alice".into(),
            tier: Tier::Standard,
            ttl_secs: None,
        },
        StaticTokenConfig {
            token: ENTERPRISE_TOKEN.into(),
            subject: "acme".into(),
            tier: Tier::Enterprise,
            ttl_secs: None,
        },
    ];
    config
        .service_auth
        .services
        .insert("ledger".into(), LEDGER_SECRET.into());
    config.ownership.authorized_owner = Some(OWNER.into());
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.into();
    config
}

/// Request from a fixed peer address.
pub fn request(method: Method, uri: &str, headers: &[(&str, &str)], body: Option<&Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let body = match body {
        Some(json) => Body::from(json.to_string()),
        None => Body::empty(),
    };
    let mut request = builder.body(body).unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 20], 50000))));
    request
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn sign(key: &str, message: &str) -> String {
    let signer: PrivateKeySigner = key.parse().unwrap();
    let signature = signer.sign_message(message.as_bytes()).await.unwrap();
    format!("0x{}", hex::encode(signature.as_bytes()))
}
