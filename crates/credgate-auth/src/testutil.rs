//! Shared fixtures for unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};

use crate::config::IDENTITY_TOOLKIT_AUDIENCE;
use crate::error::{AuthError, Result};
use crate::keys::{KeySetFetcher, SigningKey};

pub const SERVICE_PRIVATE_PEM: &str = include_str!("../tests/fixtures/service_private.pem");
pub const SERVICE_PUBLIC_PEM: &str = include_str!("../tests/fixtures/service_public.pem");
pub const SERVICE_CERT_PEM: &str = include_str!("../tests/fixtures/service_cert.pem");
pub const ROTATED_PRIVATE_PEM: &str = include_str!("../tests/fixtures/rotated_private.pem");
pub const ROTATED_CERT_PEM: &str = include_str!("../tests/fixtures/rotated_cert.pem");
pub const STRANGER_PRIVATE_PEM: &str = include_str!("../tests/fixtures/stranger_private.pem");

pub const PROJECT_ID: &str = "demo-project";
pub const SERVICE_EMAIL: &str = "backend@demo-project.iam.gserviceaccount.com";

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Sign `claims` as an RS256 JWT with the given private key and `kid`.
pub fn sign(claims: &Value, private_pem: &str, kid: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).unwrap();
    encode(&header, claims, &key).unwrap()
}

pub fn sign_with_service_key(claims: &Value) -> String {
    sign(claims, SERVICE_PRIVATE_PEM, "service-key")
}

/// Payload of a self-issued custom token.
pub fn service_claims() -> Value {
    let now = now_secs();
    json!({
        "aud": IDENTITY_TOOLKIT_AUDIENCE,
        "iss": SERVICE_EMAIL,
        "sub": SERVICE_EMAIL,
        "uid": "custom-token-user",
        "iat": now,
        "exp": now + 3600,
        "claims": { "foo": "bar", "hoge": "fuga", "int_claim": 123 }
    })
}

pub fn service_signing_key() -> SigningKey {
    SigningKey::from_pem("service-key", SERVICE_CERT_PEM).unwrap()
}

pub fn rotated_signing_key() -> SigningKey {
    SigningKey::from_pem("rotated-key", ROTATED_CERT_PEM).unwrap()
}

/// In-memory key source that counts fetches.
#[derive(Debug, Default)]
pub struct CountingFetcher {
    keys: Mutex<Vec<SigningKey>>,
    calls: AtomicUsize,
    fail: bool,
    delay: Option<Duration>,
}

impl CountingFetcher {
    pub fn new(keys: Vec<SigningKey>) -> Self {
        Self {
            keys: Mutex::new(keys),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replace the published key set.
    pub fn publish(&self, keys: Vec<SigningKey>) {
        *self.keys.lock().unwrap() = keys;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySetFetcher for CountingFetcher {
    async fn fetch_keys(&self) -> Result<Vec<SigningKey>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(AuthError::Fetch("key endpoint unavailable".into()));
        }
        Ok(self.keys.lock().unwrap().clone())
    }
}
