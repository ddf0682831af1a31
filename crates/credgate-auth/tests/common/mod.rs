//! Common test utilities for integration tests
//!
//! Fixed RSA keys and certificates, token signing helpers, a mock key
//! metadata server and counting fakes for the remote collaborators.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use credgate_auth::config::IDENTITY_TOOLKIT_AUDIENCE;
use credgate_auth::{
    AuthorizationCheck, CheckOutcome, Result, SigningKey, VerificationEngine, VerifierConfig,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SERVICE_PRIVATE_PEM: &str = include_str!("../fixtures/service_private.pem");
pub const SERVICE_CERT_PEM: &str = include_str!("../fixtures/service_cert.pem");
pub const ROTATED_PRIVATE_PEM: &str = include_str!("../fixtures/rotated_private.pem");
pub const ROTATED_CERT_PEM: &str = include_str!("../fixtures/rotated_cert.pem");
pub const STRANGER_PRIVATE_PEM: &str = include_str!("../fixtures/stranger_private.pem");

pub const PROJECT_ID: &str = "demo-project";
pub const SERVICE_EMAIL: &str = "backend@demo-project.iam.gserviceaccount.com";

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Sign `claims` as an RS256 JWT with `kid` in the header.
pub fn sign(claims: &Value, private_pem: &str, kid: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("fixture key");
    encode(&header, claims, &key).expect("token signing")
}

/// Custom-token payload minted by the service for itself.
pub fn custom_token_claims() -> Value {
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

/// Firebase ID token payload for an end user.
pub fn id_token_claims(uid: &str) -> Value {
    let now = now_secs();
    json!({
        "iss": format!("https://securetoken.google.com/{PROJECT_ID}"),
        "aud": PROJECT_ID,
        "auth_time": now - 30,
        "user_id": uid,
        "sub": uid,
        "iat": now - 30,
        "exp": now + 3600,
        "email": format!("{uid}@example.com"),
        "firebase": { "sign_in_provider": "password" }
    })
}

pub fn service_signing_key() -> SigningKey {
    SigningKey::from_pem("service-key", SERVICE_CERT_PEM).expect("fixture certificate")
}

/// Mock x509 metadata endpoint serving `{ kid: PEM }` documents.
pub struct MockKeyServer {
    pub server: MockServer,
}

impl MockKeyServer {
    pub const PATH: &'static str = "/robot/v1/metadata/x509/service";

    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn metadata_url(&self) -> String {
        format!("{}{}", self.server.uri(), Self::PATH)
    }

    /// Publish `keys` until the mocks are reset.
    pub async fn publish(&self, keys: &[(&str, &str)]) {
        let document: serde_json::Map<String, Value> = keys
            .iter()
            .map(|(kid, pem)| (kid.to_string(), Value::from(*pem)))
            .collect();

        Mock::given(method("GET"))
            .and(path(Self::PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(document))
            .mount(&self.server)
            .await;
    }

    /// Fail every fetch with `status`.
    pub async fn fail_with(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(Self::PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// Number of key-set fetches received so far.
    pub async fn fetch_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or_default()
    }
}

/// Authorization check that answers from a fixed outcome and counts calls.
#[derive(Debug)]
pub struct CountingCheck {
    outcome: CheckOutcome,
    calls: AtomicUsize,
}

impl CountingCheck {
    pub fn valid() -> Arc<Self> {
        Arc::new(Self {
            outcome: CheckOutcome::Valid,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn rejecting(errors: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            outcome: CheckOutcome::Rejected(errors.iter().map(|e| e.to_string()).collect()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorizationCheck for CountingCheck {
    async fn check(&self, _scope: &str, _api_key: &str) -> Result<CheckOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.clone())
    }
}

/// Engine for the service, fetching its keys from `metadata_url`.
pub fn engine_with_keys(metadata_url: String, accept_original: bool) -> VerificationEngine {
    let config = VerifierConfig::new(PROJECT_ID, SERVICE_EMAIL)
        .accept_original_tokens(accept_original)
        .with_key_metadata_url(metadata_url)
        .with_http_timeout(Duration::from_secs(5));

    VerificationEngine::builder(config)
        .build()
        .expect("engine configuration")
}

/// Install a test subscriber once; events show up with `--nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("credgate_auth=debug")
        .with_test_writer()
        .try_init();
}
