//! Firebase ID token verification
//!
//! End-user ID tokens are RS256 JWTs signed by one of the secure-token
//! service's rotating keys. Verification reuses [`KeyRegistry`] against the
//! secure-token certificate endpoint, then checks the Firebase claim rules:
//!
//! - `aud` is the project id
//! - `iss` is `https://securetoken.google.com/<project id>`
//! - `exp` is in the future, `iat` is not
//! - `sub` is non-empty and at most 128 characters

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, decode_header};
use serde_json::{Map, Value};
use tracing::debug;

use super::{IdentityProvider, ProviderIdentity};
use crate::config::{SECURE_TOKEN_ISSUER_PREFIX, SECURE_TOKEN_METADATA_URL, VerifierConfig};
use crate::error::{AuthError, Result};
use crate::keys::{KeyRegistry, KeySetFetcher, X509KeySetFetcher};
use crate::token::normalize_timestamp;

/// Longest subject Firebase issues.
const MAX_SUBJECT_LEN: usize = 128;

/// Claims reported as standard fields rather than custom claims.
const STANDARD_CLAIMS: &[&str] = &["aud", "exp", "iat", "iss", "sub"];

/// Verifies Firebase Authentication ID tokens.
///
/// # Example
///
/// ```rust,no_run
/// # use credgate_auth::{VerifierConfig, provider::{FirebaseIdTokenVerifier, IdentityProvider}};
/// # async fn example(token: &str) -> Result<(), Box<dyn std::error::Error>> {
/// let config = VerifierConfig::new("demo-project", "backend@demo-project.iam.gserviceaccount.com");
/// let verifier = FirebaseIdTokenVerifier::from_config(&config)?;
///
/// let identity = verifier.verify_id_token(token).await?;
/// println!("end user {}", identity.uid);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FirebaseIdTokenVerifier {
    project_id: String,
    issuer: String,
    registry: KeyRegistry,
}

impl FirebaseIdTokenVerifier {
    /// Create a verifier for `project_id` with keys from `fetcher`.
    pub fn new(project_id: impl Into<String>, fetcher: Arc<dyn KeySetFetcher>) -> Self {
        let project_id = project_id.into();
        Self {
            issuer: format!("{SECURE_TOKEN_ISSUER_PREFIX}{project_id}"),
            project_id,
            registry: KeyRegistry::new(fetcher),
        }
    }

    /// Create a verifier using the public secure-token certificates.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the HTTP client cannot be built.
    pub fn from_config(config: &VerifierConfig) -> Result<Self> {
        let fetcher = X509KeySetFetcher::new(SECURE_TOKEN_METADATA_URL, config.http_timeout)?;
        Ok(Self::new(config.project_id.clone(), Arc::new(fetcher)))
    }

    /// Expected `iss` claim.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    fn check_claims(&self, claims: &Map<String, Value>) -> Result<ProviderIdentity> {
        let now = Utc::now().timestamp();

        let audience = string_claim(claims, "aud")?;
        if audience != self.project_id {
            return Err(rejected(format!(
                "`aud` is {audience:?}, expected {:?}",
                self.project_id
            )));
        }

        let issuer = string_claim(claims, "iss")?;
        if issuer != self.issuer {
            return Err(rejected(format!(
                "`iss` is {issuer:?}, expected {:?}",
                self.issuer
            )));
        }

        let expires_at = timestamp_claim(claims, "exp")?;
        if expires_at <= now {
            return Err(rejected("token has expired"));
        }

        let issued_at = timestamp_claim(claims, "iat")?;
        if issued_at > now {
            return Err(rejected("token issued in the future"));
        }

        let subject = string_claim(claims, "sub")?;
        if subject.is_empty() || subject.chars().count() > MAX_SUBJECT_LEN {
            return Err(rejected(format!(
                "`sub` must be 1 to {MAX_SUBJECT_LEN} characters"
            )));
        }

        let custom_claims = claims
            .iter()
            .filter(|(name, _)| !STANDARD_CLAIMS.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Ok(ProviderIdentity {
            issuer,
            audience,
            expires_at,
            issued_at,
            uid: subject.clone(),
            subject,
            custom_claims,
        })
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdTokenVerifier {
    #[tracing::instrument(skip_all, fields(project_id = %self.project_id))]
    async fn verify_id_token(&self, token: &str) -> Result<ProviderIdentity> {
        let header = decode_header(token)?;
        if header.alg != Algorithm::RS256 {
            return Err(rejected(format!("unsupported algorithm {:?}", header.alg)));
        }
        if header.kid.is_none() {
            return Err(rejected("missing `kid` header"));
        }

        let resolved = self.registry.resolve(token).await.map_err(|e| match e {
            AuthError::SignatureNotFound => rejected("no published key verifies the signature"),
            other => other,
        })?;

        let identity = self.check_claims(&resolved.claims)?;
        debug!(key_id = %resolved.key.key_id(), "ID token verified");
        Ok(identity)
    }
}

fn rejected(reason: impl Into<String>) -> AuthError {
    AuthError::IdentityProvider(reason.into())
}

fn string_claim(claims: &Map<String, Value>, name: &str) -> Result<String> {
    match claims.get(name) {
        Some(Value::String(value)) => Ok(value.clone()),
        _ => Err(rejected(format!("missing or non-string `{name}`"))),
    }
}

fn timestamp_claim(claims: &Map<String, Value>, name: &str) -> Result<i64> {
    claims
        .get(name)
        .and_then(normalize_timestamp)
        .ok_or_else(|| rejected(format!("missing or non-numeric `{name}`")))
}
