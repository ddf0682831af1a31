//! Signing keys and the rotating key registry
//!
//! A [`SigningKey`] is an immutable `(key id, public key)` pair. Keys are
//! published remotely as PEM-encoded X.509 certificates keyed by key id and
//! fetched through a [`KeySetFetcher`]; the [`KeyRegistry`] caches them and
//! resolves which key signed a token by trial verification.
//!
//! # Architecture
//!
//! ```text
//! token ─► latest key ──ok──► claims
//!             │ fail
//!             ▼
//!          all keys (offline ∪ fetched) ──ok──► claims, latest := key
//!             │ none
//!             ▼
//!          refresh (single-flight) ─► all keys again ──none──► SignatureNotFound
//! ```

pub mod fetcher;
pub mod registry;

pub use fetcher::X509KeySetFetcher;
pub use registry::{KeyRegistry, ResolvedToken};

use std::fmt;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde_json::{Map, Value};
use x509_parser::{pem::parse_x509_pem, public_key::PublicKey};

use crate::error::{AuthError, Result};

/// Source of the current remote key set.
///
/// Implementations must be idempotent and safe to retry. A failure of any
/// kind is reported as [`AuthError::Fetch`]; a partially parsed key set is
/// never returned.
#[async_trait]
pub trait KeySetFetcher: Send + Sync + fmt::Debug {
    /// Fetch every currently published signing key.
    async fn fetch_keys(&self) -> Result<Vec<SigningKey>>;
}

/// A public signing key and its stable identifier.
#[derive(Clone)]
pub struct SigningKey {
    key_id: String,
    algorithm: Algorithm,
    decoding_key: DecodingKey,
}

// DecodingKey carries raw key material; only the id is useful in logs
impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Wrap an RS256 decoding key.
    pub fn new(key_id: impl Into<String>, decoding_key: DecodingKey) -> Self {
        Self {
            key_id: key_id.into(),
            algorithm: Algorithm::RS256,
            decoding_key,
        }
    }

    /// Parse a PEM-encoded X.509 certificate or RSA `PUBLIC KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the PEM cannot be decoded or
    /// does not carry an RSA public key.
    pub fn from_pem(key_id: impl Into<String>, pem: &str) -> Result<Self> {
        let key_id = key_id.into();

        if !pem.contains("BEGIN CERTIFICATE") {
            let decoding_key = DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
                AuthError::Configuration(format!("invalid public key PEM ({key_id}): {e}"))
            })?;
            return Ok(Self::new(key_id, decoding_key));
        }

        let (_, pem_block) = parse_x509_pem(pem.as_bytes()).map_err(|e| {
            AuthError::Configuration(format!("PEM decode failed ({key_id}): {e}"))
        })?;
        let certificate = pem_block.parse_x509().map_err(|e| {
            AuthError::Configuration(format!("certificate parse failed ({key_id}): {e}"))
        })?;

        let spki = certificate.public_key();
        match spki.parsed() {
            Ok(PublicKey::RSA(_)) => {}
            Ok(_) => {
                return Err(AuthError::Configuration(format!(
                    "certificate ({key_id}) does not carry an RSA public key"
                )));
            }
            Err(e) => {
                return Err(AuthError::Configuration(format!(
                    "certificate ({key_id}) public key unreadable: {e}"
                )));
            }
        }

        // The subject public key bit string of an RSA SPKI is the PKCS#1 key
        let decoding_key = DecodingKey::from_rsa_der(&spki.subject_public_key.data);
        Ok(Self::new(key_id, decoding_key))
    }

    /// Stable identifier of this key.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Signature algorithm this key verifies.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Verify `token`'s signature against this key alone and return the raw
    /// payload. No claim is validated here; a wrong key has no side effects.
    pub(crate) fn verify(
        &self,
        token: &str,
    ) -> std::result::Result<Map<String, Value>, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        decode::<Map<String, Value>>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
    }
}
