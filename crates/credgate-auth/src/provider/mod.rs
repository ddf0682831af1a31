//! External identity provider seam
//!
//! Client tokens are verified entirely by an [`IdentityProvider`]; the engine
//! only reshapes the returned [`ProviderIdentity`] into a
//! [`VerifiedIdentity`] so both token paths look the same to callers.

pub mod firebase;

pub use firebase::FirebaseIdTokenVerifier;

use std::fmt;

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::{Map, Value};

use crate::error::{AuthError, Result};
use crate::identity::VerifiedIdentity;
use crate::token::RESERVED_CLAIMS;

/// Identity fields returned by an external provider for a verified token.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderIdentity {
    /// Token issuer.
    pub issuer: String,
    /// Token audience.
    pub audience: String,
    /// Expiry, seconds since the epoch.
    pub expires_at: i64,
    /// Issue time, seconds since the epoch.
    pub issued_at: i64,
    /// Token subject.
    pub subject: String,
    /// Provider user id.
    pub uid: String,
    /// Provider-specific claims beyond the standard ones.
    pub custom_claims: Map<String, Value>,
}

impl ProviderIdentity {
    /// Reshape into the canonical claim map.
    ///
    /// Custom claims are merged over the standard fields with the same
    /// precedence as self-issued tokens: reserved names keep the provider's
    /// verified values.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::IdentityProvider`] if `expires_at` is out of range.
    pub fn into_verified(self) -> Result<VerifiedIdentity> {
        let expires_at = DateTime::from_timestamp(self.expires_at, 0).ok_or_else(|| {
            AuthError::IdentityProvider(format!("expiry out of range: {}", self.expires_at))
        })?;

        let mut claims = Map::new();
        claims.insert("iss".into(), Value::from(self.issuer));
        claims.insert("aud".into(), Value::from(self.audience));
        claims.insert("exp".into(), Value::from(self.expires_at));
        claims.insert("iat".into(), Value::from(self.issued_at));
        claims.insert("sub".into(), Value::from(self.subject));
        claims.insert("uid".into(), Value::from(self.uid.clone()));

        for (name, value) in self.custom_claims {
            if !RESERVED_CLAIMS.contains(&name.as_str()) {
                claims.insert(name, value);
            }
        }

        Ok(VerifiedIdentity::new(self.uid, claims, expires_at))
    }
}

/// Verifies end-user tokens issued by an external identity provider.
///
/// Implementations own the full signature and claim check; a returned
/// identity is trusted as-is.
#[async_trait]
pub trait IdentityProvider: Send + Sync + fmt::Debug {
    /// Verify `token` and return the identity it carries.
    async fn verify_id_token(&self, token: &str) -> Result<ProviderIdentity>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn provider_identity() -> ProviderIdentity {
        ProviderIdentity {
            issuer: "https://securetoken.google.com/demo-project".into(),
            audience: "demo-project".into(),
            expires_at: 2_000_000_000,
            issued_at: 1_999_996_400,
            subject: "end-user-42".into(),
            uid: "end-user-42".into(),
            custom_claims: json!({ "role": "admin", "uid": "spoofed", "plan": 3 })
                .as_object()
                .cloned()
                .unwrap(),
        }
    }

    #[test]
    fn test_into_verified_shape() {
        let identity = provider_identity().into_verified().unwrap();

        assert_eq!(identity.subject_id(), "end-user-42");
        assert_eq!(identity.expires_at().timestamp(), 2_000_000_000);
        assert_eq!(
            identity.claims(),
            json!({
                "iss": "https://securetoken.google.com/demo-project",
                "aud": "demo-project",
                "exp": 2_000_000_000,
                "iat": 1_999_996_400,
                "sub": "end-user-42",
                "uid": "end-user-42",
                "role": "admin",
                "plan": 3,
            })
            .as_object()
            .unwrap()
        );
    }

    #[test]
    fn test_out_of_range_expiry() {
        let mut identity = provider_identity();
        identity.expires_at = i64::MAX;
        assert!(matches!(
            identity.into_verified(),
            Err(AuthError::IdentityProvider(_))
        ));
    }
}
