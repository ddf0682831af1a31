//! Verification error types.
//!
//! Every failure the engine can produce maps onto one [`AuthError`] variant so
//! callers can branch on the failure category. Only [`AuthError::Fetch`] is
//! worth retrying; everything else is terminal for the request.

use std::fmt;

use thiserror::Error;

/// A claim checked on the self-issued token path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimName {
    /// Audience.
    Aud,
    /// Expiry.
    Exp,
    /// Issued-at time.
    Iat,
    /// Issuer.
    Iss,
    /// Not-before time.
    Nbf,
    /// User id.
    Uid,
}

impl ClaimName {
    /// The claim name as it appears in a token payload.
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimName::Aud => "aud",
            ClaimName::Exp => "exp",
            ClaimName::Iat => "iat",
            ClaimName::Iss => "iss",
            ClaimName::Nbf => "nbf",
            ClaimName::Uid => "uid",
        }
    }
}

impl fmt::Display for ClaimName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential verification errors.
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change. Downstream
/// match expressions must include a wildcard arm.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Token cannot be parsed: wrong segment count, undecodable header or
    /// payload, or an empty subject.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// No known signing key validates the signature, even after a refresh.
    #[error("Signature validation failed for every known signing key")]
    SignatureNotFound,

    /// Signature is valid but a required claim failed.
    #[error("Invalid claim `{claim}`: {reason}")]
    ClaimsInvalid {
        /// Which claim failed.
        claim: ClaimName,
        /// What was wrong with it.
        reason: String,
    },

    /// A self-issued token was presented to a verifier that does not accept them.
    #[error("Self-issued tokens are not accepted by this verifier")]
    RejectedOriginalToken,

    /// A remote key-set fetch or authorization check failed transiently.
    #[error("Remote call failed: {0}")]
    Fetch(String),

    /// The remote authorization check rejected the API key.
    #[error("API key rejected: {}", .errors.join(", "))]
    InvalidCredential {
        /// Every problem reported by the authorization service.
        errors: Vec<String>,
    },

    /// The external identity provider rejected a client token.
    #[error("Identity provider rejected token: {0}")]
    IdentityProvider(String),

    /// The engine or one of its collaborators is misconfigured.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AuthError {
    /// Shorthand for a [`AuthError::ClaimsInvalid`].
    pub fn claim(claim: ClaimName, reason: impl Into<String>) -> Self {
        AuthError::ClaimsInvalid {
            claim,
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, AuthError::Fetch(_))
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken => AuthError::MalformedToken("invalid JWT structure".into()),
            ErrorKind::Base64(e) => AuthError::MalformedToken(format!("invalid base64: {e}")),
            ErrorKind::Json(e) => AuthError::MalformedToken(format!("invalid JSON: {e}")),
            ErrorKind::Utf8(e) => AuthError::MalformedToken(format!("invalid UTF-8: {e}")),
            ErrorKind::InvalidSignature => AuthError::SignatureNotFound,
            _ => AuthError::MalformedToken(format!("JWT error: {err}")),
        }
    }
}

/// Result type alias for verification operations.
pub type Result<T> = std::result::Result<T, AuthError>;
