//! Self-issued vs. client token routing
//!
//! The only routing signal is the unverified `sub` claim: a token whose
//! subject is the service's own identity was minted with the service's own
//! key, anything else came from the external identity provider. Nothing read
//! here is trusted until the chosen path has verified the signature.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Header, decode_header};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{AuthError, Result};

/// A structurally valid but unverified token.
#[derive(Debug, Clone)]
pub struct UnverifiedToken {
    raw: String,
    header: Header,
    payload: Map<String, Value>,
    subject: String,
}

impl UnverifiedToken {
    /// Split and decode `raw` without checking its signature.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] if the token does not have three
    /// segments, the header or payload cannot be decoded, or the `sub` claim
    /// is missing or empty.
    pub fn parse(raw: &str) -> Result<Self> {
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() != 3 {
            return Err(AuthError::MalformedToken(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        }

        let header = decode_header(raw)?;

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(segments[1].trim_end_matches('='))
            .map_err(|e| AuthError::MalformedToken(format!("payload is not base64url: {e}")))?;
        let payload: Map<String, Value> = serde_json::from_slice(&payload_bytes)
            .map_err(|e| AuthError::MalformedToken(format!("payload is not a JSON object: {e}")))?;

        let subject = match payload.get("sub") {
            Some(Value::String(sub)) if !sub.is_empty() => sub.clone(),
            _ => return Err(AuthError::MalformedToken("missing or empty `sub` claim".into())),
        };

        Ok(Self {
            raw: raw.to_string(),
            header,
            payload,
            subject,
        })
    }

    /// The token exactly as presented.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Decoded JOSE header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Decoded, unverified payload.
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Unverified `sub` claim; never empty.
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Which verification path a token takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Signed by the service's own key.
    Original,
    /// Issued by the external identity provider.
    Client,
}

/// Routes tokens by subject.
#[derive(Debug, Clone)]
pub struct TokenClassifier {
    service_identity: String,
    accept_original: bool,
}

impl TokenClassifier {
    /// Create a classifier for the service identified by `service_identity`.
    pub fn new(service_identity: impl Into<String>, accept_original: bool) -> Self {
        Self {
            service_identity: service_identity.into(),
            accept_original,
        }
    }

    /// Whether self-issued tokens are accepted.
    pub fn accepts_original(&self) -> bool {
        self.accept_original
    }

    /// Decide the verification path for `token`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RejectedOriginalToken`] if the token claims the
    /// service identity while self-issued tokens are disabled.
    pub fn classify(&self, token: &UnverifiedToken) -> Result<TokenKind> {
        if token.subject() != self.service_identity {
            return Ok(TokenKind::Client);
        }

        if self.accept_original {
            debug!("Routing self-issued token");
            Ok(TokenKind::Original)
        } else {
            warn!("Self-issued token presented while acceptance is disabled");
            Err(AuthError::RejectedOriginalToken)
        }
    }
}
