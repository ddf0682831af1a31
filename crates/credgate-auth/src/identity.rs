//! Verified caller identity.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// The outcome of a successful token verification.
///
/// Both token paths produce the same shape: the subject id plus one flat
/// claim map carrying the standard claims and any custom claims.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedIdentity {
    subject_id: String,
    claims: Map<String, Value>,
    expires_at: DateTime<Utc>,
}

impl VerifiedIdentity {
    pub(crate) fn new(
        subject_id: impl Into<String>,
        claims: Map<String, Value>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            claims,
            expires_at,
        }
    }

    /// Stable id of the authenticated subject (the `uid` claim).
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Alias of [`VerifiedIdentity::subject_id`].
    pub fn user_id(&self) -> &str {
        &self.subject_id
    }

    /// Every claim, flattened.
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// Raw value of one claim.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// A scalar claim rendered as a string.
    ///
    /// Objects, arrays and `null` yield `None`.
    pub fn string_claim(&self, name: &str) -> Option<String> {
        match self.claims.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// An integer claim. Integer strings are accepted; floats are truncated
    /// toward zero, and are `None` outside the `i64` range.
    pub fn int_claim(&self, name: &str) -> Option<i64> {
        match self.claims.get(name)? {
            Value::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                    .map(|f| f.trunc() as i64)
            }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// A numeric claim as `f64`. Decimal strings are accepted.
    pub fn float_claim(&self, name: &str) -> Option<f64> {
        match self.claims.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// When the underlying token expires.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the token has expired by now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the token has expired by `now`. Expiry is inclusive.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
