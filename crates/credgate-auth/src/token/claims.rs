//! Claim validation for self-issued tokens
//!
//! Self-issued tokens follow the custom-token convention: standard claims at
//! the top level, the subject's own claims in a nested `claims` object.
//! [`ClaimsValidator`] checks the standard claims, then flattens the payload
//! into the single canonical map callers see.
//!
//! # Merge policy
//!
//! Nested custom claims override top-level claims of the same name, except
//! for the names in [`RESERVED_CLAIMS`]. A reserved name present at the top
//! level keeps its top-level value, so a custom claim can never rewrite the
//! audience, expiry, issuer or subject that were just validated.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::IDENTITY_TOOLKIT_AUDIENCE;
use crate::error::{AuthError, ClaimName, Result};
use crate::identity::VerifiedIdentity;

/// Claim names a nested custom claim cannot override.
pub const RESERVED_CLAIMS: &[&str] = &["aud", "exp", "iat", "iss", "nbf", "sub", "uid"];

/// Name of the nested custom-claims object.
const CUSTOM_CLAIMS_KEY: &str = "claims";

/// Claims that hold a timestamp in seconds.
const TIMESTAMP_CLAIMS: &[&str] = &["exp", "iat", "nbf"];

/// Read a seconds-since-epoch value from any of the encodings tokens use.
///
/// Integers are taken as-is, floating-point seconds are truncated, and
/// decimal strings are parsed the same way. Anything else is `None`.
///
/// ```rust
/// use credgate_auth::token::normalize_timestamp;
/// use serde_json::json;
///
/// assert_eq!(normalize_timestamp(&json!(1700000000)), Some(1700000000));
/// assert_eq!(normalize_timestamp(&json!(1700000000.75)), Some(1700000000));
/// assert_eq!(normalize_timestamp(&json!("1700000000")), Some(1700000000));
/// assert_eq!(normalize_timestamp(&json!(true)), None);
/// ```
pub fn normalize_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .or_else(|| n.as_f64().and_then(truncate_seconds)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate_seconds))
        }
        _ => None,
    }
}

fn truncate_seconds(secs: f64) -> Option<i64> {
    (secs.is_finite() && secs.abs() < i64::MAX as f64).then(|| secs.trunc() as i64)
}

/// Merge a nested `claims` object into the top-level claim map.
///
/// Timestamp claims are rewritten as integer seconds; the `claims` key itself
/// is dropped. See the module docs for the precedence rules.
pub fn flatten_claims(raw: &Map<String, Value>) -> Map<String, Value> {
    let mut flat: Map<String, Value> = raw
        .iter()
        .filter(|(name, _)| name.as_str() != CUSTOM_CLAIMS_KEY)
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    match raw.get(CUSTOM_CLAIMS_KEY) {
        Some(Value::Object(custom)) => {
            for (name, value) in custom {
                if RESERVED_CLAIMS.contains(&name.as_str()) && flat.contains_key(name) {
                    debug!(claim = %name, "Ignoring custom claim shadowing a reserved claim");
                    continue;
                }
                flat.insert(name.clone(), value.clone());
            }
        }
        // A non-object `claims` value is an ordinary claim
        Some(other) => {
            flat.insert(CUSTOM_CLAIMS_KEY.to_string(), other.clone());
        }
        None => {}
    }

    for name in TIMESTAMP_CLAIMS {
        if let Some(value) = flat.get_mut(*name)
            && let Some(secs) = normalize_timestamp(value)
        {
            *value = Value::from(secs);
        }
    }

    flat
}

/// Reject an optional timestamp claim that lies after `now`.
fn check_not_after(
    claims: &Map<String, Value>,
    name: &str,
    claim: ClaimName,
    now: DateTime<Utc>,
    reason: &str,
) -> Result<()> {
    let Some(value) = claims.get(name) else {
        return Ok(());
    };
    let secs =
        normalize_timestamp(value).ok_or_else(|| AuthError::claim(claim, "not a timestamp"))?;
    if secs > now.timestamp() {
        return Err(AuthError::claim(claim, reason));
    }
    Ok(())
}

/// Validates signature-verified self-issued tokens.
#[derive(Debug, Clone)]
pub struct ClaimsValidator {
    audience: String,
    issuer: String,
}

impl ClaimsValidator {
    /// Validator expecting `issuer` and the identity toolkit audience.
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            audience: IDENTITY_TOOLKIT_AUDIENCE.to_string(),
            issuer: issuer.into(),
        }
    }

    /// Expect `audience` instead of the identity toolkit audience.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    /// Validate `claims` against the current time.
    ///
    /// # Errors
    ///
    /// See [`ClaimsValidator::validate_at`].
    pub fn validate(&self, claims: &Map<String, Value>) -> Result<VerifiedIdentity> {
        self.validate_at(claims, Utc::now())
    }

    /// Validate `claims` as of `now`.
    ///
    /// Checks run in order `aud`, `exp`, `iat`, `nbf`, `iss`, then `uid` and
    /// `exp` on the flattened claims, stopping at the first failure. `iat` and
    /// `nbf` are optional but may not lie after `now`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ClaimsInvalid`] naming the failed claim.
    pub fn validate_at(
        &self,
        claims: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<VerifiedIdentity> {
        self.check_audience(claims)?;

        let exp = claims
            .get("exp")
            .ok_or_else(|| AuthError::claim(ClaimName::Exp, "missing"))?;
        let exp = normalize_timestamp(exp)
            .ok_or_else(|| AuthError::claim(ClaimName::Exp, "not a timestamp"))?;
        if exp <= now.timestamp() {
            return Err(AuthError::claim(ClaimName::Exp, "token has expired"));
        }

        check_not_after(claims, "iat", ClaimName::Iat, now, "issued in the future")?;
        check_not_after(claims, "nbf", ClaimName::Nbf, now, "token not yet valid")?;

        match claims.get("iss") {
            Some(Value::String(iss)) if *iss == self.issuer => {}
            Some(_) => return Err(AuthError::claim(ClaimName::Iss, "unexpected issuer")),
            None => return Err(AuthError::claim(ClaimName::Iss, "missing")),
        }

        let flat = flatten_claims(claims);

        let uid = match flat.get("uid") {
            Some(Value::String(uid)) if !uid.is_empty() => uid.clone(),
            _ => return Err(AuthError::claim(ClaimName::Uid, "missing or empty")),
        };
        let expires_at = flat
            .get("exp")
            .and_then(normalize_timestamp)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| AuthError::claim(ClaimName::Exp, "missing after flattening"))?;

        Ok(VerifiedIdentity::new(uid, flat, expires_at))
    }

    fn check_audience(&self, claims: &Map<String, Value>) -> Result<()> {
        let matches = match claims.get("aud") {
            Some(Value::String(aud)) => *aud == self.audience,
            Some(Value::Array(auds)) => auds
                .iter()
                .any(|aud| aud.as_str() == Some(self.audience.as_str())),
            Some(_) => false,
            None => return Err(AuthError::claim(ClaimName::Aud, "missing")),
        };

        if matches {
            Ok(())
        } else {
            Err(AuthError::claim(ClaimName::Aud, "unexpected audience"))
        }
    }
}
