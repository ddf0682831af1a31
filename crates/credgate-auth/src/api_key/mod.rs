//! API key verification with a TTL cache
//!
//! API keys are opaque; the only way to validate one is a remote
//! [`AuthorizationCheck`]. [`CredentialCache`] remembers successful checks
//! for a fixed TTL so a hot key costs one remote call per window.
//!
//! ## Key Handling
//!
//! - Cache keys are a BLAKE3 digest of `(scope, api key)`; the raw key is
//!   never stored as a map key or logged
//! - Logs carry a short digest (`key_digest`) for correlating requests
//! - Only successful checks are cached, so a rejection or a transport error
//!   is re-checked on the next call
//! - Concurrent checks of the same uncached key share one remote call and
//!   its outcome
//! - A cache hit does not extend the entry's lifetime

pub mod service_control;

pub use service_control::ServiceControlClient;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tracing::{debug, info, warn};

use crate::error::{AuthError, Result};

/// Hex characters of the digest that appear in logs.
const LOG_DIGEST_LEN: usize = 16;

/// Answer of a remote authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The key is valid for the scope.
    Valid,
    /// The key was rejected; one entry per problem reported.
    Rejected(Vec<String>),
}

/// Remote authority that decides whether an API key is valid for a scope.
#[async_trait]
pub trait AuthorizationCheck: Send + Sync + fmt::Debug {
    /// Check `api_key` against `scope`.
    ///
    /// A transport or protocol failure is an `Err` ([`AuthError::Fetch`]);
    /// an explicit rejection is `Ok(CheckOutcome::Rejected(..))`.
    async fn check(&self, scope: &str, api_key: &str) -> Result<CheckOutcome>;
}

/// TTL memoization of successful API key checks.
#[derive(Clone)]
pub struct CredentialCache {
    entries: Cache<String, ()>,
    checker: Arc<dyn AuthorizationCheck>,
    ttl: Duration,
}

impl fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache")
            .field("checker", &self.checker)
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

impl CredentialCache {
    /// Cache successful `checker` answers for `ttl`.
    pub fn new(checker: Arc<dyn AuthorizationCheck>, ttl: Duration) -> Self {
        Self {
            entries: Cache::builder().time_to_live(ttl).build(),
            checker,
            ttl,
        }
    }

    /// How long a successful check is trusted.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Check `api_key` against `scope`, consulting the remote authority at
    /// most once per TTL window.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidCredential`] with every reported problem if the
    ///   key was rejected
    /// - [`AuthError::Fetch`] if the remote check itself failed
    #[tracing::instrument(skip_all, fields(scope = %scope, key_digest = %key_digest(api_key)))]
    pub async fn check(&self, api_key: &str, scope: &str) -> Result<()> {
        let remote_check = async {
            info!("Checking API key with authorization service");
            match self.checker.check(scope, api_key).await? {
                CheckOutcome::Valid => Ok(()),
                CheckOutcome::Rejected(errors) => {
                    for (index, detail) in errors.iter().enumerate() {
                        warn!(index, detail = %detail, "API key validation error");
                    }
                    Err(AuthError::InvalidCredential { errors })
                }
            }
        };

        // Errors are handed to every waiting caller but never inserted
        let entry = self
            .entries
            .entry(cache_key(scope, api_key))
            .or_try_insert_with(remote_check)
            .await
            .map_err(|shared| {
                Arc::try_unwrap(shared).unwrap_or_else(|shared| AuthError::clone(&shared))
            })?;

        if !entry.is_fresh() {
            debug!("API key valid from cache");
        }
        Ok(())
    }
}

/// Deterministic cache key for a `(scope, api key)` pair.
fn cache_key(scope: &str, api_key: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(scope.as_bytes());
    hasher.update(&[0]);
    hasher.update(api_key.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Short one-way digest of an API key, safe to log.
pub(crate) fn key_digest(api_key: &str) -> String {
    let digest = blake3::hash(api_key.as_bytes()).to_hex();
    digest[..LOG_DIGEST_LEN].to_string()
}
