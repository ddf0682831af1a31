//! Rotating public key registry
//!
//! [`KeyRegistry`] holds every known signing key and resolves which one
//! signed a token by trying them in turn:
//!
//! 1. the key that verified the most recent token, if any;
//! 2. every key in the merged set (offline keys and the last fetched set);
//! 3. after a synchronous refresh, the merged set once more.
//!
//! The merged set is swapped wholesale, so readers see either the set before
//! a refresh or the set after it. Refreshes are serialised; a caller that
//! waited while another caller's refresh ran reuses that outcome, success or
//! failure, instead of fetching again.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::{ArcSwap, ArcSwapOption};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{KeySetFetcher, SigningKey};
use crate::error::{AuthError, Result};

type KeyMap = HashMap<String, Arc<SigningKey>>;

/// A token whose signature was verified by a known key.
#[derive(Debug, Clone)]
pub struct ResolvedToken {
    /// The key that verified the signature.
    pub key: Arc<SigningKey>,
    /// The token payload, not yet claim-checked.
    pub claims: Map<String, Value>,
}

/// Cache of public signing keys with lazy refresh.
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use credgate_auth::keys::{KeyRegistry, X509KeySetFetcher};
/// # async fn example(token: &str) -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = X509KeySetFetcher::new(
///     "https://www.googleapis.com/robot/v1/metadata/x509/backend%40demo.iam.gserviceaccount.com",
///     Duration::from_secs(10),
/// )?;
/// let registry = KeyRegistry::new(Arc::new(fetcher));
///
/// let resolved = registry.resolve(token).await?;
/// println!("signed by {}", resolved.key.key_id());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct KeyRegistry {
    /// Remote key source
    fetcher: Arc<dyn KeySetFetcher>,
    /// Bootstrap keys; merged back into every refreshed set
    offline_keys: KeyMap,
    /// Offline keys plus the last fetched set
    all_keys: ArcSwap<KeyMap>,
    /// Key that verified the most recent token
    latest: ArcSwapOption<SigningKey>,
    /// Serialises refreshes
    refresh_lock: Mutex<()>,
    /// Bumped after every successful refresh
    generation: AtomicU64,
    /// Bumped after every refresh attempt, successful or not
    attempts: AtomicU64,
    /// Error of the most recent attempt; `None` if it succeeded
    last_failure: ArcSwapOption<AuthError>,
}

impl KeyRegistry {
    /// Create an empty registry backed by `fetcher`.
    pub fn new(fetcher: Arc<dyn KeySetFetcher>) -> Self {
        Self {
            fetcher,
            offline_keys: HashMap::new(),
            all_keys: ArcSwap::from_pointee(HashMap::new()),
            latest: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            last_failure: ArcSwapOption::empty(),
        }
    }

    /// Register a bootstrap key that survives every refresh.
    ///
    /// The first offline key also becomes the initial "latest" hint.
    pub fn with_offline_key(mut self, key: SigningKey) -> Self {
        let key = Arc::new(key);
        self.offline_keys
            .insert(key.key_id().to_string(), Arc::clone(&key));

        let mut all_keys = KeyMap::clone(&self.all_keys.load());
        all_keys.insert(key.key_id().to_string(), Arc::clone(&key));
        self.all_keys.store(Arc::new(all_keys));

        if self.latest.load().is_none() {
            self.latest.store(Some(key));
        }
        self
    }

    /// Find the key that signed `token` and return its payload.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Fetch`] if no cached key matched and the refresh failed
    /// - [`AuthError::SignatureNotFound`] if no key matched even after a refresh
    #[tracing::instrument(skip_all)]
    pub async fn resolve(&self, token: &str) -> Result<ResolvedToken> {
        let observed_attempt = self.attempts.load(Ordering::Acquire);

        let latest = self.latest.load_full();
        if let Some(key) = &latest
            && let Ok(claims) = key.verify(token)
        {
            debug!(key_id = %key.key_id(), "Token verified by latest key");
            return Ok(ResolvedToken {
                key: Arc::clone(key),
                claims,
            });
        }

        let skip = latest.as_ref().map(|key| key.key_id());
        if let Some(resolved) = self.scan(token, skip) {
            return Ok(resolved);
        }

        warn!("No cached public key verified the token, refreshing key set");
        self.refresh_after(observed_attempt).await?;

        if let Some(resolved) = self.scan(token, None) {
            return Ok(resolved);
        }

        error!(
            key_count = self.all_keys.load().len(),
            "Signature validation failed for every known public key"
        );
        Err(AuthError::SignatureNotFound)
    }

    /// Replace the fetched key set with the current remote one.
    ///
    /// On failure the existing keys stay in place.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Fetch`] if the remote key set cannot be fetched
    /// or parsed.
    pub async fn refresh(&self) -> Result<()> {
        let observed_attempt = self.attempts.load(Ordering::Acquire);
        self.refresh_after(observed_attempt).await
    }

    /// Key id of the current "latest" hint.
    pub fn latest_key_id(&self) -> Option<String> {
        self.latest
            .load()
            .as_ref()
            .map(|key| key.key_id().to_string())
    }

    /// Ids of every key currently in the merged set, sorted.
    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.all_keys.load().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of successful refreshes so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Try every key in the merged set, except `skip`.
    fn scan(&self, token: &str, skip: Option<&str>) -> Option<ResolvedToken> {
        let keys = self.all_keys.load_full();

        keys.values()
            .filter(|key| Some(key.key_id()) != skip)
            .find_map(|key| {
                key.verify(token).ok().map(|claims| {
                    debug!(key_id = %key.key_id(), "Token verified, updating latest key");
                    self.set_latest(key);
                    ResolvedToken {
                        key: Arc::clone(key),
                        claims,
                    }
                })
            })
    }

    /// Point the "latest" hint at `key`.
    ///
    /// A refresh may have replaced the key set after `key` was loaded; if
    /// `key` is no longer in it, the hint is withdrawn again. Refreshes store
    /// the new set before checking the hint, so one of the two sides always
    /// sees the other's write.
    fn set_latest(&self, key: &Arc<SigningKey>) {
        let hint = Some(Arc::clone(key));
        self.latest.store(hint.clone());

        if !self.all_keys.load().contains_key(key.key_id()) {
            let _ = self.latest.compare_and_swap(&hint, None);
        }
    }

    /// Refresh unless an attempt finished since `observed_attempt`, in which
    /// case that attempt's outcome is returned.
    async fn refresh_after(&self, observed_attempt: u64) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;

        if self.attempts.load(Ordering::Acquire) != observed_attempt {
            return match self.last_failure.load_full() {
                Some(err) => {
                    debug!("Concurrent key refresh failed, reusing its error");
                    Err(AuthError::clone(&err))
                }
                None => {
                    debug!("Key set refreshed by a concurrent caller, reusing it");
                    Ok(())
                }
            };
        }

        let fetched = match self.fetcher.fetch_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                let err = match e {
                    AuthError::Fetch(_) => e,
                    other => AuthError::Fetch(other.to_string()),
                };
                self.last_failure.store(Some(Arc::new(err.clone())));
                self.attempts.fetch_add(1, Ordering::AcqRel);
                return Err(err);
            }
        };

        let mut merged = KeyMap::with_capacity(fetched.len() + self.offline_keys.len());
        for key in fetched {
            merged.insert(key.key_id().to_string(), Arc::new(key));
        }
        // Offline keys win over a fetched key with the same id
        for (kid, key) in &self.offline_keys {
            merged.insert(kid.clone(), Arc::clone(key));
        }

        let key_count = merged.len();
        let merged = Arc::new(merged);
        self.all_keys.store(Arc::clone(&merged));

        let latest = self.latest.load_full();
        if let Some(key) = &latest
            && !merged.contains_key(key.key_id())
        {
            debug!(key_id = %key.key_id(), "Latest key no longer published, clearing hint");
            let _ = self.latest.compare_and_swap(&latest, None);
        }

        self.last_failure.store(None);
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.attempts.fetch_add(1, Ordering::AcqRel);

        info!(key_count, "Public key set refreshed");
        Ok(())
    }
}
