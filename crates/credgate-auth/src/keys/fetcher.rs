//! Remote key-set fetching
//!
//! Public keys are published as a JSON object mapping key id to a
//! PEM-encoded X.509 certificate:
//!
//! ```json
//! { "3f1c...": "-----BEGIN CERTIFICATE-----\nMIIDHDCCAgSgAwIBAgII...\n-----END CERTIFICATE-----\n" }
//! ```
//!
//! The whole document must parse: one bad certificate fails the fetch so the
//! registry never swaps in a partial key set.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info};

use super::{KeySetFetcher, SigningKey};
use crate::error::{AuthError, Result};

/// Fetches a `{ key id: PEM }` document over HTTPS.
///
/// # Example
///
/// ```rust,no_run
/// # use credgate_auth::keys::{KeySetFetcher, X509KeySetFetcher};
/// # use std::time::Duration;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = X509KeySetFetcher::new(
///     "https://www.googleapis.com/robot/v1/metadata/x509/securetoken@system.gserviceaccount.com",
///     Duration::from_secs(10),
/// )?;
///
/// let keys = fetcher.fetch_keys().await?;
/// println!("{} keys published", keys.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct X509KeySetFetcher {
    /// Metadata endpoint URL
    metadata_url: String,
    /// HTTP client
    http_client: reqwest::Client,
}

impl X509KeySetFetcher {
    /// Create a fetcher for `metadata_url`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the URL is not HTTPS (plain
    /// HTTP is only allowed for localhost) or the HTTP client cannot be built.
    pub fn new(metadata_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let metadata_url = metadata_url.into();

        if !metadata_url.starts_with("https://")
            && !metadata_url.starts_with("http://localhost")
            && !metadata_url.starts_with("http://127.0.0.1")
        {
            return Err(AuthError::Configuration(format!(
                "key metadata endpoint must use HTTPS (HTTP only allowed for localhost): {metadata_url}"
            )));
        }

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Configuration(format!("HTTP client build failed: {e}")))?;

        Ok(Self {
            metadata_url,
            http_client,
        })
    }

    /// Get the metadata endpoint URL
    pub fn metadata_url(&self) -> &str {
        &self.metadata_url
    }
}

#[async_trait]
impl KeySetFetcher for X509KeySetFetcher {
    async fn fetch_keys(&self) -> Result<Vec<SigningKey>> {
        debug!(metadata_url = %self.metadata_url, "Fetching public key set");

        let response = self
            .http_client
            .get(&self.metadata_url)
            .send()
            .await
            .map_err(|e| {
                error!(metadata_url = %self.metadata_url, error = %e, "Failed to fetch public keys");
                AuthError::Fetch(format!("public key download failed: {e}"))
            })?;

        if !response.status().is_success() {
            error!(
                metadata_url = %self.metadata_url,
                status = %response.status(),
                "Key metadata endpoint returned error status"
            );
            return Err(AuthError::Fetch(format!(
                "public key download returned status {}",
                response.status()
            )));
        }

        let document: BTreeMap<String, String> = response.json().await.map_err(|e| {
            error!(metadata_url = %self.metadata_url, error = %e, "Failed to parse key metadata");
            AuthError::Fetch(format!("public key document parse failed: {e}"))
        })?;

        let keys = document
            .iter()
            .map(|(kid, pem)| {
                SigningKey::from_pem(kid.as_str(), pem)
                    .map_err(|e| AuthError::Fetch(format!("public key ({kid}) decode failed: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            metadata_url = %self.metadata_url,
            key_count = keys.len(),
            "Fetched public key set"
        );

        Ok(keys)
    }
}
