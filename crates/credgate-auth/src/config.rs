//! Verifier configuration.
//!
//! [`VerifierConfig`] carries the service identity the engine verifies
//! against plus the knobs for the bundled HTTP collaborators. It deserializes
//! from any serde source; every field except the two identifiers has a default.

use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{AuthError, Result};

/// Audience carried by self-issued tokens minted for the identity toolkit.
pub const IDENTITY_TOOLKIT_AUDIENCE: &str =
    "https://identitytoolkit.googleapis.com/google.identity.identitytoolkit.v1.IdentityToolkit";

/// Base URL under which a service account's public certificates are published.
pub const X509_METADATA_BASE_URL: &str = "https://www.googleapis.com/robot/v1/metadata/x509/";

/// Certificates used to sign end-user ID tokens.
pub const SECURE_TOKEN_METADATA_URL: &str =
    "https://www.googleapis.com/robot/v1/metadata/x509/securetoken@system.gserviceaccount.com";

/// Issuer prefix of end-user ID tokens; the project id follows it.
pub const SECURE_TOKEN_ISSUER_PREFIX: &str = "https://securetoken.google.com/";

/// Service Control API root used for API key checks.
pub const SERVICE_CONTROL_BASE_URL: &str = "https://servicecontrol.googleapis.com";

/// How long a successful API key check is trusted (1 hour).
pub const DEFAULT_API_KEY_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Timeout applied to the bundled HTTP collaborators.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Characters escaped when an identifier is used as a single URL path segment.
pub(crate) const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Verification engine configuration
///
/// # Example
///
/// ```rust
/// use credgate_auth::VerifierConfig;
///
/// let config = VerifierConfig::new("my-project", "backend@my-project.iam.gserviceaccount.com")
///     .accept_original_tokens(true);
///
/// assert_eq!(config.api_key_scope(), "my-project.appspot.com");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct VerifierConfig {
    /// Cloud project the service runs in.
    pub project_id: String,
    /// The service's own credential identity (service account email).
    pub service_account_email: String,
    /// Accept tokens signed by the service's own key (deny by default).
    #[serde(default)]
    pub accept_original_tokens: bool,
    /// Override for the service account's public key metadata URL.
    #[serde(default)]
    pub key_metadata_url: Option<String>,
    /// Override for the scope API keys are checked against.
    #[serde(default)]
    pub api_key_scope: Option<String>,
    /// How long a successful API key check is cached.
    #[serde(default = "default_api_key_cache_ttl")]
    pub api_key_cache_ttl: Duration,
    /// Timeout for key-set fetches and authorization checks.
    #[serde(default = "default_http_timeout")]
    pub http_timeout: Duration,
    /// Bearer token for the bundled Service Control client.
    #[serde(default)]
    pub service_control_token: Option<SecretString>,
}

fn default_api_key_cache_ttl() -> Duration {
    DEFAULT_API_KEY_CACHE_TTL
}

fn default_http_timeout() -> Duration {
    DEFAULT_HTTP_TIMEOUT
}

impl VerifierConfig {
    /// Create a configuration with defaults for everything but the identity.
    pub fn new(project_id: impl Into<String>, service_account_email: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            service_account_email: service_account_email.into(),
            accept_original_tokens: false,
            key_metadata_url: None,
            api_key_scope: None,
            api_key_cache_ttl: DEFAULT_API_KEY_CACHE_TTL,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            service_control_token: None,
        }
    }

    /// Enable or disable acceptance of self-issued tokens.
    pub fn accept_original_tokens(mut self, accept: bool) -> Self {
        self.accept_original_tokens = accept;
        self
    }

    /// Fetch the service's public keys from `url` instead of the default.
    pub fn with_key_metadata_url(mut self, url: impl Into<String>) -> Self {
        self.key_metadata_url = Some(url.into());
        self
    }

    /// Check API keys against `scope` instead of `<project>.appspot.com`.
    pub fn with_api_key_scope(mut self, scope: impl Into<String>) -> Self {
        self.api_key_scope = Some(scope.into());
        self
    }

    /// Set how long a successful API key check is trusted.
    pub fn with_api_key_cache_ttl(mut self, ttl: Duration) -> Self {
        self.api_key_cache_ttl = ttl;
        self
    }

    /// Set the timeout for the bundled HTTP collaborators.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Set the bearer token used by the bundled Service Control client.
    pub fn with_service_control_token(mut self, token: impl Into<String>) -> Self {
        self.service_control_token = Some(SecretString::new(token.into()));
        self
    }

    /// URL publishing the service account's current public certificates.
    pub fn key_metadata_url(&self) -> String {
        match &self.key_metadata_url {
            Some(url) => url.clone(),
            None => format!(
                "{X509_METADATA_BASE_URL}{}",
                utf8_percent_encode(&self.service_account_email, PATH_SEGMENT)
            ),
        }
    }

    /// Scope API keys are checked against when the caller supplies none.
    pub fn api_key_scope(&self) -> String {
        match &self.api_key_scope {
            Some(scope) => scope.clone(),
            None => format!("{}.appspot.com", self.project_id),
        }
    }

    /// Reject configurations the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if an identifier is empty or a
    /// duration is zero.
    pub fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(AuthError::Configuration("project_id must not be empty".into()));
        }
        if self.service_account_email.trim().is_empty() {
            return Err(AuthError::Configuration(
                "service_account_email must not be empty".into(),
            ));
        }
        if self.api_key_cache_ttl.is_zero() {
            return Err(AuthError::Configuration(
                "api_key_cache_ttl must be greater than zero".into(),
            ));
        }
        if self.http_timeout.is_zero() {
            return Err(AuthError::Configuration(
                "http_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
