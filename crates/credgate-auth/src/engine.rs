//! Verification engine
//!
//! [`VerificationEngine`] is the only type most callers need. It exposes the
//! two public operations:
//!
//! - [`VerificationEngine::verify_token`] routes a bearer token to the
//!   self-issued path (service key registry plus [`ClaimsValidator`]) or the
//!   client path ([`IdentityProvider`]) and returns a [`VerifiedIdentity`]
//! - [`VerificationEngine::verify_api_key`] checks an API key through the
//!   [`CredentialCache`]
//!
//! Collaborators are injected through [`VerificationEngineBuilder`]; anything
//! not injected falls back to the bundled HTTP implementation.

use std::sync::Arc;

use tracing::{debug, info};

use crate::api_key::{AuthorizationCheck, CredentialCache, ServiceControlClient};
use crate::config::VerifierConfig;
use crate::error::{AuthError, Result};
use crate::identity::VerifiedIdentity;
use crate::keys::{KeyRegistry, KeySetFetcher, SigningKey, X509KeySetFetcher};
use crate::provider::{FirebaseIdTokenVerifier, IdentityProvider};
use crate::token::{ClaimsValidator, TokenClassifier, TokenKind, UnverifiedToken};

/// Verifies bearer tokens and API keys for one service.
///
/// # Example
///
/// ```rust,no_run
/// use credgate_auth::{VerificationEngine, VerifierConfig};
///
/// # async fn example(token: &str, api_key: &str) -> Result<(), credgate_auth::AuthError> {
/// let config = VerifierConfig::new("demo-project", "backend@demo-project.iam.gserviceaccount.com")
///     .accept_original_tokens(true)
///     .with_service_control_token("ya29.access-token");
///
/// let engine = VerificationEngine::builder(config).build()?;
/// engine.prefetch_keys().await?;
///
/// let identity = engine.verify_token(token).await?;
/// println!("caller {}", identity.subject_id());
///
/// engine.verify_api_key(api_key, None).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct VerificationEngine {
    config: VerifierConfig,
    classifier: TokenClassifier,
    registry: Arc<KeyRegistry>,
    claims_validator: ClaimsValidator,
    identity_provider: Arc<dyn IdentityProvider>,
    credentials: Option<CredentialCache>,
}

impl VerificationEngine {
    /// Start building an engine for `config`.
    pub fn builder(config: VerifierConfig) -> VerificationEngineBuilder {
        VerificationEngineBuilder::new(config)
    }

    /// Verify a bearer token and return the identity it carries.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedToken`] if the token cannot be parsed
    /// - [`AuthError::RejectedOriginalToken`] for a self-issued token while
    ///   those are disabled
    /// - [`AuthError::SignatureNotFound`] if no service key verifies a
    ///   self-issued token
    /// - [`AuthError::ClaimsInvalid`] if a self-issued token fails a claim check
    /// - [`AuthError::IdentityProvider`] if the provider rejects a client token
    /// - [`AuthError::Fetch`] if a key refresh was needed and failed
    #[tracing::instrument(skip_all)]
    pub async fn verify_token(&self, token: &str) -> Result<VerifiedIdentity> {
        let unverified = UnverifiedToken::parse(token)?;

        match self.classifier.classify(&unverified)? {
            TokenKind::Original => {
                let resolved = self.registry.resolve(unverified.raw()).await?;
                let identity = self.claims_validator.validate(&resolved.claims)?;
                debug!(
                    key_id = %resolved.key.key_id(),
                    subject_id = %identity.subject_id(),
                    "Self-issued token verified"
                );
                Ok(identity)
            }
            TokenKind::Client => {
                let identity = self
                    .identity_provider
                    .verify_id_token(unverified.raw())
                    .await?
                    .into_verified()?;
                debug!(subject_id = %identity.subject_id(), "Client token verified");
                Ok(identity)
            }
        }
    }

    /// Verify an API key against `scope`, or the configured default scope.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidCredential`] if the authorization check rejected the key
    /// - [`AuthError::Fetch`] if the authorization check could not be performed
    /// - [`AuthError::Configuration`] if no authorization check is configured
    pub async fn verify_api_key(&self, api_key: &str, scope: Option<&str>) -> Result<()> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            AuthError::Configuration("no API key authorization check configured".into())
        })?;

        // Resolve the default before keying the cache so both spellings share an entry
        let scope = match scope {
            Some(scope) => scope.to_string(),
            None => self.config.api_key_scope(),
        };

        credentials.check(api_key, &scope).await
    }

    /// Fetch the service's public keys now instead of on the first miss.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Fetch`] if the key set cannot be fetched.
    pub async fn prefetch_keys(&self) -> Result<()> {
        self.registry.refresh().await?;
        info!(key_count = self.registry.key_ids().len(), "Service public keys loaded");
        Ok(())
    }

    /// Registry of the service's own public keys.
    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    /// Configuration the engine was built from.
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Whether self-issued tokens are accepted.
    pub fn accepts_original_tokens(&self) -> bool {
        self.classifier.accepts_original()
    }
}

/// Builder for [`VerificationEngine`].
#[derive(Debug)]
pub struct VerificationEngineBuilder {
    config: VerifierConfig,
    key_fetcher: Option<Arc<dyn KeySetFetcher>>,
    offline_keys: Vec<SigningKey>,
    identity_provider: Option<Arc<dyn IdentityProvider>>,
    authorization_check: Option<Arc<dyn AuthorizationCheck>>,
}

impl VerificationEngineBuilder {
    fn new(config: VerifierConfig) -> Self {
        Self {
            config,
            key_fetcher: None,
            offline_keys: Vec::new(),
            identity_provider: None,
            authorization_check: None,
        }
    }

    /// Source of the service's own public keys.
    pub fn key_fetcher(mut self, fetcher: Arc<dyn KeySetFetcher>) -> Self {
        self.key_fetcher = Some(fetcher);
        self
    }

    /// Bootstrap key kept across every refresh. The first one seeds the
    /// registry's "latest" hint.
    pub fn offline_key(mut self, key: SigningKey) -> Self {
        self.offline_keys.push(key);
        self
    }

    /// Verifier for client tokens.
    pub fn identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = Some(provider);
        self
    }

    /// Remote authority for API keys.
    pub fn authorization_check(mut self, check: Arc<dyn AuthorizationCheck>) -> Self {
        self.authorization_check = Some(check);
        self
    }

    /// Validate the configuration and assemble the engine.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the configuration is invalid
    /// or a default collaborator cannot be constructed.
    pub fn build(self) -> Result<VerificationEngine> {
        let config = self.config;
        config.validate()?;

        let key_fetcher = match self.key_fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(X509KeySetFetcher::new(
                config.key_metadata_url(),
                config.http_timeout,
            )?),
        };
        let registry = self
            .offline_keys
            .into_iter()
            .fold(KeyRegistry::new(key_fetcher), KeyRegistry::with_offline_key);

        let identity_provider = match self.identity_provider {
            Some(provider) => provider,
            None => Arc::new(FirebaseIdTokenVerifier::from_config(&config)?),
        };

        let authorization_check: Option<Arc<dyn AuthorizationCheck>> =
            match (self.authorization_check, &config.service_control_token) {
                (Some(check), _) => Some(check),
                (None, Some(token)) => Some(Arc::new(ServiceControlClient::new(
                    token.clone(),
                    config.http_timeout,
                )?)),
                (None, None) => None,
            };
        let credentials = authorization_check
            .map(|check| CredentialCache::new(check, config.api_key_cache_ttl));

        info!(
            project_id = %config.project_id,
            accept_original_tokens = config.accept_original_tokens,
            api_key_checks = credentials.is_some(),
            "Verification engine ready"
        );

        Ok(VerificationEngine {
            classifier: TokenClassifier::new(
                config.service_account_email.clone(),
                config.accept_original_tokens,
            ),
            claims_validator: ClaimsValidator::new(config.service_account_email.clone()),
            registry: Arc::new(registry),
            identity_provider,
            credentials,
            config,
        })
    }
}
