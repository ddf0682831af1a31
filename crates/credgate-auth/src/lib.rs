//! # credgate-auth - Bearer credential verification
//!
//! Decides whether a caller presenting a signed token or an API key is
//! authentic before business logic runs.
//!
//! ## Token Shapes
//!
//! - **Self-issued ("original") tokens** are custom tokens signed with the
//!   service's own service-account key. They represent a trusted
//!   backend-to-backend call and are accepted only when enabled.
//! - **Client tokens** are Firebase Authentication ID tokens issued to end
//!   users and verified against the secure-token service's keys.
//!
//! Both paths yield the same [`VerifiedIdentity`]: a subject id plus one flat
//! claim map.
//!
//! ## Architecture
//!
//! - [`keys`] - `SigningKey`, the rotating `KeyRegistry` and key-set fetching
//! - [`token`] - token parsing, routing and self-issued claim validation
//! - [`provider`] - the client-token `IdentityProvider` seam and Firebase verifier
//! - [`api_key`] - `CredentialCache` and the Service Control check
//! - [`engine`] - `VerificationEngine`, composing all of the above
//! - [`config`] / [`error`] - configuration and the error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use credgate_auth::{AuthError, VerificationEngine, VerifierConfig};
//!
//! # async fn handle(token: &str) -> Result<(), AuthError> {
//! let config = VerifierConfig::new("demo-project", "backend@demo-project.iam.gserviceaccount.com")
//!     .accept_original_tokens(true);
//! let engine = VerificationEngine::builder(config).build()?;
//!
//! match engine.verify_token(token).await {
//!     Ok(identity) => println!("authenticated {}", identity.subject_id()),
//!     Err(e) if e.is_retriable() => println!("try again later: {e}"),
//!     Err(e) => println!("rejected: {e}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! The crate emits `tracing` events and spans and installs no subscriber of
//! its own. Raw tokens and API keys are never recorded; API keys appear only
//! as a short BLAKE3 digest.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod api_key;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod keys;
pub mod provider;
pub mod token;

#[cfg(test)]
mod testutil;

pub use api_key::{AuthorizationCheck, CheckOutcome, CredentialCache, ServiceControlClient};
pub use config::VerifierConfig;
pub use engine::{VerificationEngine, VerificationEngineBuilder};
pub use error::{AuthError, ClaimName, Result};
pub use identity::VerifiedIdentity;
pub use keys::{KeyRegistry, KeySetFetcher, SigningKey, X509KeySetFetcher};
pub use provider::{FirebaseIdTokenVerifier, IdentityProvider, ProviderIdentity};
pub use token::{ClaimsValidator, TokenClassifier, TokenKind, UnverifiedToken};
