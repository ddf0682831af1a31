//! Token parsing, routing and claim validation
//!
//! - `classifier` - structural parse and self-issued vs. client routing
//! - `claims` - claim checks and normalization for self-issued tokens

pub mod claims;
pub mod classifier;

pub use claims::{ClaimsValidator, RESERVED_CLAIMS, flatten_claims, normalize_timestamp};
pub use classifier::{TokenClassifier, TokenKind, UnverifiedToken};
