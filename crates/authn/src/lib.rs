//! # Gatekeeper Authentication
//!
//! Bearer token verification against an identity provider's rotating key set.
//!
//! This crate provides:
//! - **Token verification**: structure, algorithm allow-list, signature, issuer, audience and
//!   validity window checks producing a [`Principal`]
//! - **Signing key cache**: JWKS-backed cache with whole-set replacement, coalesced refresh,
//!   bounded fetch time and outage fallback
//! - **Configuration**: an immutable [`VerifierConfig`] and an explicit [`Enforcement`] state
//!
//! ## Features
//!
//! - Only asymmetric algorithms (RSA, ECDSA, EdDSA) can be allowed
//! - `none` and HMAC algorithms are rejected unconditionally
//! - Key fetch failures fail closed
//!
//! ## Example
//!
//! ```no_run
//! use gatekeeper_authn::{Enforcement, TokenVerifier};
//!
//! # async fn example(token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! if let Enforcement::Enabled(config) = Enforcement::from_env()? {
//!     let verifier = TokenVerifier::from_config(config)?;
//!     let principal = verifier.verify(token).await?;
//!     println!("groups: {:?}", principal.groups());
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Verifier configuration and enforcement state.
pub mod config;
/// Authentication error types.
pub mod error;
/// Key set documents and sources.
pub mod jwks;
/// Token verification.
pub mod jwt;
/// Verified identities.
pub mod principal;
/// Signing key cache.
pub mod signing_key_cache;
/// Algorithm and key id validation.
pub mod validation;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

// Re-export key types for convenience
pub use config::{ConfigError, Enforcement, VerifierConfig};
pub use error::{AuthError, Result};
pub use jwks::{HttpKeySetSource, Jwk, JwkSet, KeySetSource, SigningKeySet, StaticKeySetSource};
pub use jwt::TokenVerifier;
pub use principal::Principal;
pub use signing_key_cache::{CacheMetrics, DEFAULT_CACHE_TTL, SigningKeyCache};
pub use validation::{AlgorithmPolicy, FORBIDDEN_ALGORITHMS, validate_kid};
