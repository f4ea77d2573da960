//! JWT algorithm and key-id validation.
//!
//! This module provides the checks that run on the token header before any
//! key lookup happens.
//!
//! # Security
//!
//! - The declared algorithm must be on the configured allow-list.
//! - `none` and the symmetric HMAC algorithms are always rejected, even if an
//!   operator lists them, because a public key set can never verify them
//!   safely (algorithm confusion).
//! - Key ids are checked for size and content so that attacker-controlled
//!   header values never reach the cache or logs unfiltered.

use std::str::FromStr;

use jsonwebtoken::Algorithm;

use crate::error::AuthError;

/// Algorithms that are never accepted, regardless of configuration.
///
/// - `none`: no signature at all
/// - `HS256`, `HS384`, `HS512`: symmetric; a published public key would act as the shared secret
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Asymmetric algorithms the verifier knows how to check.
///
/// The configured allow-list must be a subset of this list.
pub const SUPPORTED_ALGORITHMS: &[&str] = &[
    "RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256", "ES384", "EdDSA",
];

/// Default allow-list when none is configured.
pub const DEFAULT_ALLOWED_ALGORITHMS: &[&str] = &["RS256"];

/// Maximum accepted key id length in bytes.
pub const MAX_KID_LENGTH: usize = 256;

/// Parses and validates an algorithm name against the forbidden and supported lists.
///
/// This does not consult a configured allow-list; see [`AlgorithmPolicy`] for that.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if the name is forbidden,
/// unknown, or not an asymmetric algorithm this crate verifies.
///
/// # Examples
///
/// ```
/// use gatekeeper_authn::validation::parse_algorithm;
///
/// assert!(parse_algorithm("EdDSA").is_ok());
/// assert!(parse_algorithm("none").is_err());
/// assert!(parse_algorithm("HS256").is_err());
/// ```
pub fn parse_algorithm(alg: &str) -> Result<Algorithm, AuthError> {
    if FORBIDDEN_ALGORITHMS.iter().any(|f| f.eq_ignore_ascii_case(alg)) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    if !SUPPORTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not a supported asymmetric algorithm"
        )));
    }

    Algorithm::from_str(alg)
        .map_err(|_| AuthError::unsupported_algorithm(format!("Algorithm '{alg}' is unknown")))
}

/// Returns the canonical JOSE name of an algorithm.
#[must_use]
pub fn algorithm_name(alg: Algorithm) -> &'static str {
    match alg {
        Algorithm::HS256 => "HS256",
        Algorithm::HS384 => "HS384",
        Algorithm::HS512 => "HS512",
        Algorithm::ES256 => "ES256",
        Algorithm::ES384 => "ES384",
        Algorithm::RS256 => "RS256",
        Algorithm::RS384 => "RS384",
        Algorithm::RS512 => "RS512",
        Algorithm::PS256 => "PS256",
        Algorithm::PS384 => "PS384",
        Algorithm::PS512 => "PS512",
        Algorithm::EdDSA => "EdDSA",
    }
}

/// The explicit set of algorithms a deployment accepts.
///
/// Constructed once from configuration; every entry has already passed
/// [`parse_algorithm`], so the policy can never contain `none` or an HMAC
/// algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmPolicy {
    allowed: Vec<Algorithm>,
}

impl AlgorithmPolicy {
    /// Builds a policy from algorithm names.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnsupportedAlgorithm`] if any name is forbidden or
    /// unsupported, or if the list is empty.
    pub fn from_names<I, S>(names: I) -> Result<Self, AuthError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowed = Vec::new();
        for name in names {
            let alg = parse_algorithm(name.as_ref().trim())?;
            if !allowed.contains(&alg) {
                allowed.push(alg);
            }
        }
        if allowed.is_empty() {
            return Err(AuthError::unsupported_algorithm("algorithm allow-list is empty"));
        }
        Ok(Self { allowed })
    }

    /// Checks a header algorithm name against the allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnsupportedAlgorithm`] if the algorithm is
    /// forbidden, unsupported, or simply not allowed by this policy.
    pub fn check(&self, alg: &str) -> Result<Algorithm, AuthError> {
        let parsed = parse_algorithm(alg)?;
        if !self.allowed.contains(&parsed) {
            return Err(AuthError::unsupported_algorithm(format!(
                "Algorithm '{alg}' is not in the accepted list"
            )));
        }
        Ok(parsed)
    }

    /// Returns `true` if the algorithm is allowed.
    #[must_use]
    pub fn allows(&self, alg: Algorithm) -> bool {
        self.allowed.contains(&alg)
    }

    /// Allowed algorithms in configuration order.
    #[must_use]
    pub fn algorithms(&self) -> &[Algorithm] {
        &self.allowed
    }
}

impl Default for AlgorithmPolicy {
    fn default() -> Self {
        Self { allowed: vec![Algorithm::RS256] }
    }
}

/// Validates a key id taken from an untrusted token header.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the kid is empty, longer than
/// [`MAX_KID_LENGTH`], contains control characters, or contains a path
/// traversal sequence.
pub fn validate_kid(kid: &str) -> Result<(), AuthError> {
    if kid.is_empty() {
        return Err(AuthError::malformed_token("key id is empty"));
    }
    if kid.len() > MAX_KID_LENGTH {
        return Err(AuthError::malformed_token(format!(
            "key id exceeds {MAX_KID_LENGTH} bytes"
        )));
    }
    if kid.chars().any(char::is_control) {
        return Err(AuthError::malformed_token("key id contains control characters"));
    }
    if kid.contains("..") || kid.contains('/') || kid.contains('\\') {
        return Err(AuthError::malformed_token("key id contains path characters"));
    }
    Ok(())
}
