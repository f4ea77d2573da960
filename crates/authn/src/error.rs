//! Authentication error types.
//!
//! This module defines every way a bearer token can fail verification. All
//! variants are terminal for the request: callers surface them as a single
//! "unauthenticated" outcome and never fall back to an anonymous principal.

use thiserror::Error;

/// Token verification errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Token cannot be parsed, or a required claim is missing or mistyped.
    #[error("Malformed token: {message}")]
    MalformedToken {
        /// What was wrong with the token structure.
        message: String,
    },

    /// The declared algorithm is forbidden or not on the allow-list.
    #[error("Unsupported algorithm: {message}")]
    UnsupportedAlgorithm {
        /// Why the algorithm was refused.
        message: String,
    },

    /// The token's key id is absent from the key set, even after a refresh.
    #[error("Unknown signing key: {kid}")]
    UnknownKey {
        /// Key id from the token header.
        kid: String,
    },

    /// The identity provider's key endpoint could not be read.
    #[error("Key fetch failed: {message}")]
    KeyFetch {
        /// Description of the fetch failure.
        message: String,
        /// Whether the failure is transient (connection or timeout).
        transient: bool,
    },

    /// The signature does not verify against the resolved key.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The `iss` claim does not equal the expected issuer.
    #[error("Issuer mismatch: expected '{expected}', got '{actual}'")]
    IssuerMismatch {
        /// Configured issuer.
        expected: String,
        /// Issuer carried by the token.
        actual: String,
    },

    /// The `aud` claim does not contain the expected audience.
    #[error("Audience mismatch: expected '{expected}'")]
    AudienceMismatch {
        /// Configured audience.
        expected: String,
    },

    /// The token's `exp` lies in the past (beyond the allowed clock skew).
    #[error("Token expired")]
    TokenExpired,

    /// The token's `nbf` lies in the future (beyond the allowed clock skew).
    #[error("Token not yet valid")]
    TokenNotYetValid,
}

impl AuthError {
    /// Creates a [`AuthError::MalformedToken`].
    #[must_use]
    pub fn malformed_token(message: impl Into<String>) -> Self {
        Self::MalformedToken { message: message.into() }
    }

    /// Creates a [`AuthError::MalformedToken`] for a missing claim.
    #[must_use]
    pub fn missing_claim(claim: &str) -> Self {
        Self::MalformedToken { message: format!("missing required claim '{claim}'") }
    }

    /// Creates a [`AuthError::UnsupportedAlgorithm`].
    #[must_use]
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm { message: message.into() }
    }

    /// Creates a [`AuthError::UnknownKey`].
    #[must_use]
    pub fn unknown_key(kid: impl Into<String>) -> Self {
        Self::UnknownKey { kid: kid.into() }
    }

    /// Creates a non-transient [`AuthError::KeyFetch`] (bad document, bad status).
    #[must_use]
    pub fn key_fetch(message: impl Into<String>) -> Self {
        Self::KeyFetch { message: message.into(), transient: false }
    }

    /// Creates a transient [`AuthError::KeyFetch`] (unreachable endpoint, timeout).
    #[must_use]
    pub fn key_fetch_transient(message: impl Into<String>) -> Self {
        Self::KeyFetch { message: message.into(), transient: true }
    }

    /// Creates a [`AuthError::InvalidSignature`].
    #[must_use]
    pub fn invalid_signature() -> Self {
        Self::InvalidSignature
    }

    /// Creates a [`AuthError::IssuerMismatch`].
    #[must_use]
    pub fn issuer_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::IssuerMismatch { expected: expected.into(), actual: actual.into() }
    }

    /// Creates a [`AuthError::AudienceMismatch`].
    #[must_use]
    pub fn audience_mismatch(expected: impl Into<String>) -> Self {
        Self::AudienceMismatch { expected: expected.into() }
    }

    /// Creates a [`AuthError::TokenExpired`].
    #[must_use]
    pub fn token_expired() -> Self {
        Self::TokenExpired
    }

    /// Creates a [`AuthError::TokenNotYetValid`].
    #[must_use]
    pub fn token_not_yet_valid() -> Self {
        Self::TokenNotYetValid
    }

    /// Short, stable label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedToken { .. } => "malformed_token",
            Self::UnsupportedAlgorithm { .. } => "unsupported_algorithm",
            Self::UnknownKey { .. } => "unknown_key",
            Self::KeyFetch { .. } => "key_fetch",
            Self::InvalidSignature => "invalid_signature",
            Self::IssuerMismatch { .. } => "issuer_mismatch",
            Self::AudienceMismatch { .. } => "audience_mismatch",
            Self::TokenExpired => "token_expired",
            Self::TokenNotYetValid => "token_not_yet_valid",
        }
    }

    /// Returns `true` for key fetch failures caused by an unreachable endpoint.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::KeyFetch { transient: true, .. })
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            // The resolved key belongs to a different algorithm family than the
            // token claims; the key cannot have produced this signature.
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidKeyFormat => {
                AuthError::InvalidSignature
            },
            ErrorKind::InvalidAlgorithmName => {
                AuthError::unsupported_algorithm("algorithm name not recognised")
            },
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => AuthError::malformed_token("invalid JWT structure"),
            _ => AuthError::malformed_token(format!("JWT error: {err}")),
        }
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::malformed_token("test");
        assert_eq!(err.to_string(), "Malformed token: test");

        let err = AuthError::token_expired();
        assert_eq!(err.to_string(), "Token expired");

        let err = AuthError::missing_claim("sub");
        assert_eq!(err.to_string(), "Malformed token: missing required claim 'sub'");

        let err = AuthError::unknown_key("kid-1");
        assert_eq!(err.to_string(), "Unknown signing key: kid-1");

        let err = AuthError::issuer_mismatch("https://a", "https://b");
        assert_eq!(err.to_string(), "Issuer mismatch: expected 'https://a', got 'https://b'");
    }

    #[test]
    fn test_error_from_jsonwebtoken() {
        let jwt_err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidSignature);
        let auth_err: AuthError = jwt_err.into();
        assert!(matches!(auth_err, AuthError::InvalidSignature));

        let jwt_err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidToken);
        let auth_err: AuthError = jwt_err.into();
        assert!(matches!(auth_err, AuthError::MalformedToken { .. }));

        let jwt_err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidAlgorithm);
        let auth_err: AuthError = jwt_err.into();
        assert!(matches!(auth_err, AuthError::InvalidSignature));
    }

    #[test]
    fn test_transient_classification() {
        assert!(AuthError::key_fetch_transient("connection refused").is_transient());
        assert!(!AuthError::key_fetch("bad json").is_transient());
        assert!(!AuthError::InvalidSignature.is_transient());
    }

    #[test]
    fn test_kind_labels_are_distinct() {
        let errors = [
            AuthError::malformed_token("x"),
            AuthError::unsupported_algorithm("x"),
            AuthError::unknown_key("x"),
            AuthError::key_fetch("x"),
            AuthError::invalid_signature(),
            AuthError::issuer_mismatch("a", "b"),
            AuthError::audience_mismatch("a"),
            AuthError::token_expired(),
            AuthError::token_not_yet_valid(),
        ];
        let kinds: std::collections::HashSet<_> = errors.iter().map(AuthError::kind).collect();
        assert_eq!(kinds.len(), errors.len());
    }
}
