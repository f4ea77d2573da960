//! Bearer token verification.
//!
//! [`TokenVerifier`] runs the full pipeline on a compact JWS:
//!
//! 1. structure: three segments, decodable header and JSON object payload
//! 2. algorithm: on the configured allow-list (never `none` or HMAC)
//! 3. key: resolved by kid through the [`SigningKeyCache`], one refresh on a miss
//! 4. signature
//! 5. `iss` equals the configured issuer
//! 6. `aud` (string or array) contains the configured audience
//! 7. `exp` / `nbf` against the current time with the configured skew
//! 8. groups claim normalized into a set and a [`Principal`] built
//!
//! Every failure is terminal and surfaces as an [`AuthError`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use gatekeeper_authn::{SigningKeyCache, TokenVerifier, VerifierConfig};
//!
//! # async fn example(config: VerifierConfig, token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let cache = Arc::new(SigningKeyCache::from_config(&config)?);
//! let verifier = TokenVerifier::new(Arc::new(config), cache);
//! let principal = verifier.verify(token).await?;
//! println!("verified {}", principal.subject());
//! # Ok(())
//! # }
//! ```

use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
    time::Instant,
};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Validation, decode};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    config::VerifierConfig,
    error::AuthError,
    principal::Principal,
    signing_key_cache::SigningKeyCache,
    validation::algorithm_name,
};

/// Maximum accepted token length in bytes.
pub const MAX_TOKEN_BYTES: usize = 8 * 1024;

/// The JOSE header fields the verifier reads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    /// Declared signing algorithm, as written in the token.
    pub alg: String,
    /// Key id.
    #[serde(default)]
    pub kid: Option<String>,
    /// Token type.
    #[serde(default)]
    pub typ: Option<String>,
}

fn split_token(token: &str) -> Result<[&str; 3], AuthError> {
    if token.len() > MAX_TOKEN_BYTES {
        return Err(AuthError::malformed_token(format!("token exceeds {MAX_TOKEN_BYTES} bytes")));
    }
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None)
            if !header.is_empty() && !payload.is_empty() =>
        {
            Ok([header, payload, signature])
        },
        _ => Err(AuthError::malformed_token("JWT must have 3 parts separated by dots")),
    }
}

/// Decodes the token header without verifying anything.
///
/// The header is parsed by hand rather than through `jsonwebtoken` so that
/// unknown or forbidden `alg` values (such as `none`) are reported as
/// [`AuthError::UnsupportedAlgorithm`] by the allow-list check instead of
/// as a parse failure.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the token does not have three
/// segments or the header is not valid base64url JSON.
pub fn decode_token_header(token: &str) -> Result<TokenHeader, AuthError> {
    let [header, _, _] = split_token(token)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|e| AuthError::malformed_token(format!("failed to decode JWT header: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::malformed_token(format!("failed to parse JWT header: {e}")))
}

/// Decodes the token payload without verifying the signature.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the payload is not a base64url
/// encoded JSON object.
pub fn decode_unverified_claims(token: &str) -> Result<Map<String, Value>, AuthError> {
    let [_, payload, _] = split_token(token)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| AuthError::malformed_token(format!("failed to decode JWT payload: {e}")))?;
    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AuthError::malformed_token("JWT payload is not a JSON object")),
        Err(e) => Err(AuthError::malformed_token(format!("failed to parse JWT claims: {e}"))),
    }
}

fn numeric_claim(claims: &Map<String, Value>, name: &str) -> Result<Option<i64>, AuthError> {
    match claims.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f.floor() as i64))
            .map(Some)
            .ok_or_else(|| AuthError::malformed_token(format!("claim '{name}' must be numeric"))),
    }
}

fn string_claim<'a>(claims: &'a Map<String, Value>, name: &str) -> Result<&'a str, AuthError> {
    match claims.get(name) {
        None | Some(Value::Null) => Err(AuthError::missing_claim(name)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(AuthError::malformed_token(format!("claim '{name}' must be a string"))),
    }
}

/// Checks issuer, audience and validity window.
///
/// `exp` is required and the token is expired once
/// `now >= exp + clock_skew`. `nbf` is optional and the token is not yet
/// valid while `now + clock_skew < nbf`.
///
/// # Errors
///
/// Returns, in check order, [`AuthError::IssuerMismatch`],
/// [`AuthError::AudienceMismatch`], [`AuthError::TokenExpired`] or
/// [`AuthError::TokenNotYetValid`], and [`AuthError::MalformedToken`] when
/// one of these claims is missing or has the wrong type.
pub fn validate_claims(
    claims: &Map<String, Value>,
    config: &VerifierConfig,
    now: DateTime<Utc>,
) -> Result<(), AuthError> {
    let issuer = string_claim(claims, "iss")?;
    if issuer != config.issuer() {
        return Err(AuthError::issuer_mismatch(config.issuer(), issuer));
    }

    let audience_ok = match claims.get("aud") {
        None | Some(Value::Null) => return Err(AuthError::missing_claim("aud")),
        Some(Value::String(aud)) => aud == config.audience(),
        Some(Value::Array(items)) => {
            items.iter().any(|item| item.as_str() == Some(config.audience()))
        },
        Some(_) => {
            return Err(AuthError::malformed_token("claim 'aud' must be a string or array"));
        },
    };
    if !audience_ok {
        return Err(AuthError::audience_mismatch(config.audience()));
    }

    let skew = i64::try_from(config.clock_skew().as_secs()).unwrap_or(i64::MAX);
    let now = now.timestamp();

    let exp = numeric_claim(claims, "exp")?.ok_or_else(|| AuthError::missing_claim("exp"))?;
    if now >= exp.saturating_add(skew) {
        return Err(AuthError::token_expired());
    }

    if let Some(nbf) = numeric_claim(claims, "nbf")?
        && now.saturating_add(skew) < nbf
    {
        return Err(AuthError::token_not_yet_valid());
    }

    Ok(())
}

/// Reads the groups claim as a set.
///
/// An absent or `null` claim yields an empty set. A single string is a
/// one-element set. Any other shape is malformed.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the claim is neither a string
/// nor an array of strings.
pub fn extract_groups(
    claims: &Map<String, Value>,
    claim: &str,
) -> Result<BTreeSet<String>, AuthError> {
    match claims.get(claim) {
        None | Some(Value::Null) => Ok(BTreeSet::new()),
        Some(Value::String(group)) => Ok(BTreeSet::from([group.clone()])),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_owned).ok_or_else(|| {
                    AuthError::malformed_token(format!("claim '{claim}' must contain only strings"))
                })
            })
            .collect(),
        Some(_) => Err(AuthError::malformed_token(format!(
            "claim '{claim}' must be an array of strings"
        ))),
    }
}

fn timestamp(claims: &Map<String, Value>, name: &str) -> Result<Option<DateTime<Utc>>, AuthError> {
    numeric_claim(claims, name)?
        .map(|secs| {
            DateTime::from_timestamp(secs, 0)
                .ok_or_else(|| AuthError::malformed_token(format!("claim '{name}' out of range")))
        })
        .transpose()
}

/// Builds the [`Principal`] from verified claims.
fn build_principal(claims: Map<String, Value>, groups_claim: &str) -> Result<Principal, AuthError> {
    let subject = string_claim(&claims, "sub")?;
    if subject.is_empty() {
        return Err(AuthError::missing_claim("sub"));
    }
    let subject = subject.to_owned();
    let groups = extract_groups(&claims, groups_claim)?;
    let issued_at = timestamp(&claims, "iat")?;
    let expires_at = timestamp(&claims, "exp")?;
    Ok(Principal::new(subject, groups, issued_at, expires_at, claims))
}

/// Verifies bearer tokens against one identity provider.
///
/// Holds the immutable configuration and a shared key cache; cheap to clone.
#[derive(Clone)]
pub struct TokenVerifier {
    config: Arc<VerifierConfig>,
    cache: Arc<SigningKeyCache>,
}

impl TokenVerifier {
    /// Creates a verifier over an existing key cache.
    #[must_use]
    pub fn new(config: Arc<VerifierConfig>, cache: Arc<SigningKeyCache>) -> Self {
        Self { config, cache }
    }

    /// Creates a verifier and an HTTP-backed key cache from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyFetch`] if the HTTP client cannot be built.
    pub fn from_config(config: VerifierConfig) -> Result<Self, AuthError> {
        let cache = Arc::new(SigningKeyCache::from_config(&config)?);
        Ok(Self::new(Arc::new(config), cache))
    }

    /// The verifier configuration.
    #[must_use]
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// The shared key cache.
    #[must_use]
    pub fn key_cache(&self) -> &Arc<SigningKeyCache> {
        &self.cache
    }

    /// Verifies `token` against the current time.
    ///
    /// # Errors
    ///
    /// See [`TokenVerifier::verify_at`].
    pub async fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        self.verify_at(token, Utc::now()).await
    }

    /// Verifies `token` as of `now`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedToken`]: bad structure, missing `kid`, or missing/mistyped claims
    /// - [`AuthError::UnsupportedAlgorithm`]: `alg` forbidden or not allowed
    /// - [`AuthError::UnknownKey`] / [`AuthError::KeyFetch`]: key resolution failed
    /// - [`AuthError::InvalidSignature`]: signature or key/algorithm mismatch
    /// - [`AuthError::IssuerMismatch`] / [`AuthError::AudienceMismatch`]
    /// - [`AuthError::TokenExpired`] / [`AuthError::TokenNotYetValid`]
    #[tracing::instrument(skip(self, token))]
    pub async fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Principal, AuthError> {
        let started = Instant::now();
        let result = self.run_pipeline(token, now).await;
        match &result {
            Ok(principal) => tracing::info!(
                target: "security",
                subject = %principal.subject(),
                groups = principal.groups().len(),
                duration_ms = started.elapsed().as_millis() as u64,
                "authentication succeeded"
            ),
            Err(err) => tracing::warn!(
                target: "security",
                kind = err.kind(),
                error = %err,
                "authentication failed"
            ),
        }
        result
    }

    async fn run_pipeline(&self, token: &str, now: DateTime<Utc>) -> Result<Principal, AuthError> {
        let header = decode_token_header(token)?;
        decode_unverified_claims(token)?;

        let algorithm = self.config.algorithms().check(&header.alg)?;
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| AuthError::malformed_token("JWT header has no kid"))?;

        let key = self.cache.get_key(kid).await?;
        if key.algorithm() != algorithm {
            tracing::warn!(
                target: "security",
                kid,
                token_alg = algorithm_name(algorithm),
                key_alg = algorithm_name(key.algorithm()),
                "token algorithm does not match key algorithm"
            );
            return Err(AuthError::invalid_signature());
        }

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let claims = decode::<Map<String, Value>>(token, key.decoding_key(), &validation)?.claims;

        validate_claims(&claims, &self.config, now)?;
        build_principal(claims, self.config.groups_claim())
    }
}
