//! Identity provider key set documents and the sources that serve them.
//!
//! A key endpoint publishes a JSON Web Key Set (`{"keys": [...]}`). This
//! module parses that document into a [`SigningKeySet`], keeping only keys
//! that can verify an allowed algorithm, and defines [`KeySetSource`], the
//! seam between the key cache and the network.

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use ed25519_dalek::{PUBLIC_KEY_LENGTH, VerifyingKey};
use jsonwebtoken::{Algorithm, DecodingKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use url::Url;
use zeroize::Zeroizing;

use crate::{
    error::AuthError,
    validation::{AlgorithmPolicy, algorithm_name, parse_algorithm},
};

/// Maximum accepted key set document size.
pub const MAX_JWKS_BYTES: usize = 1024 * 1024;

/// Minimum RSA modulus size accepted, in bytes (2048 bits).
pub const MIN_RSA_MODULUS_BYTES: usize = 256;

/// A single JSON Web Key as published by the identity provider.
///
/// Only the public members needed for signature verification are modelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (`RSA`, `EC`, `OKP`).
    pub kty: String,
    /// Key id referenced by token headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Declared algorithm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Intended use (`sig` or `enc`).
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// RSA modulus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA public exponent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// Curve name for `EC` and `OKP` keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// Curve x coordinate, or the raw public key for `OKP`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// Curve y coordinate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// A JSON Web Key Set document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    /// Published keys.
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Parses a key set document.
    ///
    /// # Errors
    ///
    /// Returns a non-transient [`AuthError::KeyFetch`] if the document is
    /// larger than [`MAX_JWKS_BYTES`] or is not a key set.
    pub fn from_slice(body: &[u8]) -> Result<Self, AuthError> {
        if body.len() > MAX_JWKS_BYTES {
            return Err(AuthError::key_fetch(format!(
                "key set document exceeds {MAX_JWKS_BYTES} bytes"
            )));
        }
        serde_json::from_slice(body)
            .map_err(|e| AuthError::key_fetch(format!("malformed key set document: {e}")))
    }
}

/// A public key ready for signature verification.
#[derive(Clone)]
pub struct VerificationKey {
    kid: String,
    algorithm: Algorithm,
    decoding_key: DecodingKey,
}

impl VerificationKey {
    /// Key id.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The single algorithm this key verifies.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Decoding key for `jsonwebtoken`.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Converts a JWK into a verification key.
    ///
    /// When the JWK omits `alg`, it is inferred from the key type: `RSA`
    /// keys verify `RS256`, `OKP`/`Ed25519` keys verify `EdDSA` and `EC`
    /// keys verify `ES256` (P-256) or `ES384` (P-384).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnsupportedAlgorithm`] for a declared algorithm
    /// that is never accepted, and [`AuthError::KeyFetch`] describing why
    /// the key is otherwise unusable.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, AuthError> {
        let kid = jwk.kid.as_deref().unwrap_or_default();
        if let Some(key_use) = jwk.key_use.as_deref()
            && key_use != "sig"
        {
            return Err(AuthError::key_fetch(format!("key '{kid}' is not a signing key")));
        }

        let algorithm = match jwk.alg.as_deref() {
            Some(alg) => parse_algorithm(alg)?,
            None => infer_algorithm(jwk).ok_or_else(|| {
                AuthError::key_fetch(format!("cannot infer algorithm for '{kid}'"))
            })?,
        };

        Self::with_algorithm(jwk, algorithm).map_err(|rejection| {
            AuthError::key_fetch(format!("key '{kid}': {}", rejection.reason()))
        })
    }

    fn with_algorithm(jwk: &Jwk, algorithm: Algorithm) -> Result<Self, Rejection> {
        let kid = jwk
            .kid
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Rejection::Malformed("key has no kid".to_owned()))?
            .to_owned();
        let decoding_key = decoding_key_for(jwk, algorithm)?;
        Ok(Self { kid, algorithm, decoding_key })
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithm", &algorithm_name(self.algorithm))
            .finish_non_exhaustive()
    }
}

/// Why a signing key could not be turned into a verification key.
#[derive(Debug)]
enum Rejection {
    /// Decodes, but is below the accepted strength.
    Weak(String),
    /// Missing, undecodable or inconsistent key members.
    Malformed(String),
}

impl Rejection {
    fn reason(&self) -> &str {
        match self {
            Self::Weak(reason) | Self::Malformed(reason) => reason,
        }
    }
}

fn infer_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    match (jwk.kty.as_str(), jwk.crv.as_deref()) {
        ("RSA", _) => Some(Algorithm::RS256),
        ("OKP", Some("Ed25519")) => Some(Algorithm::EdDSA),
        ("EC", Some("P-256")) => Some(Algorithm::ES256),
        ("EC", Some("P-384")) => Some(Algorithm::ES384),
        _ => None,
    }
}

/// The algorithm a JWK declares or implies, if it is one we recognize.
fn declared_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    match jwk.alg.as_deref() {
        Some(alg) => parse_algorithm(alg).ok(),
        None => infer_algorithm(jwk),
    }
}

fn decoding_key_for(jwk: &Jwk, algorithm: Algorithm) -> Result<DecodingKey, Rejection> {
    let member = |name: &str, value: &Option<String>| {
        value.clone().ok_or_else(|| Rejection::Malformed(format!("missing '{name}' member")))
    };

    match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => {
            if jwk.kty != "RSA" {
                return Err(Rejection::Malformed(format!(
                    "kty '{}' cannot verify {}",
                    jwk.kty,
                    algorithm_name(algorithm)
                )));
            }
            let n = member("n", &jwk.n)?;
            let e = member("e", &jwk.e)?;
            let modulus = URL_SAFE_NO_PAD
                .decode(n.as_bytes())
                .map_err(|e| Rejection::Malformed(format!("bad modulus: {e}")))?;
            let significant = modulus.iter().skip_while(|b| **b == 0).count();
            if significant < MIN_RSA_MODULUS_BYTES {
                return Err(Rejection::Weak(format!(
                    "RSA modulus is {} bits, below 2048",
                    significant * 8
                )));
            }
            DecodingKey::from_rsa_components(&n, &e)
                .map_err(|e| Rejection::Malformed(e.to_string()))
        },
        Algorithm::EdDSA => {
            if jwk.kty != "OKP" || jwk.crv.as_deref() != Some("Ed25519") {
                return Err(Rejection::Malformed("EdDSA requires an OKP Ed25519 key".to_owned()));
            }
            let x = member("x", &jwk.x)?;
            check_ed25519_point(&x).map_err(Rejection::Malformed)?;
            DecodingKey::from_ed_components(&x).map_err(|e| Rejection::Malformed(e.to_string()))
        },
        Algorithm::ES256 | Algorithm::ES384 => {
            let expected = if algorithm == Algorithm::ES256 { "P-256" } else { "P-384" };
            if jwk.kty != "EC" || jwk.crv.as_deref() != Some(expected) {
                return Err(Rejection::Malformed(format!(
                    "{} requires an EC {expected} key",
                    algorithm_name(algorithm)
                )));
            }
            let x = member("x", &jwk.x)?;
            let y = member("y", &jwk.y)?;
            DecodingKey::from_ec_components(&x, &y)
                .map_err(|e| Rejection::Malformed(e.to_string()))
        },
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            Err(Rejection::Malformed("symmetric algorithms are never accepted".to_owned()))
        },
    }
}

/// Checks that `x` decodes to a valid Ed25519 point.
fn check_ed25519_point(x: &str) -> Result<(), String> {
    let bytes: Zeroizing<Vec<u8>> = Zeroizing::new(
        URL_SAFE_NO_PAD.decode(x.as_bytes()).map_err(|e| format!("bad Ed25519 key: {e}"))?,
    );
    let array: [u8; PUBLIC_KEY_LENGTH] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| format!("expected {PUBLIC_KEY_LENGTH} bytes, got {}", bytes.len()))?;
    VerifyingKey::from_bytes(&array).map_err(|e| format!("invalid Ed25519 key: {e}"))?;
    Ok(())
}

/// An immutable snapshot of the identity provider's signing keys.
///
/// Never contains a key whose algorithm is outside the policy it was built
/// with. A new snapshot replaces the old one as a whole; snapshots are never
/// merged or edited.
#[derive(Debug, Clone)]
pub struct SigningKeySet {
    keys: BTreeMap<String, Arc<VerificationKey>>,
    fetched_at: DateTime<Utc>,
}

impl SigningKeySet {
    /// Builds a key set from a JWKS document.
    ///
    /// Keys for other uses, keys with an unrecognized algorithm and keys
    /// whose algorithm the policy does not allow are skipped, as are RSA
    /// keys below 2048 bits. Duplicate kids keep the first usable entry.
    ///
    /// # Errors
    ///
    /// Returns a non-transient [`AuthError::KeyFetch`] if an allowed
    /// signing key has malformed material, or if a non-empty document
    /// yields no usable key. Either way the document must not replace a
    /// working key set.
    pub fn from_jwks(
        jwks: &JwkSet,
        policy: &AlgorithmPolicy,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self, AuthError> {
        let mut keys = BTreeMap::new();
        for jwk in &jwks.keys {
            if let Some(key_use) = jwk.key_use.as_deref()
                && key_use != "sig"
            {
                tracing::debug!(kid = ?jwk.kid, key_use, "skipping non-signing key");
                continue;
            }
            let Some(algorithm) = declared_algorithm(jwk) else {
                tracing::debug!(
                    kid = ?jwk.kid,
                    kty = %jwk.kty,
                    "skipping key with unrecognized algorithm"
                );
                continue;
            };
            if !policy.allows(algorithm) {
                tracing::debug!(
                    kid = ?jwk.kid,
                    alg = algorithm_name(algorithm),
                    "skipping key with algorithm outside the allow-list"
                );
                continue;
            }

            let key = match VerificationKey::with_algorithm(jwk, algorithm) {
                Ok(key) => key,
                Err(Rejection::Weak(reason)) => {
                    tracing::warn!(kid = ?jwk.kid, reason = %reason, "skipping weak key");
                    continue;
                },
                Err(Rejection::Malformed(reason)) => {
                    return Err(AuthError::key_fetch(format!(
                        "malformed key material for kid {:?}: {reason}",
                        jwk.kid.as_deref().unwrap_or_default()
                    )));
                },
            };
            if keys.contains_key(&key.kid) {
                tracing::warn!(kid = %key.kid, "duplicate kid in key set; keeping first entry");
                continue;
            }
            keys.insert(key.kid.clone(), Arc::new(key));
        }

        if keys.is_empty() && !jwks.keys.is_empty() {
            return Err(AuthError::key_fetch(format!(
                "no usable key among {} published under the algorithm allow-list",
                jwks.keys.len()
            )));
        }

        Ok(Self { keys, fetched_at })
    }

    /// Looks up a key by id.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<Arc<VerificationKey>> {
        self.keys.get(kid).cloned()
    }

    /// Returns `true` if the set holds `kid`.
    #[must_use]
    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    /// Key ids in ascending order.
    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Number of usable keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if no key is usable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// When the document was fetched.
    #[must_use]
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

/// Where the key cache gets key set documents from.
///
/// Implementations report unreachable endpoints and timeouts as transient
/// [`AuthError::KeyFetch`] errors and bad responses as non-transient ones.
#[async_trait]
pub trait KeySetSource: Send + Sync {
    /// Fetches the current key set document.
    async fn fetch(&self) -> Result<JwkSet, AuthError>;

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}

/// Fetches key sets from an HTTP(S) endpoint.
#[derive(Debug, Clone)]
pub struct HttpKeySetSource {
    client: reqwest::Client,
    url: Url,
}

impl HttpKeySetSource {
    /// Creates a source for `url`. Each request is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns a non-transient [`AuthError::KeyFetch`] if the HTTP client
    /// cannot be built.
    pub fn new(url: Url, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| AuthError::key_fetch(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, url })
    }

    /// The endpoint URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<JwkSet, AuthError> {
        let mut response = self
            .client
            .get(self.url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("key endpoint returned HTTP {status}");
            // Server-side failures and throttling are outages, not bad data.
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                AuthError::key_fetch_transient(message)
            } else {
                AuthError::key_fetch(message)
            });
        }

        let oversized =
            || AuthError::key_fetch(format!("key set document exceeds {MAX_JWKS_BYTES} bytes"));
        if let Some(len) = response.content_length()
            && len > MAX_JWKS_BYTES as u64
        {
            return Err(oversized());
        }

        // Chunked responses carry no length; stop reading at the cap.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(classify_transport_error)? {
            if body.len() + chunk.len() > MAX_JWKS_BYTES {
                return Err(oversized());
            }
            body.extend_from_slice(&chunk);
        }
        JwkSet::from_slice(&body)
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

fn classify_transport_error(err: reqwest::Error) -> AuthError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        AuthError::key_fetch_transient(format!("key endpoint unreachable: {err}"))
    } else {
        AuthError::key_fetch(format!("key endpoint request failed: {err}"))
    }
}

/// Serves a key set held in memory.
///
/// Useful for deployments that pin keys in configuration, and for tests that
/// simulate rotation with [`StaticKeySetSource::replace`].
#[derive(Debug, Default)]
pub struct StaticKeySetSource {
    jwks: Mutex<JwkSet>,
}

impl StaticKeySetSource {
    /// Creates a source serving `jwks`.
    #[must_use]
    pub fn new(jwks: JwkSet) -> Self {
        Self { jwks: Mutex::new(jwks) }
    }

    /// Replaces the served document.
    pub fn replace(&self, jwks: JwkSet) {
        *self.jwks.lock() = jwks;
    }
}

#[async_trait]
impl KeySetSource for StaticKeySetSource {
    async fn fetch(&self) -> Result<JwkSet, AuthError> {
        Ok(self.jwks.lock().clone())
    }

    fn describe(&self) -> String {
        "static key set".to_owned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::testutil::{ed25519_jwk, generate_test_keypair};

    fn rsa_jwk(kid: &str, modulus_len: usize, alg: Option<&str>) -> Jwk {
        let mut modulus = vec![0xC5; modulus_len];
        modulus[0] = 0xE1;
        Jwk {
            kty: "RSA".into(),
            kid: Some(kid.into()),
            alg: alg.map(str::to_owned),
            key_use: Some("sig".into()),
            n: Some(URL_SAFE_NO_PAD.encode(&modulus)),
            e: Some("AQAB".into()),
            crv: None,
            x: None,
            y: None,
        }
    }

    fn eddsa_policy() -> AlgorithmPolicy {
        AlgorithmPolicy::from_names(["EdDSA", "RS256"]).unwrap()
    }

    #[test]
    fn test_parse_okta_style_document() {
        let body = br#"{"keys":[{"kty":"RSA","alg":"RS256","kid":"abc","use":"sig","e":"AQAB","n":"xyz"}]}"#;
        let jwks = JwkSet::from_slice(body).unwrap();
        assert_eq!(jwks.keys.len(), 1);
        assert_eq!(jwks.keys[0].kid.as_deref(), Some("abc"));
        assert_eq!(jwks.keys[0].key_use.as_deref(), Some("sig"));
    }

    #[rstest]
    #[case(b"not json".as_slice())]
    #[case(br#"{"no_keys": []}"#.as_slice())]
    #[case(br#"{"keys": {"kty": "RSA"}}"#.as_slice())]
    fn test_malformed_document_is_non_transient_key_fetch(#[case] body: &[u8]) {
        let err = JwkSet::from_slice(body).unwrap_err();
        assert!(matches!(err, AuthError::KeyFetch { transient: false, .. }), "{err:?}");
    }

    #[test]
    fn test_oversized_document_rejected() {
        let body = vec![b' '; MAX_JWKS_BYTES + 1];
        assert!(JwkSet::from_slice(&body).is_err());
    }

    #[test]
    fn test_ed25519_jwk_converts() {
        let (_, public) = generate_test_keypair();
        let key = VerificationKey::from_jwk(&ed25519_jwk("ed-1", &public)).unwrap();
        assert_eq!(key.kid(), "ed-1");
        assert_eq!(key.algorithm(), Algorithm::EdDSA);
        assert!(format!("{key:?}").contains("ed-1"));
    }

    #[test]
    fn test_algorithm_inferred_when_absent() {
        let (_, public) = generate_test_keypair();
        let mut jwk = ed25519_jwk("ed-1", &public);
        jwk.alg = None;
        assert_eq!(VerificationKey::from_jwk(&jwk).unwrap().algorithm(), Algorithm::EdDSA);

        let rsa = rsa_jwk("rsa-1", 256, None);
        assert_eq!(VerificationKey::from_jwk(&rsa).unwrap().algorithm(), Algorithm::RS256);
    }

    #[test]
    fn test_short_rsa_modulus_rejected() {
        let err = VerificationKey::from_jwk(&rsa_jwk("rsa-weak", 128, Some("RS256"))).unwrap_err();
        assert!(err.to_string().contains("below 2048"), "{err}");
    }

    #[test]
    fn test_mismatched_kty_and_alg_rejected() {
        let (_, public) = generate_test_keypair();
        let mut jwk = ed25519_jwk("ed-1", &public);
        jwk.alg = Some("RS256".into());
        assert!(VerificationKey::from_jwk(&jwk).is_err());
    }

    #[rstest]
    #[case("AAAA")]
    #[case("not base64!")]
    fn test_bad_ed25519_material_rejected(#[case] x: &str) {
        let mut jwk = ed25519_jwk("ed-1", "placeholder");
        jwk.x = Some(x.into());
        assert!(VerificationKey::from_jwk(&jwk).is_err());
    }

    #[test]
    fn test_encryption_keys_rejected() {
        let (_, public) = generate_test_keypair();
        let mut jwk = ed25519_jwk("ed-1", &public);
        jwk.key_use = Some("enc".into());
        assert!(VerificationKey::from_jwk(&jwk).is_err());
    }

    #[rstest]
    #[case(Some("HS256"))]
    #[case(Some("none"))]
    fn test_symmetric_or_none_jwk_rejected(#[case] alg: Option<&str>) {
        let jwk = Jwk {
            kty: "oct".into(),
            kid: Some("sym".into()),
            alg: alg.map(str::to_owned),
            key_use: None,
            n: None,
            e: None,
            crv: None,
            x: Some("c2VjcmV0".into()),
            y: None,
        };
        assert!(matches!(
            VerificationKey::from_jwk(&jwk),
            Err(AuthError::UnsupportedAlgorithm { .. })
        ));
    }

    #[test]
    fn test_key_set_skips_keys_outside_policy() {
        let (_, public) = generate_test_keypair();
        let jwks = JwkSet {
            keys: vec![
                ed25519_jwk("ed-1", &public),
                rsa_jwk("rsa-1", 256, Some("RS384")),
                rsa_jwk("rsa-2", 256, Some("RS256")),
            ],
        };
        let set = SigningKeySet::from_jwks(&jwks, &eddsa_policy(), Utc::now()).unwrap();
        assert_eq!(set.kids().collect::<Vec<_>>(), vec!["ed-1", "rsa-2"]);
        assert!(!set.contains("rsa-1"));
    }

    #[test]
    fn test_key_set_never_contains_disallowed_algorithm() {
        let (_, public) = generate_test_keypair();
        let jwks = JwkSet { keys: vec![ed25519_jwk("ed-1", &public), rsa_jwk("rsa-1", 256, None)] };
        let set =
            SigningKeySet::from_jwks(&jwks, &AlgorithmPolicy::default(), Utc::now()).unwrap();
        assert_eq!(set.kids().collect::<Vec<_>>(), vec!["rsa-1"]);
    }

    #[test]
    fn test_document_without_usable_keys_is_key_fetch() {
        let (_, public) = generate_test_keypair();
        let jwks = JwkSet { keys: vec![ed25519_jwk("ed-1", &public)] };
        let err = SigningKeySet::from_jwks(&jwks, &AlgorithmPolicy::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, AuthError::KeyFetch { transient: false, .. }), "{err:?}");

        let empty = SigningKeySet::from_jwks(&JwkSet::default(), &eddsa_policy(), Utc::now());
        assert!(empty.unwrap().is_empty());
    }

    #[rstest]
    #[case::bad_base64(Some("!!!not-base64!!!"))]
    #[case::wrong_length(Some("AAAA"))]
    #[case::missing_x(None)]
    fn test_malformed_allowed_key_fails_the_set(#[case] x: Option<&str>) {
        let (_, public) = generate_test_keypair();
        let mut broken = ed25519_jwk("ed-2", &public);
        broken.x = x.map(str::to_owned);
        let jwks = JwkSet { keys: vec![ed25519_jwk("ed-1", &public), broken] };

        let err = SigningKeySet::from_jwks(&jwks, &eddsa_policy(), Utc::now()).unwrap_err();
        assert!(matches!(err, AuthError::KeyFetch { transient: false, .. }), "{err:?}");
        assert!(err.to_string().contains("ed-2"), "{err}");
    }

    #[test]
    fn test_weak_and_encryption_keys_are_skipped() {
        let (_, public) = generate_test_keypair();
        let mut enc = ed25519_jwk("enc-1", "!!!not-base64!!!");
        enc.key_use = Some("enc".into());
        let jwks = JwkSet {
            keys: vec![enc, rsa_jwk("rsa-weak", 128, Some("RS256")), ed25519_jwk("ed-1", &public)],
        };

        let set = SigningKeySet::from_jwks(&jwks, &eddsa_policy(), Utc::now()).unwrap();
        assert_eq!(set.kids().collect::<Vec<_>>(), vec!["ed-1"]);
    }

    #[test]
    fn test_key_set_keeps_first_duplicate() {
        let (_, first) = generate_test_keypair();
        let (_, second) = generate_test_keypair();
        let jwks = JwkSet { keys: vec![ed25519_jwk("dup", &first), ed25519_jwk("dup", &second)] };
        let set = SigningKeySet::from_jwks(&jwks, &eddsa_policy(), Utc::now()).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn test_static_source_replace() {
        let (_, public) = generate_test_keypair();
        let source = StaticKeySetSource::new(JwkSet::default());
        assert!(source.fetch().await.unwrap().keys.is_empty());

        source.replace(JwkSet { keys: vec![ed25519_jwk("ed-1", &public)] });
        assert_eq!(source.fetch().await.unwrap().keys.len(), 1);
    }
}
