//! Shared test utilities for token verification.
//!
//! Provides Ed25519 key pair generation, JWK and key set builders, signed
//! and hand-crafted token builders, and a ready-made [`Principal`]
//! constructor for authorization tests. Feature-gated behind `testutil` so
//! it never ships in production builds.
//!
//! ```toml
//! [dev-dependencies]
//! gatekeeper-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use gatekeeper_authn::testutil::{TestSigner, TEST_AUDIENCE, TEST_ISSUER};
//!
//! let signer = TestSigner::new("kid-1");
//! let token = signer.sign(&signer.claims("alice", &["mcp_viewer"]));
//! ```
#![allow(clippy::expect_used)]

use std::{collections::BTreeSet, sync::Arc};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand_core::OsRng;
use serde_json::{Value, json};
use zeroize::Zeroizing;

use crate::{
    config::VerifierConfig,
    jwks::{Jwk, JwkSet, StaticKeySetSource},
    principal::Principal,
};

/// Issuer used by [`TestSigner::claims`] and [`test_config`].
pub const TEST_ISSUER: &str = "https://idp.example.com/oauth2/default";

/// Audience used by [`TestSigner::claims`] and [`test_config`].
pub const TEST_AUDIENCE: &str = "api://default";

/// Generates a test Ed25519 key pair.
///
/// Returns `(pkcs8_der, public_key_base64url)`: the private key in PKCS#8 DER
/// form for [`EncodingKey::from_ed_der`], and the raw 32-byte public key as
/// unpadded base64url, which is the JWK `x` member.
///
/// Each call generates a fresh random key pair.
pub fn generate_test_keypair() -> (Zeroizing<Vec<u8>>, String) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_key_b64 = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes());

    let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
    let mut pkcs8_der = Zeroizing::new(vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // INTEGER version 0
        0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
        0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
        0x04, 0x22, // OCTET STRING, 34 bytes
        0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
    ]);
    pkcs8_der.extend_from_slice(&*private_bytes);

    (pkcs8_der, public_key_b64)
}

/// Builds an `OKP`/`Ed25519` signing JWK for a base64url public key.
#[must_use]
pub fn ed25519_jwk(kid: &str, public_key_b64: &str) -> Jwk {
    Jwk {
        kty: "OKP".into(),
        kid: Some(kid.into()),
        alg: Some("EdDSA".into()),
        key_use: Some("sig".into()),
        n: None,
        e: None,
        crv: Some("Ed25519".into()),
        x: Some(public_key_b64.into()),
        y: None,
    }
}

/// Signs `claims` with an Ed25519 PKCS#8 key, setting `kid` in the header.
///
/// # Panics
///
/// Panics if encoding fails, which does not happen for valid keys.
pub fn sign_claims(pkcs8_der: &[u8], kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::EdDSA);
    header.kid = Some(kid.to_owned());
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_ed_der(pkcs8_der))
        .expect("failed to encode test JWT")
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The result is `{header_b64}.{payload_b64}.` with an empty signature, for
/// attack tests such as `alg: "none"` or algorithm confusion.
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_jwt(header_json: &Value, payload_json: &Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// A key pair bound to a kid, able to mint tokens and publish its JWK.
pub struct TestSigner {
    kid: String,
    pkcs8_der: Zeroizing<Vec<u8>>,
    public_key_b64: String,
}

impl TestSigner {
    /// Generates a fresh key pair for `kid`.
    #[must_use]
    pub fn new(kid: &str) -> Self {
        let (pkcs8_der, public_key_b64) = generate_test_keypair();
        Self { kid: kid.to_owned(), pkcs8_der, public_key_b64 }
    }

    /// The signer's kid.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The public JWK for this signer.
    #[must_use]
    pub fn jwk(&self) -> Jwk {
        ed25519_jwk(&self.kid, &self.public_key_b64)
    }

    /// A key set containing only this signer.
    #[must_use]
    pub fn jwks(&self) -> JwkSet {
        JwkSet { keys: vec![self.jwk()] }
    }

    /// Valid claims for [`TEST_ISSUER`] / [`TEST_AUDIENCE`], expiring in one hour.
    #[must_use]
    pub fn claims(&self, subject: &str, groups: &[&str]) -> Value {
        let now = Utc::now().timestamp();
        json!({
            "iss": TEST_ISSUER,
            "aud": TEST_AUDIENCE,
            "sub": subject,
            "iat": now,
            "exp": now + 3600,
            "groups": groups,
        })
    }

    /// Signs arbitrary claims with this signer's key and kid.
    #[must_use]
    pub fn sign(&self, claims: &Value) -> String {
        sign_claims(&self.pkcs8_der, &self.kid, claims)
    }

    /// Signs arbitrary claims under a different kid header.
    #[must_use]
    pub fn sign_as(&self, kid: &str, claims: &Value) -> String {
        sign_claims(&self.pkcs8_der, kid, claims)
    }

    /// Shorthand for a valid token with the given subject and groups.
    #[must_use]
    pub fn token(&self, subject: &str, groups: &[&str]) -> String {
        self.sign(&self.claims(subject, groups))
    }
}

/// Combines several signers into one key set.
#[must_use]
pub fn jwks_of(signers: &[&TestSigner]) -> JwkSet {
    JwkSet { keys: signers.iter().map(|s| s.jwk()).collect() }
}

/// An in-memory key source publishing the given signers.
#[must_use]
pub fn static_source(signers: &[&TestSigner]) -> Arc<StaticKeySetSource> {
    Arc::new(StaticKeySetSource::new(jwks_of(signers)))
}

/// A verifier configuration for [`TEST_ISSUER`] / [`TEST_AUDIENCE`] accepting `EdDSA`.
///
/// # Panics
///
/// Never, for the fixed values used here.
#[must_use]
pub fn test_config() -> VerifierConfig {
    VerifierConfig::builder()
        .issuer(TEST_ISSUER)
        .audience(TEST_AUDIENCE)
        .jwks_url("https://idp.example.com/oauth2/default/v1/keys")
        .allowed_algorithms(vec!["EdDSA".into()])
        .build()
        .expect("static test config is valid")
}

/// A principal with the given subject and groups, as the verifier would produce.
#[must_use]
pub fn principal(subject: &str, groups: &[&str]) -> Principal {
    let groups: BTreeSet<String> = groups.iter().map(|g| (*g).to_owned()).collect();
    let mut claims = serde_json::Map::new();
    claims.insert("sub".into(), Value::String(subject.to_owned()));
    claims.insert("groups".into(), json!(groups));
    Principal::new(subject.to_owned(), groups, None, None, claims)
}

/// Asserts that a [`Result<T, AuthError>`](crate::error::AuthError) is an
/// `Err` matching the given variant.
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use gatekeeper_authn::assert_auth_error;
/// use gatekeeper_authn::error::AuthError;
///
/// let result: Result<(), AuthError> = Err(AuthError::token_expired());
/// assert_auth_error!(result, TokenExpired);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}
