//! Structured fuzz target for claim validation.
//!
//! Uses the `arbitrary` crate to generate token-shaped inputs and assembles
//! them into base64url segments before running the unverified decoding and
//! validation path. This reaches deeper than raw byte fuzzing because most
//! inputs survive structural checks.

#![no_main]

use arbitrary::Arbitrary;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use gatekeeper_authn::{
    VerifierConfig,
    jwt::{decode_token_header, decode_unverified_claims, extract_groups, validate_claims},
    validate_kid,
    validation::parse_algorithm,
};
use libfuzzer_sys::fuzz_target;
use serde_json::{Map, Value, json};

/// A numeric claim in the shapes identity providers actually emit, plus junk.
#[derive(Debug, Arbitrary)]
enum FuzzedNumber {
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

impl FuzzedNumber {
    fn to_value(&self) -> Value {
        match self {
            Self::Int(n) => json!(n),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Self::Text(s) => json!(s),
            Self::Null => Value::Null,
        }
    }
}

/// Audience as a string, a list, or a wrong type.
#[derive(Debug, Arbitrary)]
enum FuzzedAudience {
    Single(String),
    Many(Vec<String>),
    Number(i64),
}

/// Groups claim in every shape the verifier has to classify.
#[derive(Debug, Arbitrary)]
enum FuzzedGroups {
    Absent,
    Single(String),
    Many(Vec<String>),
    Mixed(Vec<Option<String>>),
    Object(String),
}

#[derive(Debug, Arbitrary)]
enum FuzzedAlg {
    EdDSA,
    RS256,
    ES256,
    None,
    HS256,
    Other(String),
}

impl FuzzedAlg {
    fn as_str(&self) -> &str {
        match self {
            Self::EdDSA => "EdDSA",
            Self::RS256 => "RS256",
            Self::ES256 => "ES256",
            Self::None => "none",
            Self::HS256 => "HS256",
            Self::Other(s) => s,
        }
    }
}

#[derive(Debug, Arbitrary)]
struct FuzzedToken {
    alg: FuzzedAlg,
    kid: Option<String>,
    use_expected_issuer: bool,
    iss: String,
    sub: Option<String>,
    aud: FuzzedAudience,
    exp: Option<FuzzedNumber>,
    nbf: Option<FuzzedNumber>,
    iat: Option<FuzzedNumber>,
    groups: FuzzedGroups,
    signature: Vec<u8>,
    now: i64,
}

const ISSUER: &str = "https://idp.example.com/oauth2/default";

fn build_token(input: &FuzzedToken) -> String {
    let mut header = Map::new();
    header.insert("alg".into(), json!(input.alg.as_str()));
    if let Some(kid) = &input.kid {
        header.insert("kid".into(), json!(kid));
    }

    let mut payload = Map::new();
    let iss = if input.use_expected_issuer { ISSUER } else { input.iss.as_str() };
    payload.insert("iss".into(), json!(iss));
    if let Some(sub) = &input.sub {
        payload.insert("sub".into(), json!(sub));
    }
    let aud = match &input.aud {
        FuzzedAudience::Single(s) => json!(s),
        FuzzedAudience::Many(v) => json!(v),
        FuzzedAudience::Number(n) => json!(n),
    };
    payload.insert("aud".into(), aud);
    for (name, value) in [("exp", &input.exp), ("nbf", &input.nbf), ("iat", &input.iat)] {
        if let Some(value) = value {
            payload.insert(name.into(), value.to_value());
        }
    }
    match &input.groups {
        FuzzedGroups::Absent => {},
        FuzzedGroups::Single(g) => {
            payload.insert("groups".into(), json!(g));
        },
        FuzzedGroups::Many(v) => {
            payload.insert("groups".into(), json!(v));
        },
        FuzzedGroups::Mixed(v) => {
            payload.insert("groups".into(), json!(v));
        },
        FuzzedGroups::Object(s) => {
            payload.insert("groups".into(), json!({ "name": s }));
        },
    }

    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap_or_default());
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap_or_default());
    let sig_b64 = URL_SAFE_NO_PAD.encode(&input.signature);
    format!("{header_b64}.{payload_b64}.{sig_b64}")
}

fuzz_target!(|input: FuzzedToken| {
    let Ok(config) = VerifierConfig::builder()
        .issuer(ISSUER)
        .audience("api://default")
        .jwks_url("https://idp.example.com/oauth2/default/v1/keys")
        .build()
    else {
        return;
    };
    let token = build_token(&input);
    let now = DateTime::<Utc>::from_timestamp(input.now, 0).unwrap_or_else(Utc::now);

    if let Ok(claims) = decode_unverified_claims(&token) {
        let _ = validate_claims(&claims, &config, now);
        let _ = extract_groups(&claims, config.groups_claim());
    }

    if let Ok(header) = decode_token_header(&token) {
        let _ = parse_algorithm(&header.alg);
        if let Some(kid) = &header.kid {
            let _ = validate_kid(kid);
        }
    }
});
