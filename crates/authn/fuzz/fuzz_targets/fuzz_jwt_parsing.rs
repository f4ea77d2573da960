//! Fuzz target for token parsing and claim validation.
//!
//! Feeds arbitrary byte strings as bearer tokens to the unverified decoding
//! and validation functions. Every input must produce either `Ok(...)` or
//! `Err(AuthError)`; panics and hangs are bugs.

#![no_main]

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use gatekeeper_authn::{
    VerifierConfig,
    jwt::{decode_token_header, decode_unverified_claims, extract_groups, validate_claims},
    validate_kid,
    validation::parse_algorithm,
};
use libfuzzer_sys::fuzz_target;

fn config() -> &'static Option<VerifierConfig> {
    static CONFIG: OnceLock<Option<VerifierConfig>> = OnceLock::new();
    CONFIG.get_or_init(|| {
        VerifierConfig::builder()
            .issuer("https://idp.example.com/oauth2/default")
            .audience("api://default")
            .jwks_url("https://idp.example.com/oauth2/default/v1/keys")
            .build()
            .ok()
    })
}

fuzz_target!(|data: &[u8]| {
    // Bearer tokens are always UTF-8
    let Ok(token) = std::str::from_utf8(data) else {
        return;
    };

    let header_result = decode_token_header(token);
    let claims_result = decode_unverified_claims(token);

    if let (Ok(claims), Some(config)) = (&claims_result, config()) {
        let _ = validate_claims(claims, config, Utc::now());
        let _ = validate_claims(claims, config, DateTime::<Utc>::MIN_UTC);
        let _ = validate_claims(claims, config, DateTime::<Utc>::MAX_UTC);
        let _ = extract_groups(claims, config.groups_claim());
    }

    if let Ok(header) = &header_result {
        let _ = parse_algorithm(&header.alg);
        if let Some(kid) = &header.kid {
            let _ = validate_kid(kid);
        }
    }
});
