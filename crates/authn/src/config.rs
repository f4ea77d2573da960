//! Verifier configuration and enforcement state.
//!
//! [`VerifierConfig`] is built once at startup and shared by reference with
//! the verifier and the key cache. [`Enforcement`] makes the "no identity
//! provider configured" case an explicit value instead of an implicit
//! allow-all.
//!
//! # Environment
//!
//! [`Enforcement::from_env`] reads:
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `OKTA_ISSUER` | expected `iss` |
//! | `OKTA_AUDIENCE` | expected `aud` entry |
//! | `OKTA_JWKS_URI` | key endpoint (default `{issuer}/v1/keys`) |
//! | `OKTA_GROUPS_CLAIM` | claim holding group names (default `groups`) |
//! | `OKTA_ALLOWED_ALGORITHMS` | comma separated allow-list (default `RS256`) |
//! | `OKTA_CLOCK_SKEW` | seconds or a humantime duration (default `30s`) |

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::validation::{AlgorithmPolicy, DEFAULT_ALLOWED_ALGORITHMS};

/// Default claim name carrying group memberships.
pub const DEFAULT_GROUPS_CLAIM: &str = "groups";

/// Default tolerance applied to `exp` and `nbf` checks.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(30);

/// Upper bound on the configurable clock skew.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Default timeout for a single key endpoint fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default age after which the key set is re-fetched on next use.
pub const DEFAULT_KEY_TTL: Duration = Duration::from_secs(300);

/// Default maximum age of a key set served while the endpoint is unreachable.
pub const DEFAULT_FALLBACK_TTL: Duration = Duration::from_secs(3_600);

/// Environment variable names consulted by [`Enforcement::from_env`].
pub mod env {
    /// Expected issuer.
    pub const ISSUER: &str = "OKTA_ISSUER";
    /// Expected audience.
    pub const AUDIENCE: &str = "OKTA_AUDIENCE";
    /// Key endpoint URL.
    pub const JWKS_URI: &str = "OKTA_JWKS_URI";
    /// Groups claim name.
    pub const GROUPS_CLAIM: &str = "OKTA_GROUPS_CLAIM";
    /// Comma separated algorithm allow-list.
    pub const ALLOWED_ALGORITHMS: &str = "OKTA_ALLOWED_ALGORITHMS";
    /// Clock skew tolerance.
    pub const CLOCK_SKEW: &str = "OKTA_CLOCK_SKEW";
}

/// Configuration errors. All of them block startup.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required field is empty or absent.
    #[error("missing required setting '{field}'")]
    Missing {
        /// Setting name.
        field: &'static str,
    },

    /// A field failed to parse or validate.
    #[error("invalid value for '{field}': {message}")]
    Invalid {
        /// Setting name.
        field: &'static str,
        /// What was wrong.
        message: String,
    },

    /// A duration exceeds its allowed maximum.
    #[error("'{field}' must be at most {max}, got {value}")]
    AboveMaximum {
        /// Setting name.
        field: &'static str,
        /// Maximum allowed value.
        max: String,
        /// Provided value.
        value: String,
    },

    /// Only part of the identity provider settings were supplied.
    #[error("incomplete identity provider configuration: '{present}' is set but '{missing}' is not")]
    Incomplete {
        /// Setting that was found.
        present: &'static str,
        /// Setting that is required alongside it.
        missing: &'static str,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid { field, message: message.into() }
    }
}

/// Immutable token verification settings.
///
/// Construct with [`VerifierConfig::builder`] or deserialize from a config
/// file; both paths run the same validation.
///
/// ```
/// use std::time::Duration;
/// use gatekeeper_authn::VerifierConfig;
///
/// let config = VerifierConfig::builder()
///     .issuer("https://example.okta.com/oauth2/default")
///     .audience("api://default")
///     .jwks_url("https://example.okta.com/oauth2/default/v1/keys")
///     .clock_skew(Duration::from_secs(10))
///     .build()
///     .unwrap();
/// assert_eq!(config.groups_claim(), "groups");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "VerifierSettings")]
pub struct VerifierConfig {
    issuer: String,
    audience: String,
    jwks_url: Url,
    groups_claim: String,
    algorithms: AlgorithmPolicy,
    clock_skew: Duration,
    fetch_timeout: Duration,
    key_ttl: Duration,
    fallback_ttl: Duration,
}

#[bon::bon]
impl VerifierConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the issuer or audience is empty, the key
    /// endpoint is not an `http(s)` URL, the algorithm list contains a
    /// forbidden or unknown algorithm, `clock_skew` exceeds
    /// [`MAX_CLOCK_SKEW`], or a timeout is zero.
    #[builder]
    pub fn new(
        #[builder(into)] issuer: String,
        #[builder(into)] audience: String,
        #[builder(into)] jwks_url: String,
        #[builder(into, default = DEFAULT_GROUPS_CLAIM.to_owned())] groups_claim: String,
        #[builder(default = DEFAULT_ALLOWED_ALGORITHMS.iter().map(|a| (*a).to_owned()).collect())]
        allowed_algorithms: Vec<String>,
        #[builder(default = DEFAULT_CLOCK_SKEW)] clock_skew: Duration,
        #[builder(default = DEFAULT_FETCH_TIMEOUT)] fetch_timeout: Duration,
        #[builder(default = DEFAULT_KEY_TTL)] key_ttl: Duration,
        #[builder(default = DEFAULT_FALLBACK_TTL)] fallback_ttl: Duration,
    ) -> Result<Self, ConfigError> {
        let issuer = issuer.trim().to_owned();
        if issuer.is_empty() {
            return Err(ConfigError::Missing { field: "issuer" });
        }
        let audience = audience.trim().to_owned();
        if audience.is_empty() {
            return Err(ConfigError::Missing { field: "audience" });
        }

        let jwks_url = Url::parse(jwks_url.trim())
            .map_err(|e| ConfigError::invalid("jwks_url", e.to_string()))?;
        if !matches!(jwks_url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "jwks_url",
                format!("unsupported scheme '{}'", jwks_url.scheme()),
            ));
        }

        let groups_claim = groups_claim.trim().to_owned();
        if groups_claim.is_empty() {
            return Err(ConfigError::Missing { field: "groups_claim" });
        }

        let algorithms = AlgorithmPolicy::from_names(&allowed_algorithms)
            .map_err(|e| ConfigError::invalid("allowed_algorithms", e.to_string()))?;

        if clock_skew > MAX_CLOCK_SKEW {
            return Err(ConfigError::AboveMaximum {
                field: "clock_skew",
                max: humantime::format_duration(MAX_CLOCK_SKEW).to_string(),
                value: humantime::format_duration(clock_skew).to_string(),
            });
        }
        if fetch_timeout.is_zero() {
            return Err(ConfigError::invalid("fetch_timeout", "must be greater than zero"));
        }
        if key_ttl.is_zero() {
            return Err(ConfigError::invalid("key_ttl", "must be greater than zero"));
        }
        if fallback_ttl < key_ttl {
            return Err(ConfigError::invalid("fallback_ttl", "must not be shorter than key_ttl"));
        }

        Ok(Self {
            issuer,
            audience,
            jwks_url,
            groups_claim,
            algorithms,
            clock_skew,
            fetch_timeout,
            key_ttl,
            fallback_ttl,
        })
    }

    /// Expected `iss` value.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Expected `aud` entry.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Identity provider key endpoint.
    #[must_use]
    pub fn jwks_url(&self) -> &Url {
        &self.jwks_url
    }

    /// Claim name carrying group memberships.
    #[must_use]
    pub fn groups_claim(&self) -> &str {
        &self.groups_claim
    }

    /// Accepted signing algorithms.
    #[must_use]
    pub fn algorithms(&self) -> &AlgorithmPolicy {
        &self.algorithms
    }

    /// Tolerance for `exp` / `nbf`.
    #[must_use]
    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }

    /// Timeout for one key endpoint request.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Soft staleness bound for the cached key set.
    #[must_use]
    pub fn key_ttl(&self) -> Duration {
        self.key_ttl
    }

    /// Hard staleness bound while the endpoint is unreachable.
    #[must_use]
    pub fn fallback_ttl(&self) -> Duration {
        self.fallback_ttl
    }
}

/// Serialized form of [`VerifierConfig`].
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VerifierSettings {
    issuer: String,
    audience: String,
    jwks_url: String,
    #[serde(default = "default_groups_claim")]
    groups_claim: String,
    #[serde(default = "default_algorithms")]
    allowed_algorithms: Vec<String>,
    #[serde(default = "default_clock_skew", with = "humantime_serde")]
    clock_skew: Duration,
    #[serde(default = "default_fetch_timeout", with = "humantime_serde")]
    fetch_timeout: Duration,
    #[serde(default = "default_key_ttl", with = "humantime_serde")]
    key_ttl: Duration,
    #[serde(default = "default_fallback_ttl", with = "humantime_serde")]
    fallback_ttl: Duration,
}

fn default_groups_claim() -> String {
    DEFAULT_GROUPS_CLAIM.to_owned()
}

fn default_algorithms() -> Vec<String> {
    DEFAULT_ALLOWED_ALGORITHMS.iter().map(|a| (*a).to_owned()).collect()
}

fn default_clock_skew() -> Duration {
    DEFAULT_CLOCK_SKEW
}

fn default_fetch_timeout() -> Duration {
    DEFAULT_FETCH_TIMEOUT
}

fn default_key_ttl() -> Duration {
    DEFAULT_KEY_TTL
}

fn default_fallback_ttl() -> Duration {
    DEFAULT_FALLBACK_TTL
}

impl TryFrom<VerifierSettings> for VerifierConfig {
    type Error = ConfigError;

    fn try_from(s: VerifierSettings) -> Result<Self, Self::Error> {
        VerifierConfig::builder()
            .issuer(s.issuer)
            .audience(s.audience)
            .jwks_url(s.jwks_url)
            .groups_claim(s.groups_claim)
            .allowed_algorithms(s.allowed_algorithms)
            .clock_skew(s.clock_skew)
            .fetch_timeout(s.fetch_timeout)
            .key_ttl(s.key_ttl)
            .fallback_ttl(s.fallback_ttl)
            .build()
    }
}

/// Whether bearer tokens are verified at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enforcement {
    /// Tokens are verified against the given identity provider.
    Enabled(VerifierConfig),
    /// No identity provider is configured. Every decision made in this state
    /// is audited as unenforced.
    Disabled,
}

impl Enforcement {
    /// Reads enforcement settings from the process environment.
    ///
    /// # Errors
    ///
    /// See [`Enforcement::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads enforcement settings through an arbitrary lookup function.
    ///
    /// Blank values count as absent. When neither issuer, audience nor key
    /// endpoint is set the result is [`Enforcement::Disabled`], which is
    /// logged at error level.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Incomplete`] when only some of the identity
    /// provider settings are present, and any validation error from
    /// [`VerifierConfig::builder`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let issuer = get(env::ISSUER);
        let audience = get(env::AUDIENCE);
        let jwks_uri = get(env::JWKS_URI);

        let (issuer, audience) = match (issuer, audience) {
            (None, None) => {
                if jwks_uri.is_some() {
                    return Err(ConfigError::Incomplete {
                        present: env::JWKS_URI,
                        missing: env::ISSUER,
                    });
                }
                tracing::error!(
                    target: "security",
                    "identity provider not configured; token enforcement is DISABLED"
                );
                return Ok(Self::Disabled);
            },
            (Some(_), None) => {
                return Err(ConfigError::Incomplete {
                    present: env::ISSUER,
                    missing: env::AUDIENCE,
                });
            },
            (None, Some(_)) => {
                return Err(ConfigError::Incomplete {
                    present: env::AUDIENCE,
                    missing: env::ISSUER,
                });
            },
            (Some(issuer), Some(audience)) => (issuer, audience),
        };

        let jwks_url =
            jwks_uri.unwrap_or_else(|| format!("{}/v1/keys", issuer.trim_end_matches('/')));

        let allowed_algorithms = match get(env::ALLOWED_ALGORITHMS) {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_owned)
                .collect(),
            None => default_algorithms(),
        };

        let clock_skew = match get(env::CLOCK_SKEW) {
            Some(raw) => parse_skew(&raw)?,
            None => DEFAULT_CLOCK_SKEW,
        };

        let config = VerifierConfig::builder()
            .issuer(issuer)
            .audience(audience)
            .jwks_url(jwks_url)
            .groups_claim(get(env::GROUPS_CLAIM).unwrap_or_else(default_groups_claim))
            .allowed_algorithms(allowed_algorithms)
            .clock_skew(clock_skew)
            .build()?;

        Ok(Self::Enabled(config))
    }

    /// Returns `true` when tokens are verified.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    /// Verifier settings, if enforcement is enabled.
    #[must_use]
    pub fn config(&self) -> Option<&VerifierConfig> {
        match self {
            Self::Enabled(config) => Some(config),
            Self::Disabled => None,
        }
    }
}

/// Parses a skew given as plain seconds or as a humantime duration.
fn parse_skew(raw: &str) -> Result<Duration, ConfigError> {
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).map_err(|e| ConfigError::invalid("clock_skew", e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::collections::HashMap;

    use jsonwebtoken::Algorithm;
    use rstest::rstest;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        move |name| map.get(name).cloned()
    }

    macro_rules! base_builder {
        () => {
            VerifierConfig::builder()
                .issuer("https://idp.example.com/oauth2/default")
                .audience("api://default")
                .jwks_url("https://idp.example.com/oauth2/default/v1/keys")
        };
    }

    #[test]
    fn test_builder_defaults() {
        let config = base_builder!().build().unwrap();
        assert_eq!(config.groups_claim(), DEFAULT_GROUPS_CLAIM);
        assert_eq!(config.clock_skew(), DEFAULT_CLOCK_SKEW);
        assert_eq!(config.fetch_timeout(), DEFAULT_FETCH_TIMEOUT);
        assert_eq!(config.key_ttl(), DEFAULT_KEY_TTL);
        assert_eq!(config.fallback_ttl(), DEFAULT_FALLBACK_TTL);
        assert_eq!(config.algorithms().algorithms(), &[Algorithm::RS256]);
    }

    #[test]
    fn test_builder_rejects_empty_issuer() {
        let err = VerifierConfig::builder()
            .issuer("  ")
            .audience("api://default")
            .jwks_url("https://idp.example.com/keys")
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::Missing { field: "issuer" });
    }

    #[rstest]
    #[case("not a url")]
    #[case("ftp://idp.example.com/keys")]
    #[case("file:///etc/keys.json")]
    fn test_builder_rejects_bad_jwks_url(#[case] url: &str) {
        let err = VerifierConfig::builder()
            .issuer("https://idp.example.com")
            .audience("api://default")
            .jwks_url(url)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "jwks_url", .. }), "{err:?}");
    }

    #[test]
    fn test_builder_rejects_forbidden_algorithm() {
        let err = base_builder!()
            .allowed_algorithms(vec!["RS256".into(), "none".into()])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "allowed_algorithms", .. }));
    }

    #[test]
    fn test_builder_rejects_excessive_skew() {
        let err = base_builder!().clock_skew(Duration::from_secs(301)).build().unwrap_err();
        assert!(matches!(err, ConfigError::AboveMaximum { field: "clock_skew", .. }));
        assert!(base_builder!().clock_skew(MAX_CLOCK_SKEW).build().is_ok());
    }

    #[test]
    fn test_builder_rejects_fallback_shorter_than_ttl() {
        let err = base_builder!()
            .key_ttl(Duration::from_secs(600))
            .fallback_ttl(Duration::from_secs(60))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "fallback_ttl", .. }));
    }

    #[test]
    fn test_deserialize_with_humantime_durations() {
        let config: VerifierConfig = serde_json::from_value(serde_json::json!({
            "issuer": "https://idp.example.com",
            "audience": "api://default",
            "jwks_url": "https://idp.example.com/v1/keys",
            "allowed_algorithms": ["RS256", "EdDSA"],
            "clock_skew": "45s",
            "key_ttl": "10m",
        }))
        .unwrap();
        assert_eq!(config.clock_skew(), Duration::from_secs(45));
        assert_eq!(config.key_ttl(), Duration::from_secs(600));
        assert!(config.algorithms().allows(Algorithm::EdDSA));
    }

    #[test]
    fn test_deserialize_runs_validation() {
        let result: Result<VerifierConfig, _> = serde_json::from_value(serde_json::json!({
            "issuer": "https://idp.example.com",
            "audience": "api://default",
            "jwks_url": "https://idp.example.com/v1/keys",
            "allowed_algorithms": ["HS256"],
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_enforcement_disabled_when_nothing_set() {
        let enforcement = Enforcement::from_lookup(lookup(&[])).unwrap();
        assert_eq!(enforcement, Enforcement::Disabled);
        assert!(!enforcement.is_enabled());
        assert!(enforcement.config().is_none());
    }

    #[test]
    fn test_enforcement_blank_values_count_as_absent() {
        let enforcement =
            Enforcement::from_lookup(lookup(&[(env::ISSUER, ""), (env::AUDIENCE, "  ")])).unwrap();
        assert_eq!(enforcement, Enforcement::Disabled);
    }

    #[rstest]
    #[case(&[(env::ISSUER, "https://idp.example.com")], env::ISSUER, env::AUDIENCE)]
    #[case(&[(env::AUDIENCE, "api://default")], env::AUDIENCE, env::ISSUER)]
    #[case(&[(env::JWKS_URI, "https://idp.example.com/keys")], env::JWKS_URI, env::ISSUER)]
    fn test_enforcement_partial_configuration_is_an_error(
        #[case] pairs: &[(&str, &str)],
        #[case] present: &'static str,
        #[case] missing: &'static str,
    ) {
        let err = Enforcement::from_lookup(lookup(pairs)).unwrap_err();
        assert_eq!(err, ConfigError::Incomplete { present, missing });
    }

    #[test]
    fn test_enforcement_enabled_derives_jwks_uri() {
        let enforcement = Enforcement::from_lookup(lookup(&[
            (env::ISSUER, "https://idp.example.com/oauth2/default/"),
            (env::AUDIENCE, "api://default"),
        ]))
        .unwrap();
        let config = enforcement.config().unwrap();
        assert_eq!(
            config.jwks_url().as_str(),
            "https://idp.example.com/oauth2/default/v1/keys"
        );
        assert_eq!(config.issuer(), "https://idp.example.com/oauth2/default/");
    }

    #[test]
    fn test_enforcement_reads_optional_settings() {
        let enforcement = Enforcement::from_lookup(lookup(&[
            (env::ISSUER, "https://idp.example.com"),
            (env::AUDIENCE, "api://default"),
            (env::JWKS_URI, "https://keys.example.com/jwks.json"),
            (env::GROUPS_CLAIM, "roles"),
            (env::ALLOWED_ALGORITHMS, "RS256, EdDSA,"),
            (env::CLOCK_SKEW, "2m"),
        ]))
        .unwrap();
        let config = enforcement.config().unwrap();
        assert_eq!(config.jwks_url().as_str(), "https://keys.example.com/jwks.json");
        assert_eq!(config.groups_claim(), "roles");
        assert_eq!(config.algorithms().algorithms(), &[Algorithm::RS256, Algorithm::EdDSA]);
        assert_eq!(config.clock_skew(), Duration::from_secs(120));
    }

    #[rstest]
    #[case("15", 15)]
    #[case("15s", 15)]
    #[case("1m 30s", 90)]
    fn test_parse_skew(#[case] raw: &str, #[case] secs: u64) {
        assert_eq!(parse_skew(raw).unwrap(), Duration::from_secs(secs));
    }

    #[test]
    fn test_parse_skew_rejects_garbage() {
        assert!(matches!(
            parse_skew("soon"),
            Err(ConfigError::Invalid { field: "clock_skew", .. })
        ));
    }
}
