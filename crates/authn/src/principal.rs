//! The verified identity carried through one request.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Subject reported for requests that carry no bearer token.
pub const ANONYMOUS_SUBJECT: &str = "anonymous";

/// A verified identity.
///
/// Produced by [`TokenVerifier`](crate::TokenVerifier) (or
/// [`Principal::anonymous`] when no token was presented) and owned by the
/// request. The group set is never absent: a token without a groups claim
/// yields an empty set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Principal {
    subject: String,
    groups: BTreeSet<String>,
    issued_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    claims: Map<String, Value>,
}

impl Principal {
    pub(crate) fn new(
        subject: String,
        groups: BTreeSet<String>,
        issued_at: Option<DateTime<Utc>>,
        expires_at: Option<DateTime<Utc>>,
        claims: Map<String, Value>,
    ) -> Self {
        Self { subject, groups, issued_at, expires_at, claims }
    }

    /// The principal for a request without a bearer token.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            subject: ANONYMOUS_SUBJECT.to_owned(),
            groups: BTreeSet::new(),
            issued_at: None,
            expires_at: None,
            claims: Map::new(),
        }
    }

    /// The `sub` claim, or [`ANONYMOUS_SUBJECT`].
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Group memberships from the configured groups claim.
    #[must_use]
    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    /// Returns `true` if the principal belongs to `group`.
    #[must_use]
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// The `iat` claim, if present.
    #[must_use]
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    /// The `exp` claim. Always present for verified tokens.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// All claims of the verified token.
    #[must_use]
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// A single raw claim.
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// OAuth scopes from `scp` (array) or `scope` (space separated).
    #[must_use]
    pub fn scopes(&self) -> BTreeSet<String> {
        match self.claims.get("scp").or_else(|| self.claims.get("scope")) {
            Some(Value::Array(items)) => {
                items.iter().filter_map(Value::as_str).map(str::to_owned).collect()
            },
            Some(Value::String(s)) => s.split_whitespace().map(str::to_owned).collect(),
            _ => BTreeSet::new(),
        }
    }

    /// Returns `true` for the tokenless principal.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.subject == ANONYMOUS_SUBJECT && self.claims.is_empty()
    }
}
