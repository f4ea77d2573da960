//! Canonical roles and the group-to-role mapping.
//!
//! Identity providers report free-form group names. [`RoleResolver`] maps
//! them onto the closed [`Role`] vocabulary through an ordered table of
//! exact and prefix rules. Groups that match no rule are ignored.

use std::{collections::BTreeSet, fmt, str::FromStr};

use gatekeeper_authn::Principal;
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Access level derived from group membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Read-only access to public data.
    Viewer,
    /// Analyst access, including advanced search.
    Analyst,
    /// Healthcare provider access.
    Clinician,
    /// Full access. Satisfies every role requirement.
    Admin,
}

impl Role {
    /// Every role, lowest privilege first.
    pub const ALL: [Role; 4] = [Role::Viewer, Role::Analyst, Role::Clinician, Role::Admin];

    /// Lowercase name used in logs and configuration.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Analyst => "analyst",
            Self::Clinician => "clinician",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PolicyError::UnknownRole { name: s.to_owned() })
    }
}

/// Formats a role set as `[a, b]` for reasons and logs.
pub(crate) fn display_roles(roles: &BTreeSet<Role>) -> String {
    let names: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
    format!("[{}]", names.join(", "))
}

/// How a group name is matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupRule {
    /// The group name equals this string.
    Exact(String),
    /// The group name starts with this string.
    Prefix(String),
}

impl GroupRule {
    /// Returns `true` if `group` satisfies the rule. Matching is case-sensitive.
    #[must_use]
    pub fn matches(&self, group: &str) -> bool {
        match self {
            Self::Exact(name) => group == name,
            Self::Prefix(prefix) => group.starts_with(prefix.as_str()),
        }
    }
}

/// Maps group names to roles.
///
/// A pure function of the group set: the same groups always resolve to the
/// same roles. The resolved set reports only roles actually granted; the
/// admin elevation is applied by the decision engine, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleResolver {
    rules: Vec<(GroupRule, Role)>,
}

/// Group names granting each role in the standard deployment.
pub const STANDARD_GROUPS: [(&str, Role); 4] = [
    ("mcp_viewer", Role::Viewer),
    ("mcp_analyst", Role::Analyst),
    ("mcp_clinician", Role::Clinician),
    ("mcp_admin", Role::Admin),
];

impl RoleResolver {
    /// A resolver with no rules; every principal resolves to no roles.
    #[must_use]
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// The standard `mcp_*` group table, matched exactly.
    #[must_use]
    pub fn standard() -> Self {
        STANDARD_GROUPS
            .into_iter()
            .fold(Self::empty(), |resolver, (group, role)| resolver.with_exact(group, role))
    }

    /// Adds a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: GroupRule, role: Role) -> Self {
        self.rules.push((rule, role));
        self
    }

    /// Adds an exact group match.
    #[must_use]
    pub fn with_exact(self, group: impl Into<String>, role: Role) -> Self {
        self.with_rule(GroupRule::Exact(group.into()), role)
    }

    /// Adds a group prefix match.
    #[must_use]
    pub fn with_prefix(self, prefix: impl Into<String>, role: Role) -> Self {
        self.with_rule(GroupRule::Prefix(prefix.into()), role)
    }

    /// The rule table in insertion order.
    #[must_use]
    pub fn rules(&self) -> &[(GroupRule, Role)] {
        &self.rules
    }

    /// Resolves a principal's groups to roles.
    #[must_use]
    pub fn resolve(&self, principal: &Principal) -> BTreeSet<Role> {
        self.resolve_groups(principal.groups().iter().map(String::as_str))
    }

    /// Resolves raw group names to roles. Unrecognized groups are ignored.
    #[must_use]
    pub fn resolve_groups<'a, I>(&self, groups: I) -> BTreeSet<Role>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut roles = BTreeSet::new();
        for group in groups {
            roles.extend(
                self.rules.iter().filter(|(rule, _)| rule.matches(group)).map(|(_, role)| *role),
            );
        }
        roles
    }
}

impl Default for RoleResolver {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use gatekeeper_authn::testutil::principal;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(&["mcp_viewer"], &[Role::Viewer])]
    #[case(&["mcp_analyst", "Everyone"], &[Role::Analyst])]
    #[case(&["mcp_admin"], &[Role::Admin])]
    #[case(&["mcp_clinician", "mcp_viewer"], &[Role::Viewer, Role::Clinician])]
    #[case(&["Everyone", "MCP_ADMIN", "mcp_admins"], &[])]
    #[case(&[], &[])]
    fn test_standard_table(#[case] groups: &[&str], #[case] expected: &[Role]) {
        let roles = RoleResolver::standard().resolve(&principal("alice", groups));
        assert_eq!(roles, expected.iter().copied().collect());
    }

    #[test]
    fn test_admin_reports_only_admin() {
        let roles = RoleResolver::standard().resolve(&principal("root", &["mcp_admin"]));
        assert_eq!(roles, BTreeSet::from([Role::Admin]));
    }

    #[test]
    fn test_prefix_rule() {
        let resolver = RoleResolver::empty().with_prefix("okta-analysts-", Role::Analyst);
        assert_eq!(
            resolver.resolve_groups(["okta-analysts-emea", "okta-analysts"]),
            BTreeSet::from([Role::Analyst])
        );
    }

    #[test]
    fn test_several_rules_may_grant_for_one_group() {
        let resolver = RoleResolver::empty()
            .with_exact("clinical-research", Role::Clinician)
            .with_prefix("clinical-", Role::Viewer);
        assert_eq!(
            resolver.resolve_groups(["clinical-research"]),
            BTreeSet::from([Role::Viewer, Role::Clinician])
        );
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!("Analyst".parse::<Role>().unwrap(), Role::Analyst);
        assert_eq!(" admin ".parse::<Role>().unwrap(), Role::Admin);
        assert!(matches!("root".parse::<Role>(), Err(PolicyError::UnknownRole { .. })));
    }

    #[test]
    fn test_role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Clinician).unwrap(), "\"clinician\"");
        let role: Role = serde_json::from_str("\"viewer\"").unwrap();
        assert_eq!(role, Role::Viewer);
    }

    #[test]
    fn test_display_roles() {
        assert_eq!(display_roles(&BTreeSet::new()), "[]");
        assert_eq!(
            display_roles(&BTreeSet::from([Role::Admin, Role::Viewer])),
            "[viewer, admin]"
        );
    }
}
