//! Access decisions.
//!
//! [`DecisionEngine::decide`] is a pure function of the principal's groups,
//! the role table and the policy table. It performs no I/O and holds no
//! mutable state, so identical inputs always produce identical verdicts.

use std::{collections::BTreeSet, fmt, sync::Arc};

use gatekeeper_authn::Principal;
use serde::Serialize;

use crate::{
    error::AuthzError,
    policy::AccessPolicyRegistry,
    role::{Role, RoleResolver, display_roles},
};

/// Reason attached to decisions made while enforcement is disabled.
pub const ENFORCEMENT_DISABLED_REASON: &str = "authentication enforcement disabled";

/// Outcome of an access decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// The operation may proceed.
    Allow,
    /// The operation is refused.
    Deny,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("ALLOW"),
            Self::Deny => f.write_str("DENY"),
        }
    }
}

/// The result of one [`DecisionEngine::decide`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    verdict: Verdict,
    operation: String,
    subject: String,
    resolved_roles: BTreeSet<Role>,
    required_roles: BTreeSet<Role>,
    reason: String,
}

impl AccessDecision {
    /// The verdict.
    #[must_use]
    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    /// Returns `true` for [`Verdict::Allow`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.verdict == Verdict::Allow
    }

    /// The requested operation.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// The principal's subject.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Roles actually granted to the principal, without admin elevation.
    #[must_use]
    pub fn resolved_roles(&self) -> &BTreeSet<Role> {
        &self.resolved_roles
    }

    /// Roles the operation accepts; empty for public operations.
    #[must_use]
    pub fn required_roles(&self) -> &BTreeSet<Role> {
        &self.required_roles
    }

    /// Operator-facing explanation.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Converts a denial into [`AuthzError::Denied`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Denied`] when the verdict is [`Verdict::Deny`].
    pub fn into_result(self) -> Result<Self, AuthzError> {
        match self.verdict {
            Verdict::Allow => Ok(self),
            Verdict::Deny => Err(AuthzError::Denied {
                operation: self.operation,
                subject: self.subject,
                reason: self.reason,
            }),
        }
    }
}

/// Combines the role table and the policy table into verdicts.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    registry: Arc<AccessPolicyRegistry>,
    resolver: Arc<RoleResolver>,
}

impl DecisionEngine {
    /// Creates an engine over the given tables.
    #[must_use]
    pub fn new(registry: Arc<AccessPolicyRegistry>, resolver: Arc<RoleResolver>) -> Self {
        Self { registry, resolver }
    }

    /// The standard policy and group tables.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(
            Arc::new(AccessPolicyRegistry::standard()),
            Arc::new(RoleResolver::standard()),
        )
    }

    /// The policy table.
    #[must_use]
    pub fn registry(&self) -> &AccessPolicyRegistry {
        &self.registry
    }

    /// The group table.
    #[must_use]
    pub fn resolver(&self) -> &RoleResolver {
        &self.resolver
    }

    /// Decides whether `principal` may invoke `operation`.
    ///
    /// Allows when the operation is public, when the principal holds the
    /// admin role, or when the resolved and required roles intersect. One
    /// sufficient role is enough.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::UnknownOperation`] if the operation is not
    /// registered. A denial is a successful decision, not an error.
    pub fn decide(
        &self,
        principal: &Principal,
        operation: &str,
    ) -> Result<AccessDecision, AuthzError> {
        let required = self.registry.required_roles(operation)?;
        let resolved = self.resolver.resolve(principal);

        let (verdict, reason) = if required.is_empty() {
            (Verdict::Allow, "operation is public".to_owned())
        } else if resolved.contains(&Role::Admin) {
            (Verdict::Allow, "admin role grants every operation".to_owned())
        } else {
            let granted: BTreeSet<Role> = resolved.intersection(required).copied().collect();
            if granted.is_empty() {
                let reason = if resolved.is_empty() {
                    format!("no roles resolved; requires one of {}", display_roles(required))
                } else {
                    format!(
                        "resolved roles {} do not intersect required roles {}",
                        display_roles(&resolved),
                        display_roles(required)
                    )
                };
                (Verdict::Deny, reason)
            } else {
                (Verdict::Allow, format!("granted by {}", display_roles(&granted)))
            }
        };

        Ok(AccessDecision {
            verdict,
            operation: operation.to_owned(),
            subject: principal.subject().to_owned(),
            resolved_roles: resolved,
            required_roles: required.clone(),
            reason,
        })
    }

    /// Allows any registered operation without consulting roles.
    ///
    /// Only for the explicit enforcement-disabled state.
    pub(crate) fn decide_unenforced(
        &self,
        principal: &Principal,
        operation: &str,
    ) -> Result<AccessDecision, AuthzError> {
        let required = self.registry.required_roles(operation)?;
        Ok(AccessDecision {
            verdict: Verdict::Allow,
            operation: operation.to_owned(),
            subject: principal.subject().to_owned(),
            resolved_roles: self.resolver.resolve(principal),
            required_roles: required.clone(),
            reason: ENFORCEMENT_DISABLED_REASON.to_owned(),
        })
    }

    /// Every registered operation `principal` may invoke, sorted by name.
    #[must_use]
    pub fn permitted_operations(&self, principal: &Principal) -> BTreeSet<String> {
        let resolved = self.resolver.resolve(principal);
        let admin = resolved.contains(&Role::Admin);
        self.registry
            .iter()
            .filter(|(_, required)| {
                required.is_empty() || admin || !resolved.is_disjoint(required)
            })
            .map(|(name, _)| name.to_owned())
            .collect()
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::standard()
    }
}
