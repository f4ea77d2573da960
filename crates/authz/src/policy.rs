//! The central operation-to-roles table.
//!
//! Every operation the dispatcher exposes must appear here; anything absent
//! is unknown and never implicitly public. A public operation is registered
//! as such explicitly, with an empty requirement.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    error::{AuthzError, PolicyError},
    role::Role,
};

/// Operations registered by [`AccessPolicyRegistry::standard`].
pub mod operations {
    /// Diagnostic echo, public.
    pub const ECHO: &str = "echo";
    /// Provider lookup by identifier.
    pub const LOOKUP_NPI: &str = "lookup_npi";
    /// Individual provider search.
    pub const SEARCH_PROVIDERS: &str = "search_providers";
    /// Organization search.
    pub const SEARCH_ORGANIZATIONS: &str = "search_organizations";
    /// Multi-criteria search.
    pub const ADVANCED_SEARCH: &str = "advanced_search";
}

/// Immutable map from operation name to the roles allowed to invoke it.
///
/// An empty role set marks a public operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicyRegistry {
    operations: BTreeMap<String, BTreeSet<Role>>,
}

impl AccessPolicyRegistry {
    /// Starts an empty registry builder.
    #[must_use]
    pub fn builder() -> AccessPolicyRegistryBuilder {
        AccessPolicyRegistryBuilder::default()
    }

    /// The deployed tool set.
    ///
    /// | Operation | Roles |
    /// |-----------|-------|
    /// | `echo` | public |
    /// | `lookup_npi`, `search_providers`, `search_organizations` | viewer, analyst, clinician, admin |
    /// | `advanced_search` | analyst, clinician, admin |
    #[must_use]
    pub fn standard() -> Self {
        let everyone = BTreeSet::from(Role::ALL);
        let elevated = BTreeSet::from([Role::Analyst, Role::Clinician, Role::Admin]);

        let mut table = BTreeMap::new();
        table.insert(operations::ECHO.to_owned(), BTreeSet::new());
        for name in
            [operations::LOOKUP_NPI, operations::SEARCH_PROVIDERS, operations::SEARCH_ORGANIZATIONS]
        {
            table.insert(name.to_owned(), everyone.clone());
        }
        table.insert(operations::ADVANCED_SEARCH.to_owned(), elevated);
        Self { operations: table }
    }

    /// Roles allowed to invoke `operation`; empty for public operations.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::UnknownOperation`] if the operation is not registered.
    pub fn required_roles(&self, operation: &str) -> Result<&BTreeSet<Role>, AuthzError> {
        self.operations.get(operation).ok_or_else(|| AuthzError::unknown_operation(operation))
    }

    /// Returns `true` if `operation` is registered.
    #[must_use]
    pub fn contains(&self, operation: &str) -> bool {
        self.operations.contains_key(operation)
    }

    /// Returns `true` if `operation` is registered as public.
    #[must_use]
    pub fn is_public(&self, operation: &str) -> bool {
        self.operations.get(operation).is_some_and(BTreeSet::is_empty)
    }

    /// Registered operations and their roles, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<Role>)> {
        self.operations.iter().map(|(name, roles)| (name.as_str(), roles))
    }

    /// Number of registered operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Startup completeness check against the operations a dispatcher exposes.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Unregistered`] listing every exposed operation
    /// without a policy.
    pub fn ensure_covers<I, S>(&self, exposed: I) -> Result<(), PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let missing: BTreeSet<String> = exposed
            .into_iter()
            .filter(|name| !self.contains(name.as_ref()))
            .map(|name| name.as_ref().to_owned())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PolicyError::Unregistered { operations: missing.into_iter().collect() })
        }
    }
}

/// Builder for [`AccessPolicyRegistry`]. Errors surface from [`build`](Self::build).
#[derive(Debug, Default)]
pub struct AccessPolicyRegistryBuilder {
    entries: Vec<(String, BTreeSet<Role>, bool)>,
}

impl AccessPolicyRegistryBuilder {
    /// Registers an operation restricted to `roles`.
    #[must_use]
    pub fn operation<R>(mut self, name: impl Into<String>, roles: R) -> Self
    where
        R: IntoIterator<Item = Role>,
    {
        self.entries.push((name.into(), roles.into_iter().collect(), false));
        self
    }

    /// Registers an operation anyone may invoke, including anonymous callers.
    #[must_use]
    pub fn public(mut self, name: impl Into<String>) -> Self {
        self.entries.push((name.into(), BTreeSet::new(), true));
        self
    }

    /// Validates and freezes the table.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::EmptyOperationName`] for a blank name
    /// - [`PolicyError::DuplicateOperation`] for a name registered twice
    /// - [`PolicyError::EmptyRequirement`] for a restricted operation with no roles
    pub fn build(self) -> Result<AccessPolicyRegistry, PolicyError> {
        let mut operations = BTreeMap::new();
        for (name, roles, public) in self.entries {
            if name.trim().is_empty() {
                return Err(PolicyError::EmptyOperationName);
            }
            if !public && roles.is_empty() {
                return Err(PolicyError::EmptyRequirement { operation: name });
            }
            if operations.contains_key(&name) {
                return Err(PolicyError::DuplicateOperation { operation: name });
            }
            operations.insert(name, roles);
        }
        Ok(AccessPolicyRegistry { operations })
    }
}
