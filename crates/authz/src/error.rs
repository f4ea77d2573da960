//! Authorization, policy, audit and gate error types.

use gatekeeper_authn::AuthError;
use thiserror::Error;

/// Per-request authorization failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AuthzError {
    /// The operation is not in the policy registry.
    ///
    /// This is a routing or configuration defect, reported distinctly from
    /// a denial so operators can tell the two apart.
    #[error("Unknown operation: {operation}")]
    UnknownOperation {
        /// Name the caller asked for.
        operation: String,
    },

    /// The principal lacks every role the operation accepts.
    #[error("Access denied to '{operation}' for '{subject}': {reason}")]
    Denied {
        /// Requested operation.
        operation: String,
        /// Principal subject.
        subject: String,
        /// Operator-facing explanation.
        reason: String,
    },
}

impl AuthzError {
    /// Creates an [`AuthzError::UnknownOperation`].
    #[must_use]
    pub fn unknown_operation(operation: impl Into<String>) -> Self {
        Self::UnknownOperation { operation: operation.into() }
    }
}

/// Invalid access policy tables, detected at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum PolicyError {
    /// An operation name is empty or blank.
    #[error("operation name must not be empty")]
    EmptyOperationName,

    /// The same operation was registered twice.
    #[error("operation '{operation}' is registered more than once")]
    DuplicateOperation {
        /// Offending name.
        operation: String,
    },

    /// A restricted operation was registered with no roles.
    ///
    /// Public operations must be registered as public explicitly.
    #[error("operation '{operation}' has no required roles; register it as public instead")]
    EmptyRequirement {
        /// Offending name.
        operation: String,
    },

    /// Operations exposed by the dispatcher but missing from the registry.
    #[error("operations without an access policy: {}", operations.join(", "))]
    Unregistered {
        /// Names without a policy, sorted.
        operations: Vec<String>,
    },

    /// A role name that is not part of the role vocabulary.
    #[error("unknown role '{name}'")]
    UnknownRole {
        /// Offending name.
        name: String,
    },
}

/// Failures of a single audit sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AuditError {
    /// The record could not be serialized.
    #[error("audit record serialization failed: {0}")]
    Serialize(String),

    /// The sink could not write the record.
    #[error("audit sink '{sink}' failed: {message}")]
    Sink {
        /// Sink name.
        sink: &'static str,
        /// Description of the failure.
        message: String,
    },
}

/// Outcome of the access gate, as seen by the dispatch shell.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum GateError {
    /// The bearer token could not be verified.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),

    /// The principal may not invoke the operation.
    #[error("Forbidden: {reason}")]
    Forbidden {
        /// Requested operation.
        operation: String,
        /// Operator-facing explanation; may name roles.
        reason: String,
    },

    /// The operation is not registered.
    #[error("Unknown operation: {operation}")]
    UnknownOperation {
        /// Name the caller asked for.
        operation: String,
    },
}

impl GateError {
    /// A message safe to return to an unauthenticated caller.
    ///
    /// Never includes role membership, claim values or key ids.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "authentication required",
            Self::Forbidden { .. } => "insufficient privileges for this operation",
            Self::UnknownOperation { .. } => "unknown operation",
        }
    }

    /// Short, stable label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden { .. } => "forbidden",
            Self::UnknownOperation { .. } => "unknown_operation",
        }
    }
}

impl From<AuthzError> for GateError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::UnknownOperation { operation } => Self::UnknownOperation { operation },
            AuthzError::Denied { operation, reason, .. } => Self::Forbidden { operation, reason },
        }
    }
}

/// Result type alias for authorization operations.
pub type Result<T> = std::result::Result<T, AuthzError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_public_messages_do_not_leak_reason() {
        let err = GateError::Forbidden {
            operation: "advanced_search".into(),
            reason: "resolved roles [viewer] do not include any of [admin, analyst]".into(),
        };
        assert!(!err.public_message().contains("viewer"));
        assert!(err.to_string().contains("viewer"));

        let err = GateError::from(AuthError::unknown_key("secret-kid"));
        assert!(!err.public_message().contains("secret-kid"));
        assert_eq!(err.kind(), "unauthenticated");
    }

    #[test]
    fn test_denied_maps_to_forbidden() {
        let err = GateError::from(AuthzError::Denied {
            operation: "op".into(),
            subject: "alice".into(),
            reason: "nope".into(),
        });
        assert_eq!(err, GateError::Forbidden { operation: "op".into(), reason: "nope".into() });
    }

    #[test]
    fn test_unknown_operation_stays_distinct() {
        let err = GateError::from(AuthzError::unknown_operation("ghost"));
        assert_eq!(err.kind(), "unknown_operation");
        let forbidden = GateError::Forbidden { operation: String::new(), reason: String::new() };
        assert_ne!(err.kind(), forbidden.kind());
    }

    #[test]
    fn test_unregistered_lists_operations() {
        let err = PolicyError::Unregistered { operations: vec!["a".into(), "b".into()] };
        assert_eq!(err.to_string(), "operations without an access policy: a, b");
    }
}
