//! The per-request access gate used by the dispatch shell.
//!
//! [`AccessGate::authorize`] runs the whole check for one invocation:
//! bearer header parsing, token verification, the access decision and the
//! audit record. The dispatch shell only sees a [`GateError`] or the
//! allowing [`AccessDecision`].

use std::time::Instant;

use gatekeeper_authn::{AuthError, Enforcement, Principal, TokenVerifier};

use crate::{
    audit::{AuditEmitter, EnforcementMode},
    decision::{AccessDecision, DecisionEngine, Verdict},
    error::GateError,
    role::display_roles,
};

/// Largest `Authorization` header accepted.
pub const MAX_AUTHORIZATION_HEADER_BYTES: usize = 8 * 1024;

/// Extracts the token from an `Authorization` header value.
///
/// An absent header yields `Ok(None)`, which the gate treats as an anonymous
/// caller. The scheme is matched case-insensitively and surrounding
/// whitespace is ignored.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] for oversized headers, schemes
/// other than `Bearer`, or an empty token.
pub fn bearer_token(header: Option<&str>) -> Result<Option<&str>, AuthError> {
    let Some(header) = header else {
        return Ok(None);
    };
    if header.len() > MAX_AUTHORIZATION_HEADER_BYTES {
        return Err(AuthError::malformed_token("authorization header too large"));
    }
    let header = header.trim();
    let (scheme, token) = header.split_once(char::is_whitespace).unwrap_or((header, ""));
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::malformed_token("invalid authorization header"));
    }
    Ok(Some(token))
}

enum Mode {
    Enforced(TokenVerifier),
    Disabled,
}

/// Authentication plus authorization for every operation invocation.
pub struct AccessGate {
    mode: Mode,
    engine: DecisionEngine,
    audit: AuditEmitter,
}

impl AccessGate {
    /// A gate that verifies tokens with `verifier`.
    #[must_use]
    pub fn new(verifier: TokenVerifier, engine: DecisionEngine, audit: AuditEmitter) -> Self {
        Self { mode: Mode::Enforced(verifier), engine, audit }
    }

    /// A gate in the explicit enforcement-disabled state.
    ///
    /// Every registered operation is allowed and audited as unenforced.
    #[must_use]
    pub fn disabled(engine: DecisionEngine, audit: AuditEmitter) -> Self {
        Self { mode: Mode::Disabled, engine, audit }
    }

    /// Builds a gate from the startup enforcement state.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyFetch`] if the key endpoint client cannot be built.
    pub fn from_enforcement(
        enforcement: Enforcement,
        engine: DecisionEngine,
        audit: AuditEmitter,
    ) -> Result<Self, AuthError> {
        match enforcement {
            Enforcement::Enabled(config) => {
                Ok(Self::new(TokenVerifier::from_config(config)?, engine, audit))
            },
            Enforcement::Disabled => Ok(Self::disabled(engine, audit)),
        }
    }

    /// Returns `true` when tokens are verified.
    #[must_use]
    pub fn is_enforced(&self) -> bool {
        matches!(self.mode, Mode::Enforced(_))
    }

    /// The decision engine.
    #[must_use]
    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    /// The audit emitter.
    #[must_use]
    pub fn audit(&self) -> &AuditEmitter {
        &self.audit
    }

    /// The token verifier, when enforcement is enabled.
    #[must_use]
    pub fn verifier(&self) -> Option<&TokenVerifier> {
        match &self.mode {
            Mode::Enforced(verifier) => Some(verifier),
            Mode::Disabled => None,
        }
    }

    /// Logs the enforcement state and policy table. Call once at startup.
    pub fn log_security_status(&self) {
        match &self.mode {
            Mode::Enforced(verifier) => {
                let config = verifier.config();
                tracing::info!(
                    target: "security",
                    issuer = %config.issuer(),
                    audience = %config.audience(),
                    jwks_url = %config.jwks_url(),
                    groups_claim = %config.groups_claim(),
                    "token enforcement enabled"
                );
            },
            Mode::Disabled => tracing::error!(
                target: "security",
                "token enforcement DISABLED: every registered operation is allowed without authentication"
            ),
        }
        for (operation, roles) in self.engine.registry().iter() {
            let roles = if roles.is_empty() { "public".to_owned() } else { display_roles(roles) };
            tracing::info!(target: "security", operation, roles = %roles, "access policy");
        }
    }

    /// Verifies the caller's bearer header.
    ///
    /// Without a header the caller is [`Principal::anonymous`]. With
    /// enforcement disabled, headers are ignored and the caller is anonymous.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Unauthenticated`] for any verification failure.
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<Principal, GateError> {
        let Mode::Enforced(verifier) = &self.mode else {
            return Ok(Principal::anonymous());
        };
        let result = match bearer_token(authorization) {
            Ok(Some(token)) => verifier.verify(token).await,
            Ok(None) => Ok(Principal::anonymous()),
            Err(err) => Err(err),
        };
        result.map_err(|err| {
            tracing::warn!(
                target: "security",
                kind = err.kind(),
                "request rejected as unauthenticated"
            );
            GateError::Unauthenticated(err)
        })
    }

    /// Authenticates the caller and decides whether it may invoke `operation`.
    ///
    /// # Errors
    ///
    /// - [`GateError::Unauthenticated`] if the bearer token fails verification
    /// - [`GateError::Forbidden`] if the decision is DENY
    /// - [`GateError::UnknownOperation`] if `operation` is not registered
    #[tracing::instrument(skip(self, authorization))]
    pub async fn authorize(
        &self,
        authorization: Option<&str>,
        operation: &str,
    ) -> Result<AccessDecision, GateError> {
        let principal = self.authenticate(authorization).await?;
        self.authorize_principal(&principal, operation).await
    }

    /// Decides for an already authenticated principal and audits the decision.
    ///
    /// # Errors
    ///
    /// [`GateError::Forbidden`] or [`GateError::UnknownOperation`].
    pub async fn authorize_principal(
        &self,
        principal: &Principal,
        operation: &str,
    ) -> Result<AccessDecision, GateError> {
        let started = Instant::now();
        let (decision, enforcement) = match self.mode {
            Mode::Enforced(_) => {
                (self.engine.decide(principal, operation), EnforcementMode::Enforced)
            },
            Mode::Disabled => {
                (self.engine.decide_unenforced(principal, operation), EnforcementMode::Disabled)
            },
        };

        let decision = decision.map_err(|err| {
            tracing::error!(
                target: "security",
                operation,
                "operation has no access policy; check the startup registry"
            );
            GateError::from(err)
        })?;

        if enforcement == EnforcementMode::Disabled {
            tracing::warn!(
                target: "security",
                operation,
                "allowing operation without authentication: enforcement disabled"
            );
        }

        self.audit.record_decision(&decision, enforcement).await;
        tracing::debug!(
            operation,
            verdict = %decision.verdict(),
            duration_us = started.elapsed().as_micros() as u64,
            "access decision"
        );

        match decision.verdict() {
            Verdict::Allow => Ok(decision),
            Verdict::Deny => Err(GateError::Forbidden {
                operation: decision.operation().to_owned(),
                reason: decision.reason().to_owned(),
            }),
        }
    }
}

impl std::fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGate")
            .field("enforced", &self.is_enforced())
            .field("operations", &self.engine.registry().len())
            .field("audit", &self.audit)
            .finish()
    }
}
