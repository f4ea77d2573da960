//! # Gatekeeper Authorization
//!
//! Role-based access decisions for principals produced by `gatekeeper-authn`.
//!
//! This crate provides:
//! - **Role resolution**: identity provider groups mapped onto a closed [`Role`] vocabulary
//! - **Access policy registry**: one central, startup-validated table from operation to roles
//! - **Decision engine**: pure ALLOW/DENY verdicts with an explicit admin elevation rule
//! - **Audit**: one record per decision, with primary and fallback sinks
//! - **Access gate**: the single entry point the dispatch shell calls per invocation
//!
//! ## Example
//!
//! ```no_run
//! use gatekeeper_authn::Enforcement;
//! use gatekeeper_authz::{AccessGate, AuditEmitter, DecisionEngine};
//!
//! # async fn example(header: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = DecisionEngine::standard();
//! engine.registry().ensure_covers(["echo", "lookup_npi", "advanced_search"])?;
//!
//! let gate = AccessGate::from_enforcement(Enforcement::from_env()?, engine, AuditEmitter::default())?;
//! gate.log_security_status();
//!
//! match gate.authorize(header, "advanced_search").await {
//!     Ok(_) => { /* run the tool */ },
//!     Err(err) => eprintln!("{}", err.public_message()),
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Audit records and sinks.
pub mod audit;
/// Access decisions.
pub mod decision;
/// Error types.
pub mod error;
/// Per-request gate.
pub mod gate;
/// Operation policy table.
pub mod policy;
/// Roles and group mapping.
pub mod role;

pub use audit::{
    AuditEmitter, AuditRecord, AuditSink, EnforcementMode, JsonLinesAuditSink, MemoryAuditSink,
    NoopAuditSink, TracingAuditSink,
};
pub use decision::{AccessDecision, DecisionEngine, Verdict};
pub use error::{AuditError, AuthzError, GateError, PolicyError, Result};
pub use gate::{AccessGate, bearer_token};
pub use policy::AccessPolicyRegistry;
pub use role::{GroupRule, Role, RoleResolver};
