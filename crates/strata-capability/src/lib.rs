//! Strata Capability: fail-closed authorization for filesystem operations.
//!
//! Every mutating or out-of-root operation is checked against the acting
//! party's bound [`CapabilityManifest`]. Absence of a rule is a deny, and
//! every deny is written to the ledger's governance stream before it is
//! returned. Pristine paths are writable only by the orchestrator holding a
//! [`DestructiveToken`].

#![deny(unsafe_code)]

pub mod actor;
pub mod decision;
pub mod enforcer;
pub mod error;
pub mod manifest;
pub mod path;
pub mod pristine;

pub use actor::Actor;
pub use decision::{Decision, DenyReason};
pub use enforcer::CapabilityEnforcer;
pub use error::CapabilityError;
pub use manifest::{AgentRole, CapabilityManifest, CapabilityRule, OperationKind};
pub use pristine::{DestructiveToken, PristineSet, DESTRUCTIVE_CONFIRMATION};
