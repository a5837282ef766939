use std::path::PathBuf;

use thiserror::Error;

use crate::actor::Actor;
use crate::decision::DenyReason;
use crate::manifest::OperationKind;

/// Capability-related errors
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("capability denied: {actor} may not {operation} {}: {reason}", path.display())]
    Denied {
        actor: Actor,
        operation: OperationKind,
        path: PathBuf,
        reason: DenyReason,
    },

    #[error("manifest already bound for {0}")]
    AlreadyBound(Actor),

    #[error("invalid path pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("destructive-mode confirmation rejected")]
    InvalidConfirmation,

    #[error("ledger error: {0}")]
    Ledger(#[from] strata_ledger::LedgerError),
}

impl CapabilityError {
    pub fn code(&self) -> &'static str {
        match self {
            CapabilityError::Denied { .. } => "CAPABILITY_DENIED",
            CapabilityError::AlreadyBound(_) => "MANIFEST_ALREADY_BOUND",
            CapabilityError::InvalidPattern { .. } => "INVALID_PATTERN",
            CapabilityError::InvalidConfirmation => "INVALID_CONFIRMATION",
            CapabilityError::Ledger(_) => "LEDGER_ERROR",
        }
    }

    /// True for denials that threaten system-wide integrity.
    pub fn is_pristine_violation(&self) -> bool {
        matches!(
            self,
            CapabilityError::Denied {
                reason: DenyReason::PristineViolation,
                ..
            }
        )
    }
}
