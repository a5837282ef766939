//! CLI error type and exit codes

use thiserror::Error;

use strata_capability::CapabilityError;
use strata_install::{DrillError, InstallError};
use strata_ledger::LedgerError;
use strata_package::PackageError;

pub type CliResult<T> = Result<T, CliError>;

/// Fatal outcomes. Each prints as `error[CODE]: message` and exits non-zero.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Drill(#[from] DrillError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("chain verification failed for: {}", streams.join(", "))]
    ChainVerification { streams: Vec<String> },

    #[error("rebuild did not restore: {}", packages.join(", "))]
    DrillMismatch { packages: Vec<String> },

    #[error("the drill wipes the installed tree; set WIPE_CONFIRM=YES_WIPE_PRISTINE to proceed")]
    WipeNotConfirmed,

    #[error("no handler registered for `{0}`")]
    UnknownOperation(&'static str),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CliError {
    pub fn code(&self) -> &'static str {
        match self {
            CliError::Install(e) => e.code(),
            CliError::Drill(e) => e.code(),
            CliError::Capability(e) => e.code(),
            CliError::Package(e) => e.code(),
            CliError::Ledger(e) => e.code(),
            CliError::ChainVerification { .. } => "CHAIN_VERIFICATION_FAILURE",
            CliError::DrillMismatch { .. } => "MISMATCH",
            CliError::WipeNotConfirmed => "INVALID_CONFIRMATION",
            CliError::UnknownOperation(_) => "UNKNOWN_OPERATION",
            CliError::Internal(_) => "INTERNAL",
        }
    }

    /// Process exit code. Integrity failures get their own code.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::ChainVerification { .. } => 3,
            CliError::Install(e) if e.is_integrity_failure() => 3,
            CliError::Drill(DrillError::ChainVerificationFailure { .. }) => 3,
            CliError::Drill(DrillError::Install(e)) if e.is_integrity_failure() => 3,
            CliError::Capability(e) if e.is_pristine_violation() => 3,
            _ => 1,
        }
    }
}
