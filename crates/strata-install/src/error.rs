use std::path::PathBuf;

use strata_capability::CapabilityError;
use strata_ledger::LedgerError;
use strata_package::{PackageError, Tier};
use thiserror::Error;

use crate::state::{PackageState, PackageTransition};

/// Installation errors. Every variant has a stable [`code`](Self::code).
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("{0}")]
    Package(#[from] PackageError),

    #[error("destination already exists for {package_id}: {}", path.display())]
    DestinationExists { package_id: String, path: PathBuf },

    #[error("dependencies of {package_id} are not installed: {}", missing.join(", "))]
    DependencyUnsatisfied {
        package_id: String,
        missing: Vec<String>,
    },

    #[error("{0}")]
    Capability(#[from] CapabilityError),

    #[error("chain verification failed for stream {stream}: {issues} issue(s), first at #{first}")]
    ChainVerificationFailure {
        stream: String,
        issues: usize,
        first: u64,
    },

    /// Bytes on disk differ from the archive entry. Always rolled back and
    /// reported as an extraction failure.
    #[error("partial write detected for {package_id}: {}", path.display())]
    PartialWriteDetected { package_id: String, path: PathBuf },

    #[error("extraction failed for {package_id}: {reason}")]
    ExtractionFailed { package_id: String, reason: String },

    #[error("installed files of {package_id} no longer match its receipt: {}", files.join(", "))]
    InstalledTreeModified { package_id: String, files: Vec<String> },

    #[error("{package_id} is not installed")]
    NotInstalled { package_id: String },

    #[error("install mode is disabled; refusing to install {package_id}")]
    InstallModeDisabled { package_id: String },

    #[error("{package_id} is a {tier} package and cannot use the {installer} installer")]
    TierMismatch {
        package_id: String,
        tier: Tier,
        installer: &'static str,
    },

    #[error("install of {package_id} cancelled")]
    Cancelled { package_id: String },

    #[error("invalid transition {transition:?} from {from:?} for {package_id}")]
    InvalidTransition {
        package_id: String,
        from: PackageState,
        transition: PackageTransition,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl InstallError {
    pub fn code(&self) -> &'static str {
        match self {
            InstallError::Package(e) => e.code(),
            InstallError::DestinationExists { .. } => "DESTINATION_EXISTS",
            InstallError::DependencyUnsatisfied { .. } => "DEPENDENCY_UNSATISFIED",
            InstallError::Capability(CapabilityError::Ledger(_)) => "LEDGER_ERROR",
            InstallError::Capability(_) => "CAPABILITY_DENIED",
            InstallError::ChainVerificationFailure { .. } => "CHAIN_VERIFICATION_FAILURE",
            InstallError::PartialWriteDetected { .. } => "PARTIAL_WRITE_DETECTED",
            InstallError::ExtractionFailed { .. } => "EXTRACTION_FAILED",
            InstallError::InstalledTreeModified { .. } => "INSTALLED_TREE_MODIFIED",
            InstallError::NotInstalled { .. } => "NOT_INSTALLED",
            InstallError::InstallModeDisabled { .. } => "INSTALL_MODE_DISABLED",
            InstallError::TierMismatch { .. } => "TIER_MISMATCH",
            InstallError::Cancelled { .. } => "CANCELLED",
            InstallError::InvalidTransition { .. } => "INVALID_TRANSITION",
            InstallError::Config(_) => "CONFIG_INVALID",
            InstallError::Ledger(_) => "LEDGER_ERROR",
            InstallError::Io { .. } => "IO_ERROR",
        }
    }

    /// Failures that threaten system-wide integrity. These abort a whole
    /// plan or drill instead of being scored against one package.
    pub fn is_integrity_failure(&self) -> bool {
        match self {
            InstallError::ChainVerificationFailure { .. } | InstallError::Ledger(_) => true,
            InstallError::Capability(e) => {
                e.is_pristine_violation() || matches!(e, CapabilityError::Ledger(_))
            }
            _ => false,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        InstallError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from the rebuild drill.
#[derive(Debug, Error)]
pub enum DrillError {
    #[error("{0}")]
    Install(#[from] InstallError),

    #[error("export to {} failed: {source}", path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("chain verification failed after rebuild: {}", streams.join(", "))]
    ChainVerificationFailure { streams: Vec<String> },
}

impl DrillError {
    pub fn code(&self) -> &'static str {
        match self {
            DrillError::Install(e) => e.code(),
            DrillError::Export { .. } => "EXPORT_FAILED",
            DrillError::ChainVerificationFailure { .. } => "CHAIN_VERIFICATION_FAILURE",
        }
    }
}

impl From<LedgerError> for DrillError {
    fn from(e: LedgerError) -> Self {
        DrillError::Install(InstallError::Ledger(e))
    }
}

impl From<CapabilityError> for DrillError {
    fn from(e: CapabilityError) -> Self {
        DrillError::Install(InstallError::Capability(e))
    }
}

impl From<PackageError> for DrillError {
    fn from(e: PackageError) -> Self {
        DrillError::Install(InstallError::Package(e))
    }
}
