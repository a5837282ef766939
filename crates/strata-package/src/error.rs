use std::path::PathBuf;

use thiserror::Error;

use crate::tier::Tier;

/// Errors raised while loading, verifying or unpacking packages.
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("archive not found: {}", .0.display())]
    ArchiveNotFound(PathBuf),

    #[error("archive hash mismatch for {package_id}: expected {expected}, got {actual}")]
    HashMismatch {
        package_id: String,
        expected: String,
        actual: String,
    },

    #[error("extraction of {} failed: {reason}", archive.display())]
    ExtractionFailed { archive: PathBuf, reason: String },

    #[error("invalid manifest for {package_id}: {reason}")]
    ManifestInvalid { package_id: String, reason: String },

    #[error("invalid seed registry: {0}")]
    RegistryInvalid(String),

    #[error("{package_id} ({tier}) may not depend on {dependency} ({dependency_tier})")]
    TierInversion {
        package_id: String,
        tier: Tier,
        dependency: String,
        dependency_tier: Tier,
    },

    #[error("signature missing for {0}")]
    SignatureMissing(String),

    #[error("signature invalid for {package_id}: {reason}")]
    SignatureInvalid { package_id: String, reason: String },

    #[error("attestation missing for {0}")]
    AttestationMissing(String),

    #[error("attestation invalid for {package_id}: {reason}")]
    AttestationInvalid { package_id: String, reason: String },

    #[error("invalid trusted key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PackageError {
    pub fn code(&self) -> &'static str {
        match self {
            PackageError::ArchiveNotFound(_) => "ARCHIVE_NOT_FOUND",
            PackageError::HashMismatch { .. } => "HASH_MISMATCH",
            PackageError::ExtractionFailed { .. } => "EXTRACTION_FAILED",
            PackageError::ManifestInvalid { .. } => "MANIFEST_INVALID",
            PackageError::RegistryInvalid(_) | PackageError::TierInversion { .. } => {
                "REGISTRY_INVALID"
            }
            PackageError::SignatureMissing(_) => "SIGNATURE_MISSING",
            PackageError::SignatureInvalid { .. } => "SIGNATURE_INVALID",
            PackageError::AttestationMissing(_) => "ATTESTATION_MISSING",
            PackageError::AttestationInvalid { .. } => "ATTESTATION_INVALID",
            PackageError::InvalidKey(_) => "INVALID_KEY",
            PackageError::Io(_) => "IO_ERROR",
            PackageError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}
