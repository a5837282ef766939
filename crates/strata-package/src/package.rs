use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_ledger::{canonical_json, Digest};

use crate::error::PackageError;
use crate::manifest::PackageManifest;
use crate::tier::Tier;

/// Build provenance statement bound to an archive hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// Archive hash the statement is about.
    pub subject_hash: Digest,
    pub builder: String,
    pub issued_at: DateTime<Utc>,
}

/// A package ready to be installed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Package {
    pub package_id: String,
    pub version: semver::Version,
    pub tier: Tier,
    pub declared_dependencies: Vec<String>,
    pub manifest: PackageManifest,
    /// Location of the content archive.
    pub archive: PathBuf,
    /// Declared SHA-256 of the archive.
    pub archive_hash: Digest,
    pub signature: Option<Vec<u8>>,
    pub attestation: Option<Attestation>,
}

#[derive(Serialize)]
struct SigningFields<'a> {
    package_id: &'a str,
    version: String,
    tier: Tier,
    archive_hash: &'a Digest,
    declared_dependencies: &'a [String],
}

impl Package {
    /// Bytes covered by the package signature: the canonical JSON of the
    /// identity fields and the archive hash.
    pub fn signing_message(&self) -> Result<Vec<u8>, PackageError> {
        canonical_json(&SigningFields {
            package_id: &self.package_id,
            version: self.version.to_string(),
            tier: self.tier,
            archive_hash: &self.archive_hash,
            declared_dependencies: &self.declared_dependencies,
        })
        .map_err(|e| PackageError::ManifestInvalid {
            package_id: self.package_id.clone(),
            reason: e.to_string(),
        })
    }

    /// Checks that do not need the archive.
    pub fn validate(&self) -> Result<(), PackageError> {
        if self.package_id.trim().is_empty() {
            return Err(PackageError::ManifestInvalid {
                package_id: self.package_id.clone(),
                reason: "empty package id".into(),
            });
        }
        if self.package_id.contains(['/', '\\']) || self.package_id.starts_with('.') {
            return Err(PackageError::ManifestInvalid {
                package_id: self.package_id.clone(),
                reason: "package id must be a single path component".into(),
            });
        }
        if self.tier.is_genesis() && !self.declared_dependencies.is_empty() {
            return Err(PackageError::ManifestInvalid {
                package_id: self.package_id.clone(),
                reason: "genesis packages declare no dependencies".into(),
            });
        }
        self.manifest.validate(&self.package_id)
    }
}
