use serde::{Deserialize, Serialize};
use strata_capability::{CapabilityManifest, OperationKind};

use crate::error::PackageError;

/// Declared filesystem footprint of a package.
///
/// Patterns are relative to the governed root. The derived capability
/// manifest grants exactly the declared reads and writes and nothing else.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    #[serde(default)]
    pub declared_reads: Vec<String>,
    #[serde(default)]
    pub declared_writes: Vec<String>,
    #[serde(default)]
    pub declared_executes: Vec<String>,
}

impl PackageManifest {
    pub fn validate(&self, package_id: &str) -> Result<(), PackageError> {
        let invalid = |reason: String| PackageError::ManifestInvalid {
            package_id: package_id.to_string(),
            reason,
        };

        for pattern in self
            .declared_reads
            .iter()
            .chain(&self.declared_writes)
            .chain(&self.declared_executes)
        {
            if pattern.trim().is_empty() {
                return Err(invalid("empty path pattern".into()));
            }
            if pattern.split('/').any(|part| part == "..") {
                return Err(invalid(format!("pattern `{pattern}` escapes its root")));
            }
        }

        self.capability_manifest()
            .validate()
            .map_err(|e| invalid(e.to_string()))
    }

    pub fn capability_manifest(&self) -> CapabilityManifest {
        let reads = self.declared_reads.iter().map(|p| (p, OperationKind::Read));
        let writes = self.declared_writes.iter().map(|p| (p, OperationKind::Write));
        let executes = self
            .declared_executes
            .iter()
            .map(|p| (p, OperationKind::Execute));

        reads
            .chain(writes)
            .chain(executes)
            .fold(CapabilityManifest::empty(), |m, (pattern, op)| {
                m.with_rule(pattern.clone(), op)
            })
    }
}
