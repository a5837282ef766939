use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_ledger::Digest;
use tracing::debug;

use crate::error::PackageError;
use crate::manifest::PackageManifest;
use crate::package::{Attestation, Package};
use crate::tier::Tier;

/// The only registry schema this build understands.
pub const SEED_SCHEMA_VERSION: u32 = 1;

/// One package as declared in the seed registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPackage {
    pub package_id: String,
    pub version: semver::Version,
    pub tier: Tier,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub manifest: PackageManifest,
    /// Archive location, relative to the registry file unless absolute.
    pub archive: PathBuf,
    pub archive_hash: Digest,
    /// Base64-encoded detached signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Attestation>,
}

/// Declares the packages and their install order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRegistry {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub packages: Vec<SeedPackage>,
    pub install_order: Vec<String>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl SeedRegistry {
    pub fn new(packages: Vec<SeedPackage>, install_order: Vec<String>) -> Self {
        Self {
            schema_version: SEED_SCHEMA_VERSION,
            created_at: Utc::now(),
            packages,
            install_order,
            base_dir: PathBuf::new(),
        }
    }

    /// Load and validate a registry file.
    pub fn load(path: &Path) -> Result<Self, PackageError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PackageError::RegistryInvalid(format!("cannot read {}: {e}", path.display()))
        })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_json(&raw, base_dir)
    }

    pub fn from_json(raw: &str, base_dir: impl Into<PathBuf>) -> Result<Self, PackageError> {
        let mut registry: SeedRegistry =
            serde_json::from_str(raw).map_err(|e| PackageError::RegistryInvalid(e.to_string()))?;
        registry.base_dir = base_dir.into();
        registry.validate()?;
        debug!(
            packages = registry.packages.len(),
            base_dir = %registry.base_dir.display(),
            "Seed registry loaded"
        );
        Ok(registry)
    }

    pub fn save(&self, path: &Path) -> Result<(), PackageError> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn get(&self, package_id: &str) -> Option<&SeedPackage> {
        self.packages.iter().find(|p| p.package_id == package_id)
    }

    pub fn validate(&self) -> Result<(), PackageError> {
        if self.schema_version != SEED_SCHEMA_VERSION {
            return Err(PackageError::RegistryInvalid(format!(
                "unsupported schema_version {} (expected {SEED_SCHEMA_VERSION})",
                self.schema_version
            )));
        }

        let mut tiers: BTreeMap<&str, Tier> = BTreeMap::new();
        for seed in &self.packages {
            if tiers.insert(&seed.package_id, seed.tier).is_some() {
                return Err(PackageError::RegistryInvalid(format!(
                    "duplicate package id {}",
                    seed.package_id
                )));
            }
        }

        let mut ordered = BTreeSet::new();
        for id in &self.install_order {
            if !tiers.contains_key(id.as_str()) {
                return Err(PackageError::RegistryInvalid(format!(
                    "install_order names undeclared package {id}"
                )));
            }
            if !ordered.insert(id.as_str()) {
                return Err(PackageError::RegistryInvalid(format!(
                    "install_order lists {id} twice"
                )));
            }
        }
        if let Some(missing) = tiers.keys().find(|id| !ordered.contains(*id)) {
            return Err(PackageError::RegistryInvalid(format!(
                "package {missing} is missing from install_order"
            )));
        }

        for seed in &self.packages {
            for dep in &seed.dependencies {
                let dep_tier = tiers.get(dep.as_str()).ok_or_else(|| {
                    PackageError::RegistryInvalid(format!(
                        "{} depends on undeclared package {dep}",
                        seed.package_id
                    ))
                })?;
                if *dep_tier >= seed.tier {
                    return Err(PackageError::TierInversion {
                        package_id: seed.package_id.clone(),
                        tier: seed.tier,
                        dependency: dep.clone(),
                        dependency_tier: *dep_tier,
                    });
                }
            }
            self.resolve(seed)?.validate()?;
        }
        Ok(())
    }

    /// All packages, in `install_order`.
    pub fn packages(&self) -> Result<Vec<Package>, PackageError> {
        self.install_order
            .iter()
            .filter_map(|id| self.get(id))
            .map(|seed| self.resolve(seed))
            .collect()
    }

    pub fn package(&self, package_id: &str) -> Result<Package, PackageError> {
        let seed = self.get(package_id).ok_or_else(|| {
            PackageError::RegistryInvalid(format!("package {package_id} is not declared"))
        })?;
        self.resolve(seed)
    }

    /// Position of every package in `install_order`.
    pub fn order_index(&self) -> BTreeMap<String, usize> {
        self.install_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect()
    }

    /// Point every archive at `<dir>/<package_id>.tar.gz`.
    pub fn relocated(&self, dir: &Path) -> Self {
        let mut copy = self.clone();
        for seed in &mut copy.packages {
            seed.archive = dir.join(archive_file_name(&seed.package_id));
        }
        copy.base_dir = dir.to_path_buf();
        copy
    }

    fn resolve(&self, seed: &SeedPackage) -> Result<Package, PackageError> {
        let signature = seed
            .signature
            .as_deref()
            .map(|s| BASE64.decode(s))
            .transpose()
            .map_err(|e| PackageError::SignatureInvalid {
                package_id: seed.package_id.clone(),
                reason: format!("signature is not base64: {e}"),
            })?;

        Ok(Package {
            package_id: seed.package_id.clone(),
            version: seed.version.clone(),
            tier: seed.tier,
            declared_dependencies: seed.dependencies.clone(),
            manifest: seed.manifest.clone(),
            archive: self.base_dir.join(&seed.archive),
            archive_hash: seed.archive_hash,
            signature,
            attestation: seed.attestation.clone(),
        })
    }
}

/// File name used for a package archive in an export or package store.
pub fn archive_file_name(package_id: &str) -> String {
    format!("{package_id}.tar.gz")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(id: &str, tier: Tier, deps: &[&str]) -> SeedPackage {
        SeedPackage {
            package_id: id.into(),
            version: semver::Version::new(1, 0, 0),
            tier,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            manifest: PackageManifest::default(),
            archive: format!("{id}.tar.gz").into(),
            archive_hash: Digest::ZERO,
            signature: None,
            attestation: None,
        }
    }

    fn order(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn valid_registry_resolves_in_install_order() {
        let registry = SeedRegistry::new(
            vec![
                seed("PKG-T0-001", Tier::T0, &["PKG-G0-001"]),
                seed("PKG-G0-001", Tier::G0, &[]),
            ],
            order(&["PKG-G0-001", "PKG-T0-001"]),
        )
        .with_base_dir("/seed");
        registry.validate().unwrap();

        let packages = registry.packages().unwrap();
        assert_eq!(packages[0].package_id, "PKG-G0-001");
        assert_eq!(packages[1].archive, PathBuf::from("/seed/PKG-T0-001.tar.gz"));
    }

    #[test]
    fn schema_version_must_be_one() {
        let mut registry = SeedRegistry::new(vec![], vec![]);
        registry.schema_version = 2;
        assert_eq!(registry.validate().unwrap_err().code(), "REGISTRY_INVALID");
    }

    #[test]
    fn install_order_must_cover_every_package() {
        let registry = SeedRegistry::new(
            vec![seed("PKG-G0-001", Tier::G0, &[]), seed("PKG-G0-002", Tier::G0, &[])],
            order(&["PKG-G0-001"]),
        );
        assert!(registry.validate().is_err());

        let registry = SeedRegistry::new(
            vec![seed("PKG-G0-001", Tier::G0, &[])],
            order(&["PKG-G0-001", "PKG-G0-404"]),
        );
        assert!(registry.validate().is_err());
    }

    #[test]
    fn dependencies_must_point_to_lower_tiers() {
        let registry = SeedRegistry::new(
            vec![
                seed("PKG-T1-001", Tier::T1, &[]),
                seed("PKG-T1-002", Tier::T1, &["PKG-T1-001"]),
            ],
            order(&["PKG-T1-001", "PKG-T1-002"]),
        );
        assert!(matches!(
            registry.validate(),
            Err(PackageError::TierInversion { .. })
        ));
    }

    #[test]
    fn genesis_packages_have_no_dependencies() {
        let registry = SeedRegistry::new(
            vec![
                seed("PKG-G0-001", Tier::G0, &[]),
                seed("PKG-G0-002", Tier::G0, &["PKG-G0-001"]),
            ],
            order(&["PKG-G0-001", "PKG-G0-002"]),
        );
        assert!(registry.validate().is_err());
    }

    #[test]
    fn relocation_rewrites_archive_paths() {
        let registry = SeedRegistry::new(
            vec![seed("PKG-G0-001", Tier::G0, &[])],
            order(&["PKG-G0-001"]),
        )
        .with_base_dir("/seed");
        let moved = registry.relocated(Path::new("/drill/archives"));
        assert_eq!(
            moved.packages().unwrap()[0].archive,
            PathBuf::from("/drill/archives/PKG-G0-001.tar.gz")
        );
    }
}
