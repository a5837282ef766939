//! Rebuild drill: export, wipe, reinstall, compare.
//!
//! Proves the managed tree can be rebuilt from its own exported archives.
//! The export directory is evidence and is never deleted; the ledger is
//! append-only and is never wiped.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_capability::{Actor, DestructiveToken, OperationKind};
use strata_ledger::{streams, ChainReport, Digest, EventType};
use strata_package::{archive_file_name, hash_file, SeedRegistry, Tier};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{DrillError, InstallError};
use crate::orchestrator::{Orchestrator, PlanReport};
use crate::policy::InstallPolicy;
use crate::session::Session;
use crate::state::PackageTransition;

pub const ENV_DRILL_MODE: &str = "STRATA_DRILL_MODE";
pub const ENV_WIPE_CONFIRM: &str = "WIPE_CONFIRM";

const MANIFEST_FILE: &str = "drill.json";
const REGISTRY_FILE: &str = "seed_registry.json";

/// Strict drills allow no waivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrillMode {
    Strict,
    Dev,
}

impl DrillMode {
    /// Anything other than `dev` is strict.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "dev" => DrillMode::Dev,
            _ => DrillMode::Strict,
        }
    }

    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(ENV_DRILL_MODE).ok().as_deref())
    }

    /// The policy a drill reinstalls under. Install mode is always on.
    pub fn policy(self, base: InstallPolicy) -> InstallPolicy {
        InstallPolicy {
            strict: self == DrillMode::Strict,
            install_mode: true,
            ..base
        }
    }
}

/// What was exported, recorded as `drill.json` in the export directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrillExport {
    pub drill_id: String,
    pub dir: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Packages with a receipt before the wipe.
    pub pre_installed: BTreeSet<String>,
    /// SHA-256 of each exported archive.
    pub archives: BTreeMap<String, Digest>,
}

impl DrillExport {
    pub fn archives_dir(&self) -> PathBuf {
        self.dir.join("archives")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.dir.join(REGISTRY_FILE)
    }

    pub fn load(dir: &Path) -> Result<Self, DrillError> {
        let path = dir.join(MANIFEST_FILE);
        let bytes = std::fs::read(&path).map_err(|source| DrillError::Export {
            path: path.clone(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| DrillError::Export {
            path,
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DrillReport {
    pub drill_id: String,
    pub export_dir: PathBuf,
    /// Packages wiped plus stray entries removed.
    pub removed: usize,
    pub pre_installed: BTreeSet<String>,
    pub post_installed: BTreeSet<String>,
    /// Installed before the wipe, missing after the rebuild.
    pub mismatches: Vec<String>,
    pub plan: PlanReport,
    pub chains: BTreeMap<String, ChainReport>,
}

impl DrillReport {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty() && self.chains.values().all(|c| c.valid)
    }
}

#[derive(Serialize)]
struct ExportRecord<'a> {
    drill_id: &'a str,
    export_dir: String,
    artifacts: &'a BTreeSet<String>,
}

#[derive(Serialize)]
struct WipeRecord<'a> {
    drill_id: &'a str,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    package_id: Option<&'a str>,
}

#[derive(Serialize)]
struct CompleteRecord<'a> {
    drill_id: &'a str,
    installed: usize,
    mismatches: &'a [String],
}

pub struct Drill<'a> {
    session: &'a Session,
    registry: &'a SeedRegistry,
}

impl<'a> Drill<'a> {
    pub fn new(session: &'a Session, registry: &'a SeedRegistry) -> Self {
        Self { session, registry }
    }

    /// Export, wipe, reinstall and compare.
    pub async fn run(&self, token: &DestructiveToken) -> Result<DrillReport, DrillError> {
        let export = self.export().await?;
        let removed = self.wipe(&export, token).await?;
        let plan = self.reinstall(&export).await?;
        self.compare(&export, removed, plan).await
    }

    /// Copy the package archives, ledger and receipts into a fresh
    /// `drill-<timestamp>` directory.
    pub async fn export(&self) -> Result<DrillExport, DrillError> {
        let created_at = Utc::now();
        let drill_id = format!("drill-{}", created_at.format("%Y%m%dT%H%M%S%.6fZ"));
        let dir = self.session.config().drill_dir().join(&drill_id);
        self.session
            .enforcer()
            .authorize(&Actor::Orchestrator, OperationKind::Write, &dir, None)
            .await?;

        let export_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| DrillError::Export { path, source }
        };
        let archives_dir = dir.join("archives");
        std::fs::create_dir_all(&archives_dir).map_err(export_err(&archives_dir))?;

        self.session.ledger().flush()?;
        let ledger_copy = dir.join("ledger");
        copy_tree(self.session.ledger().dir(), &ledger_copy).map_err(export_err(&ledger_copy))?;
        let receipts_copy = dir.join("receipts");
        copy_tree(self.session.receipts().dir(), &receipts_copy)
            .map_err(export_err(&receipts_copy))?;

        let mut archives = BTreeMap::new();
        for package in self.registry.packages()? {
            let target = archives_dir.join(archive_file_name(&package.package_id));
            match std::fs::copy(&package.archive, &target) {
                Ok(_) => {
                    archives.insert(package.package_id.clone(), hash_file(&target)?);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(package_id = %package.package_id, archive = %package.archive.display(), "Archive missing; not exported");
                }
                Err(e) => return Err(export_err(&target)(e)),
            }
        }

        let registry_path = dir.join(REGISTRY_FILE);
        self.registry.relocated(&archives_dir).save(&registry_path)?;

        let pre_installed = self
            .session
            .receipts()
            .list()?
            .into_iter()
            .map(|r| r.package_id)
            .collect();
        let export = DrillExport {
            drill_id,
            dir,
            created_at,
            pre_installed,
            archives,
        };
        let manifest_path = export.dir.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(&export).map_err(|e| DrillError::Export {
            path: manifest_path.clone(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;
        std::fs::write(&manifest_path, json).map_err(export_err(&manifest_path))?;

        self.session
            .ledger()
            .append(
                streams::GOVERNANCE,
                EventType::DrillExport,
                &ExportRecord {
                    drill_id: &export.drill_id,
                    export_dir: export.dir.display().to_string(),
                    artifacts: &export.pre_installed,
                },
            )
            .await?;
        info!(
            drill_id = %export.drill_id,
            dir = %export.dir.display(),
            archives = export.archives.len(),
            installed = export.pre_installed.len(),
            "Drill export complete"
        );
        Ok(export)
    }

    /// Remove every installed package except the Genesis set, plus any
    /// stray entries under the install base. Returns the number of packages
    /// wiped plus stray entries removed.
    pub async fn wipe(
        &self,
        export: &DrillExport,
        token: &DestructiveToken,
    ) -> Result<usize, DrillError> {
        let session = self.session;
        let mut removed = 0;
        let mut preserved = BTreeSet::new();

        for receipt in session.receipts().list()? {
            if receipt.tier == Tier::G0 {
                preserved.insert(receipt.destination_path.clone());
                continue;
            }
            let id = receipt.package_id.as_str();
            if receipt.destination_path.exists() {
                self.remove(export, &receipt.destination_path, Some(id), token)
                    .await?;
            }
            session.receipts().remove(id)?;
            if session.states().get(id).is_installed() {
                session.states().transition(id, PackageTransition::Uninstall)?;
            }
            session.enforcer().unbind(&Actor::package(id));
            self.record_wipe(export, &session.receipts().path_for(id), Some(id))
                .await?;
            removed += 1;
        }

        let base = session.root().join(&session.config().install_base);
        if base.exists() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(&base)
                .map_err(|e| InstallError::io(&base, e))?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<Result<_, _>>()
                .map_err(|e| InstallError::io(&base, e))?;
            entries.sort();
            for path in entries.into_iter().filter(|p| !preserved.contains(p)) {
                self.remove(export, &path, None, token).await?;
                removed += 1;
            }
        }

        info!(drill_id = %export.drill_id, removed, preserved = preserved.len(), "Drill wipe complete");
        Ok(removed)
    }

    /// Reinstall from the exported archives: G0 via Genesis, then T0-T3.
    pub async fn reinstall(&self, export: &DrillExport) -> Result<PlanReport, DrillError> {
        let registry = SeedRegistry::load(&export.registry_path())?;
        let report = Orchestrator::new(self.session, &registry)
            .install_plan()
            .await?;
        Ok(report)
    }

    /// Compare installed sets and re-verify every ledger stream.
    pub async fn compare(
        &self,
        export: &DrillExport,
        removed: usize,
        plan: PlanReport,
    ) -> Result<DrillReport, DrillError> {
        let post_installed = plan.installed.clone();
        let mismatches: Vec<String> = export
            .pre_installed
            .difference(&post_installed)
            .cloned()
            .collect();
        for id in &mismatches {
            warn!(drill_id = %export.drill_id, package_id = %id, "MISMATCH");
        }

        let chains = self.session.ledger().verify_all()?;
        let broken: Vec<String> = chains
            .iter()
            .filter(|(_, report)| !report.valid)
            .map(|(stream, _)| stream.clone())
            .collect();
        if !broken.is_empty() {
            return Err(DrillError::ChainVerificationFailure { streams: broken });
        }

        self.session
            .ledger()
            .append(
                streams::GOVERNANCE,
                EventType::DrillComplete,
                &CompleteRecord {
                    drill_id: &export.drill_id,
                    installed: post_installed.len(),
                    mismatches: &mismatches,
                },
            )
            .await?;
        info!(
            drill_id = %export.drill_id,
            installed = post_installed.len(),
            mismatches = mismatches.len(),
            "Drill complete"
        );

        Ok(DrillReport {
            drill_id: export.drill_id.clone(),
            export_dir: export.dir.clone(),
            removed,
            pre_installed: export.pre_installed.clone(),
            post_installed,
            mismatches,
            plan,
            chains,
        })
    }

    async fn remove(
        &self,
        export: &DrillExport,
        path: &Path,
        package_id: Option<&str>,
        token: &DestructiveToken,
    ) -> Result<(), DrillError> {
        self.session
            .enforcer()
            .authorize(&Actor::Orchestrator, OperationKind::Write, path, Some(token))
            .await?;
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        result.map_err(|e| InstallError::io(path, e))?;
        self.record_wipe(export, path, package_id).await
    }

    async fn record_wipe(
        &self,
        export: &DrillExport,
        path: &Path,
        package_id: Option<&str>,
    ) -> Result<(), DrillError> {
        self.session
            .ledger()
            .append(
                streams::GOVERNANCE,
                EventType::DrillWipe,
                &WipeRecord {
                    drill_id: &export.drill_id,
                    path: path.display().to_string(),
                    package_id,
                },
            )
            .await?;
        Ok(())
    }
}

/// Recursively copy `src` into `dst`. A missing `src` copies nothing.
fn copy_tree(src: &Path, dst: &Path) -> io::Result<usize> {
    std::fs::create_dir_all(dst)?;
    if !src.exists() {
        return Ok(0);
    }
    let mut copied = 0;
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}
