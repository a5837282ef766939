//! The install steps shared by the Genesis and standard installers.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use strata_capability::{Actor, OperationKind};
use strata_ledger::{streams, Digest, EventType};
use strata_package::{read_archive, verify_archive, Package, Tier};
use tracing::{debug, error, info, warn};

use crate::error::InstallError;
use crate::receipt::InstalledReceipt;
use crate::session::Session;
use crate::state::PackageTransition;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum InstallerKind {
    Genesis,
    Standard,
}

impl InstallerKind {
    fn gated(self) -> bool {
        matches!(self, InstallerKind::Standard)
    }
}

#[derive(Serialize)]
struct InstallRecord<'a> {
    package_id: &'a str,
    version: String,
    tier: Tier,
    archive_hash: Digest,
    destination: String,
    receipt_id: &'a str,
    installer: InstallerKind,
    files: usize,
}

#[derive(Serialize)]
struct EvidenceRecord<'a> {
    package_id: &'a str,
    receipt_id: &'a str,
    declared_reads: &'a [String],
    declared_writes: &'a [String],
    declared_executes: &'a [String],
    declared_dependencies: &'a [String],
}

#[derive(Serialize)]
struct FailureRecord<'a> {
    package_id: &'a str,
    stage: &'static str,
    code: &'static str,
    reason: String,
}

/// Append `INSTALL_FAILED`. A ledger failure here is logged; the original
/// error is what the caller sees.
pub(crate) async fn record_failure(
    session: &Session,
    package_id: &str,
    stage: &'static str,
    err: &InstallError,
) {
    warn!(package_id, stage, code = err.code(), error = %err, "Install failed");
    let record = FailureRecord {
        package_id,
        stage,
        code: err.code(),
        reason: err.to_string(),
    };
    if let Err(e) = session
        .ledger()
        .append(streams::PACKAGE, EventType::InstallFailed, &record)
        .await
    {
        error!(package_id, error = %e, "Could not record install failure");
    }
}

/// Stage, authorize, extract and commit one package.
pub(crate) async fn install_package(
    session: &Session,
    package: &Package,
    destination: &Path,
    kind: InstallerKind,
) -> Result<InstalledReceipt, InstallError> {
    let id = package.package_id.as_str();

    if session.states().get(id).is_installed() || session.receipts().exists(id) {
        let existing = session
            .receipts()
            .load(id)?
            .map(|r| r.destination_path)
            .unwrap_or_else(|| destination.to_path_buf());
        return Err(InstallError::DestinationExists {
            package_id: id.to_string(),
            path: existing,
        });
    }

    // NotPresent -> Staged
    let staged = {
        let package = package.clone();
        tokio::task::spawn_blocking(move || verify_archive(&package))
            .await
            .map_err(|e| InstallError::ExtractionFailed {
                package_id: id.to_string(),
                reason: e.to_string(),
            })?
    };
    if let Err(e) = staged {
        let err = InstallError::from(e);
        record_failure(session, id, "staging", &err).await;
        return Err(err);
    }
    session.states().transition(id, PackageTransition::Stage)?;
    debug!(package_id = id, archive = %package.archive.display(), "Package staged");

    // Staged -> Installing
    if let Err(err) = claim_destination(session, package, destination, kind).await {
        session.states().transition(id, PackageTransition::Abandon)?;
        record_failure(session, id, "staged", &err).await;
        return Err(err);
    }
    session.states().transition(id, PackageTransition::BeginInstall)?;

    // Installing -> Installed | Failed
    let outcome = match extract(session, package, destination, kind).await {
        Ok(file_hashes) => commit(session, package, destination, kind, file_hashes).await,
        Err(e) => Err(e),
    };
    match outcome {
        Ok(receipt) => {
            session.states().transition(id, PackageTransition::Complete)?;
            info!(
                package_id = id,
                tier = %package.tier,
                files = receipt.file_hashes.len(),
                destination = %destination.display(),
                "Package installed"
            );
            Ok(receipt)
        }
        Err(err) => {
            rollback(destination);
            session.states().transition(id, PackageTransition::Fail)?;
            let err = surface(err);
            record_failure(session, id, "installing", &err).await;
            Err(err)
        }
    }
}

async fn claim_destination(
    session: &Session,
    package: &Package,
    destination: &Path,
    kind: InstallerKind,
) -> Result<(), InstallError> {
    if session.cancellation().is_cancelled() {
        return Err(InstallError::Cancelled {
            package_id: package.package_id.clone(),
        });
    }
    if kind.gated() {
        session
            .enforcer()
            .authorize(&Actor::Orchestrator, OperationKind::Write, destination, None)
            .await?;
    }
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent).map_err(|e| InstallError::io(parent, e))?;
    }
    // Claimed exclusively; rollback only removes a tree this install created.
    match std::fs::create_dir(destination) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(InstallError::DestinationExists {
                package_id: package.package_id.clone(),
                path: destination.to_path_buf(),
            })
        }
        Err(e) => Err(InstallError::io(destination, e)),
    }
}

/// Write every archive file under the claimed `destination`, checking each write
/// (standard installer) and re-hashing what landed on disk.
async fn extract(
    session: &Session,
    package: &Package,
    destination: &Path,
    kind: InstallerKind,
) -> Result<BTreeMap<String, Digest>, InstallError> {
    let id = package.package_id.clone();

    let archive = package.archive.clone();
    let contents = tokio::task::spawn_blocking(move || read_archive(&archive))
        .await
        .map_err(|e| InstallError::ExtractionFailed {
            package_id: id.clone(),
            reason: e.to_string(),
        })??;

    for dir in &contents.dirs {
        let target = destination.join(dir);
        std::fs::create_dir_all(&target).map_err(|e| InstallError::io(&target, e))?;
    }

    let mut file_hashes = BTreeMap::new();
    for file in contents.files {
        if session.cancellation().is_cancelled() {
            return Err(InstallError::Cancelled { package_id: id });
        }
        let target = destination.join(&file.path);
        if kind.gated() {
            session
                .enforcer()
                .authorize(&Actor::Orchestrator, OperationKind::Write, &target, None)
                .await?;
        }

        let root = destination.to_path_buf();
        let (file, written) = tokio::task::spawn_blocking(move || {
            let written = file.write_to(&root);
            (file, written)
        })
        .await
        .map_err(|e| InstallError::ExtractionFailed {
            package_id: id.clone(),
            reason: e.to_string(),
        })?;
        let written = written.map_err(|e| InstallError::io(&target, e))?;
        if written != file.hash {
            return Err(InstallError::PartialWriteDetected {
                package_id: id,
                path: target,
            });
        }
        file_hashes.insert(file.path.to_string_lossy().into_owned(), written);
    }
    Ok(file_hashes)
}

async fn commit(
    session: &Session,
    package: &Package,
    destination: &Path,
    kind: InstallerKind,
    file_hashes: BTreeMap<String, Digest>,
) -> Result<InstalledReceipt, InstallError> {
    let id = package.package_id.as_str();
    let receipt_id = InstalledReceipt::receipt_id_for(id, &package.archive_hash);

    let entry = session
        .ledger()
        .append(
            streams::PACKAGE,
            EventType::Install,
            &InstallRecord {
                package_id: id,
                version: package.version.to_string(),
                tier: package.tier,
                archive_hash: package.archive_hash,
                destination: destination.display().to_string(),
                receipt_id: &receipt_id,
                installer: kind,
                files: file_hashes.len(),
            },
        )
        .await?;

    if kind == InstallerKind::Standard {
        session
            .ledger()
            .append(
                streams::EVIDENCE,
                EventType::Evidence,
                &EvidenceRecord {
                    package_id: id,
                    receipt_id: &receipt_id,
                    declared_reads: &package.manifest.declared_reads,
                    declared_writes: &package.manifest.declared_writes,
                    declared_executes: &package.manifest.declared_executes,
                    declared_dependencies: &package.declared_dependencies,
                },
            )
            .await?;
    }

    let receipt = InstalledReceipt {
        receipt_id,
        package_id: id.to_string(),
        version: package.version.clone(),
        tier: package.tier,
        archive_hash: package.archive_hash,
        destination_path: destination.to_path_buf(),
        file_hashes,
        installed_at: Utc::now(),
        ledger_ref: entry.position(),
    };
    session.receipts().save(&receipt)?;
    Ok(receipt)
}

/// Remove everything written under `destination`.
pub(crate) fn rollback(destination: &Path) {
    match std::fs::remove_dir_all(destination) {
        Ok(()) => debug!(destination = %destination.display(), "Rolled back partial install"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => error!(destination = %destination.display(), error = %e, "Rollback failed"),
    }
}

/// Partial writes are rolled back and reported as extraction failures.
fn surface(err: InstallError) -> InstallError {
    match err {
        InstallError::PartialWriteDetected { package_id, path } => InstallError::ExtractionFailed {
            package_id,
            reason: format!("partial write detected at {}", path.display()),
        },
        other => other,
    }
}
