use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use futures::future::join_all;
use serde::Serialize;
use strata_capability::{Actor, OperationKind};
use strata_ledger::{streams, EventType};
use strata_package::{verify_archive, Package, SeedRegistry, Tier};
use tracing::{info, warn};

use crate::error::InstallError;
use crate::genesis::GenesisInstaller;
use crate::pipeline;
use crate::receipt::InstalledReceipt;
use crate::session::Session;
use crate::standard::StandardInstaller;
use crate::state::PackageTransition;

/// Outcome counts for one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierScore {
    pub tier: Tier,
    pub attempted: usize,
    pub installed: usize,
    pub failed: usize,
    /// Installed before the run and verified in place.
    pub already_installed: usize,
    /// Failed package id to error code.
    pub failures: BTreeMap<String, String>,
}

impl TierScore {
    fn new(tier: Tier) -> Self {
        Self {
            tier,
            attempted: 0,
            installed: 0,
            failed: 0,
            already_installed: 0,
            failures: BTreeMap::new(),
        }
    }

    fn fail(&mut self, package_id: &str, err: &InstallError) {
        self.failed += 1;
        self.failures
            .insert(package_id.to_string(), err.code().to_string());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    pub tiers: Vec<TierScore>,
    /// Registry packages that ended the run installed.
    pub installed: BTreeSet<String>,
    /// Registry packages that did not, with their error codes.
    pub failed: BTreeMap<String, String>,
    pub cancelled: bool,
}

impl PlanReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

/// Drives installs of a seed registry's packages in tier order.
pub struct Orchestrator<'a> {
    session: &'a Session,
    registry: &'a SeedRegistry,
    genesis: GenesisInstaller<'a>,
    standard: StandardInstaller<'a>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(session: &'a Session, registry: &'a SeedRegistry) -> Self {
        Self {
            session,
            registry,
            genesis: GenesisInstaller::new(session),
            standard: StandardInstaller::new(session, registry),
        }
    }

    /// Install every registry package, tier by tier.
    ///
    /// Packages of one tier run concurrently. A tier starts only after the
    /// previous one has settled; any package of a lower tier that is not
    /// installed fails every later package with `DependencyUnsatisfied`.
    /// Package-local failures are scored and the run continues; integrity
    /// failures abort it.
    pub async fn install_plan(&self) -> Result<PlanReport, InstallError> {
        let packages = self.registry.packages()?;
        let mut report = PlanReport::default();
        let mut blockers: BTreeSet<String> = BTreeSet::new();

        for tier in Tier::ALL {
            let tier_packages: Vec<&Package> = packages.iter().filter(|p| p.tier == tier).collect();
            if tier_packages.is_empty() {
                continue;
            }
            let mut score = TierScore::new(tier);

            if self.session.cancellation().is_cancelled() {
                report.cancelled = true;
                for package in &tier_packages {
                    let err = InstallError::Cancelled {
                        package_id: package.package_id.clone(),
                    };
                    score.fail(&package.package_id, &err);
                }
                blockers.extend(tier_packages.iter().map(|p| p.package_id.clone()));
                report.tiers.push(score);
                continue;
            }

            let installed = self.session.states().installed();
            let mut attempts = Vec::new();
            for package in &tier_packages {
                let id = &package.package_id;
                if installed.contains(id) {
                    match self.verify_in_place(package).await {
                        Ok(()) => score.already_installed += 1,
                        Err(e) if e.is_integrity_failure() => return Err(e),
                        Err(e) => {
                            pipeline::record_failure(self.session, id, "verify", &e).await;
                            score.fail(id, &e);
                        }
                    }
                    continue;
                }

                score.attempted += 1;
                let missing: BTreeSet<String> = blockers
                    .iter()
                    .chain(package.declared_dependencies.iter().filter(|d| !installed.contains(*d)))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    let err = InstallError::DependencyUnsatisfied {
                        package_id: id.clone(),
                        missing: missing.into_iter().collect(),
                    };
                    pipeline::record_failure(self.session, id, "precheck", &err).await;
                    score.fail(id, &err);
                    continue;
                }
                attempts.push(self.attempt(package));
            }

            for (id, outcome) in join_all(attempts).await {
                match outcome {
                    Ok(_) => score.installed += 1,
                    Err(e) if e.is_integrity_failure() => return Err(e),
                    Err(e) => score.fail(&id, &e),
                }
            }

            // Tier barrier: recompute the installed closure.
            let installed = self.session.states().installed();
            for package in &tier_packages {
                let id = &package.package_id;
                if !installed.contains(id) || score.failures.contains_key(id) {
                    blockers.insert(id.clone());
                }
            }
            info!(
                tier = %tier,
                attempted = score.attempted,
                installed = score.installed,
                failed = score.failed,
                already_installed = score.already_installed,
                "Tier complete"
            );
            report.tiers.push(score);
        }

        for score in &report.tiers {
            report.failed.extend(score.failures.clone());
        }
        let installed = self.session.states().installed();
        report.installed = packages
            .iter()
            .map(|p| p.package_id.clone())
            .filter(|id| installed.contains(id) && !report.failed.contains_key(id))
            .collect();
        Ok(report)
    }

    /// Install one registry package, optionally from another archive path
    /// and into another destination base.
    pub async fn install(
        &self,
        package_id: &str,
        archive: Option<&Path>,
        base: Option<&str>,
    ) -> Result<InstalledReceipt, InstallError> {
        let mut package = self.registry.package(package_id)?;
        if let Some(archive) = archive {
            package.archive = archive.to_path_buf();
        }
        let destination = self.session.destination_for(package_id, base);
        if package.tier.is_genesis() {
            self.genesis.install(&package, &destination).await
        } else {
            self.standard.install(&package, &destination).await
        }
    }

    async fn attempt(&self, package: &Package) -> (String, Result<InstalledReceipt, InstallError>) {
        let destination = self.session.destination_for(&package.package_id, None);
        let outcome = if package.tier.is_genesis() {
            self.genesis.install(package, &destination).await
        } else {
            self.standard.install(package, &destination).await
        };
        (package.package_id.clone(), outcome)
    }

    /// An installed package counts only if its receipt, its archive and its
    /// files still agree with the registry.
    async fn verify_in_place(&self, package: &Package) -> Result<(), InstallError> {
        let id = &package.package_id;
        let receipt = self
            .session
            .receipts()
            .load(id)?
            .ok_or_else(|| InstallError::NotInstalled {
                package_id: id.clone(),
            })?;
        if receipt.archive_hash != package.archive_hash {
            return Err(strata_package::PackageError::HashMismatch {
                package_id: id.clone(),
                expected: package.archive_hash.to_hex(),
                actual: receipt.archive_hash.to_hex(),
            }
            .into());
        }

        let owned = package.clone();
        tokio::task::spawn_blocking(move || verify_archive(&owned))
            .await
            .map_err(|e| InstallError::ExtractionFailed {
                package_id: id.clone(),
                reason: e.to_string(),
            })??;

        let drifted = receipt.drifted_files();
        if !drifted.is_empty() {
            return Err(InstallError::InstalledTreeModified {
                package_id: id.clone(),
                files: drifted,
            });
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct UninstallRecord<'a> {
    package_id: &'a str,
    receipt_id: &'a str,
    destination: String,
}

/// Remove an installed package: destination, then `UNINSTALL`, then receipt.
pub async fn uninstall(
    session: &Session,
    package_id: &str,
    base: Option<&str>,
) -> Result<(), InstallError> {
    let not_installed = || InstallError::NotInstalled {
        package_id: package_id.to_string(),
    };
    let receipt = session.receipts().load(package_id)?.ok_or_else(not_installed)?;
    if let Some(base) = base {
        if receipt.destination_path != session.destination_for(package_id, Some(base)) {
            return Err(not_installed());
        }
    }

    let destination = &receipt.destination_path;
    session
        .enforcer()
        .authorize(&Actor::Orchestrator, OperationKind::Write, destination, None)
        .await?;
    match std::fs::remove_dir_all(destination) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(package_id, destination = %destination.display(), "Destination already gone");
        }
        Err(e) => return Err(InstallError::io(destination, e)),
    }

    session
        .ledger()
        .append(
            streams::PACKAGE,
            EventType::Uninstall,
            &UninstallRecord {
                package_id,
                receipt_id: &receipt.receipt_id,
                destination: destination.display().to_string(),
            },
        )
        .await?;
    session.receipts().remove(package_id)?;
    session
        .states()
        .transition(package_id, PackageTransition::Uninstall)?;
    session.enforcer().unbind(&Actor::package(package_id));
    info!(package_id, "Package uninstalled");
    Ok(())
}
