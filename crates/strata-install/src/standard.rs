use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Serialize;
use strata_capability::Actor;
use strata_ledger::{streams, EventType};
use strata_package::{Package, PackageError, SeedRegistry, Tier};
use tracing::{debug, warn};

use crate::error::InstallError;
use crate::pipeline::{self, InstallerKind};
use crate::policy::{MissingResolution, WaiverKind};
use crate::receipt::InstalledReceipt;
use crate::session::Session;

#[derive(Serialize)]
struct WaiverRecord<'a> {
    package_id: &'a str,
    waiver: WaiverKind,
    strict: bool,
    resolution: &'static str,
}

/// Installs T0-T3 packages on top of an installed Genesis set.
pub struct StandardInstaller<'a> {
    session: &'a Session,
    by_tier: BTreeMap<Tier, BTreeSet<String>>,
}

impl<'a> StandardInstaller<'a> {
    /// Registry packages are grouped by tier; a package is installed only
    /// once every package of a lower tier is, the G0 set included.
    pub fn new(session: &'a Session, registry: &SeedRegistry) -> Self {
        let mut by_tier: BTreeMap<Tier, BTreeSet<String>> = BTreeMap::new();
        for seed in &registry.packages {
            by_tier
                .entry(seed.tier)
                .or_default()
                .insert(seed.package_id.clone());
        }
        Self { session, by_tier }
    }

    pub async fn install(
        &self,
        package: &Package,
        destination: &Path,
    ) -> Result<InstalledReceipt, InstallError> {
        if package.tier == Tier::G0 {
            return Err(InstallError::TierMismatch {
                package_id: package.package_id.clone(),
                tier: package.tier,
                installer: "standard",
            });
        }
        if let Err(err) = self.precheck(package).await {
            pipeline::record_failure(self.session, &package.package_id, "precheck", &err).await;
            return Err(err);
        }

        let receipt =
            pipeline::install_package(self.session, package, destination, InstallerKind::Standard)
                .await?;

        let actor = Actor::package(&package.package_id);
        let enforcer = self.session.enforcer();
        if !enforcer.is_bound(&actor) {
            if let Err(e) = enforcer.bind(actor, package.manifest.capability_manifest()) {
                warn!(package_id = %package.package_id, error = %e, "Could not bind package manifest");
            }
        }
        Ok(receipt)
    }

    async fn precheck(&self, package: &Package) -> Result<(), InstallError> {
        let id = &package.package_id;
        if !self.session.policy().install_mode {
            return Err(InstallError::InstallModeDisabled {
                package_id: id.clone(),
            });
        }

        let installed = self.session.states().installed();
        let missing: Vec<String> = self
            .by_tier
            .range(..package.tier)
            .flat_map(|(_, ids)| ids)
            .chain(&package.declared_dependencies)
            .filter(|dep| !installed.contains(*dep))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !missing.is_empty() {
            return Err(InstallError::DependencyUnsatisfied {
                package_id: id.clone(),
                missing,
            });
        }

        package.validate()?;
        self.check_signature(package).await?;
        self.check_attestation(package).await
    }

    async fn check_signature(&self, package: &Package) -> Result<(), InstallError> {
        let verifier = self.session.signatures();
        if !verifier.is_configured() {
            debug!(package_id = %package.package_id, "No trusted keys configured; signature not checked");
            return Ok(());
        }
        match &package.signature {
            Some(signature) => Ok(verifier.verify(package, signature)?),
            None => {
                self.handle_missing(package, WaiverKind::Unsigned, || {
                    PackageError::SignatureMissing(package.package_id.clone())
                })
                .await
            }
        }
    }

    async fn check_attestation(&self, package: &Package) -> Result<(), InstallError> {
        match &package.attestation {
            Some(attestation) => Ok(self.session.attestations().verify(package, attestation)?),
            None => {
                self.handle_missing(package, WaiverKind::Unattested, || {
                    PackageError::AttestationMissing(package.package_id.clone())
                })
                .await
            }
        }
    }

    async fn handle_missing<F>(
        &self,
        package: &Package,
        kind: WaiverKind,
        missing: F,
    ) -> Result<(), InstallError>
    where
        F: FnOnce() -> PackageError,
    {
        let policy = self.session.policy();
        let (event, resolution) = match policy.resolve_missing(kind) {
            MissingResolution::Refuse => return Err(missing().into()),
            MissingResolution::Waive => (EventType::Waiver, "waived"),
            MissingResolution::Conflict => (EventType::WaiverConflict, "strict_wins"),
        };

        warn!(
            package_id = %package.package_id,
            waiver = %kind,
            resolution,
            "Trust requirement not met"
        );
        self.session
            .ledger()
            .append(
                streams::GOVERNANCE,
                event,
                &WaiverRecord {
                    package_id: &package.package_id,
                    waiver: kind,
                    strict: policy.strict,
                    resolution,
                },
            )
            .await?;

        match event {
            EventType::Waiver => Ok(()),
            _ => Err(missing().into()),
        }
    }
}
