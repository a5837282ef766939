use std::path::Path;

use strata_package::{Package, Tier};

use crate::error::InstallError;
use crate::pipeline::{self, InstallerKind};
use crate::receipt::InstalledReceipt;
use crate::session::Session;

/// Installs the G0 bootstrap set.
///
/// Depends on nothing previously installed: no capability checks, no
/// signature or attestation policy. The archive hash declared in the seed
/// registry is the only trust anchor.
pub struct GenesisInstaller<'a> {
    session: &'a Session,
}

impl<'a> GenesisInstaller<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    pub async fn install(
        &self,
        package: &Package,
        destination: &Path,
    ) -> Result<InstalledReceipt, InstallError> {
        if package.tier != Tier::G0 {
            return Err(InstallError::TierMismatch {
                package_id: package.package_id.clone(),
                tier: package.tier,
                installer: "genesis",
            });
        }
        if let Err(e) = package.validate() {
            let err = InstallError::from(e);
            pipeline::record_failure(self.session, &package.package_id, "precheck", &err).await;
            return Err(err);
        }
        pipeline::install_package(self.session, package, destination, InstallerKind::Genesis).await
    }
}
