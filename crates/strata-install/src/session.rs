use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_capability::{
    Actor, CapabilityEnforcer, CapabilityManifest, OperationKind, PristineSet,
};
use strata_ledger::Ledger;
use strata_package::{
    AttestationVerifier, Ed25519Verifier, SeedRegistry, SignatureVerifier, SubjectHashVerifier,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::StrataConfig;
use crate::error::InstallError;
use crate::policy::InstallPolicy;
use crate::receipt::ReceiptStore;
use crate::state::StateTable;

/// Everything one run of the installer works against.
///
/// Created by [`Session::open`] and passed explicitly to every operation.
/// [`Session::close`] flushes the ledger index.
pub struct Session {
    config: StrataConfig,
    ledger: Arc<Ledger>,
    enforcer: Arc<CapabilityEnforcer>,
    receipts: ReceiptStore,
    states: StateTable,
    policy: InstallPolicy,
    signatures: Arc<dyn SignatureVerifier>,
    attestations: Arc<dyn AttestationVerifier>,
    cancel: CancellationToken,
}

impl Session {
    pub fn open(mut config: StrataConfig) -> Result<Self, InstallError> {
        std::fs::create_dir_all(&config.root).map_err(|e| InstallError::io(&config.root, e))?;
        config.root =
            std::path::absolute(&config.root).map_err(|e| InstallError::io(&config.root, e))?;

        let ledger = Arc::new(Ledger::open(config.ledger_dir())?);
        let pristine = PristineSet::new(&config.root, &config.pristine);
        let enforcer = Arc::new(CapabilityEnforcer::new(
            &config.root,
            pristine,
            ledger.clone(),
        ));
        enforcer.bind(Actor::Orchestrator, orchestrator_manifest(&config))?;

        let receipts = ReceiptStore::open(config.receipts_dir())?;
        let states = StateTable::with_installed(
            receipts.list()?.into_iter().map(|r| r.package_id),
        );
        let signatures = Arc::new(Ed25519Verifier::from_hex_keys(&config.trusted_keys)?);

        info!(
            root = %config.root.display(),
            installed = states.installed().len(),
            strict = config.policy.strict,
            "Session opened"
        );
        Ok(Self {
            policy: config.policy,
            config,
            ledger,
            enforcer,
            receipts,
            states,
            signatures,
            attestations: Arc::new(SubjectHashVerifier),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_policy(mut self, policy: InstallPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_signature_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.signatures = verifier;
        self
    }

    pub fn with_attestation_verifier(mut self, verifier: Arc<dyn AttestationVerifier>) -> Self {
        self.attestations = verifier;
        self
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn enforcer(&self) -> &Arc<CapabilityEnforcer> {
        &self.enforcer
    }

    pub fn receipts(&self) -> &ReceiptStore {
        &self.receipts
    }

    pub fn states(&self) -> &StateTable {
        &self.states
    }

    pub fn policy(&self) -> &InstallPolicy {
        &self.policy
    }

    pub fn signatures(&self) -> &dyn SignatureVerifier {
        self.signatures.as_ref()
    }

    pub fn attestations(&self) -> &dyn AttestationVerifier {
        self.attestations.as_ref()
    }

    /// Cancelling this token stops in-flight installs.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn destination_for(&self, package_id: &str, base: Option<&str>) -> PathBuf {
        self.config.destination_for(package_id, base)
    }

    pub fn load_registry(&self) -> Result<SeedRegistry, InstallError> {
        Ok(SeedRegistry::load(&self.config.registry_path())?)
    }

    /// Flush the ledger index and end the session.
    pub fn close(self) -> Result<(), InstallError> {
        self.ledger.flush()?;
        info!(root = %self.config.root.display(), "Session closed");
        Ok(())
    }
}

/// Read everywhere; write under the install base and the drill directory.
fn orchestrator_manifest(config: &StrataConfig) -> CapabilityManifest {
    let mut manifest = CapabilityManifest::empty()
        .with_rule("**", OperationKind::Read)
        .with_rule(format!("{}/**", config.install_base), OperationKind::Write);
    if let Ok(rel) = config.drill_dir().strip_prefix(&config.root) {
        manifest = manifest.with_rule(format!("{}/**", rel.display()), OperationKind::Write);
    }
    manifest
}
