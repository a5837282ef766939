use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use strata_ledger::{streams, EventType, Ledger};
use tracing::{debug, warn};

use crate::actor::Actor;
use crate::decision::{Decision, DenyReason};
use crate::error::CapabilityError;
use crate::manifest::{AgentRole, CapabilityManifest, CompiledManifest, OperationKind};
use crate::path::{is_within, normalize};
use crate::pristine::{DestructiveToken, PristineSet};

struct BoundManifest {
    manifest: CapabilityManifest,
    compiled: CompiledManifest,
}

/// Ledger payload for a denied check.
#[derive(Serialize)]
struct DenialRecord<'a> {
    actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    package_id: Option<&'a str>,
    operation: OperationKind,
    path: String,
    reason: DenyReason,
}

/// Ledger payload for a destructive-mode write to a pristine path.
#[derive(Serialize)]
struct BypassRecord {
    actor: String,
    operation: OperationKind,
    path: String,
}

/// Fail-closed authorization of filesystem operations.
///
/// Evaluation order for `check`:
/// 1. lexical normalization of the path against the governed root
/// 2. paths outside the root are denied
/// 3. write/execute on a pristine path: only the orchestrator holding a
///    [`DestructiveToken`] passes (and the bypass is recorded)
/// 4. the actor's manifest, first matching rule allows
/// 5. otherwise deny
///
/// Every deny is on the governance stream before `check` returns.
pub struct CapabilityEnforcer {
    root: PathBuf,
    pristine: PristineSet,
    ledger: Arc<Ledger>,
    manifests: RwLock<HashMap<Actor, Arc<BoundManifest>>>,
}

impl CapabilityEnforcer {
    pub fn new(root: impl AsRef<Path>, pristine: PristineSet, ledger: Arc<Ledger>) -> Self {
        let root = normalize(Path::new("/"), root.as_ref());
        Self {
            root,
            pristine,
            ledger,
            manifests: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pristine(&self) -> &PristineSet {
        &self.pristine
    }

    /// Bind `manifest` to `actor` for the rest of the actor's lifetime.
    pub fn bind(&self, actor: Actor, manifest: CapabilityManifest) -> Result<(), CapabilityError> {
        let compiled = CompiledManifest::compile(&manifest, &self.root)?;
        let mut manifests = self.manifests.write();
        if manifests.contains_key(&actor) {
            return Err(CapabilityError::AlreadyBound(actor));
        }
        debug!(actor = %actor, rules = manifest.rules().len(), "Manifest bound");
        manifests.insert(actor, Arc::new(BoundManifest { manifest, compiled }));
        Ok(())
    }

    /// Bind the fixed manifest of `role` to a new agent.
    pub fn bind_agent(&self, id: &str, role: AgentRole) -> Result<Actor, CapabilityError> {
        let actor = Actor::agent(id, role);
        self.bind(actor.clone(), role.baseline_manifest(id))?;
        Ok(actor)
    }

    /// End an actor's lifetime. Returns whether a manifest was bound.
    pub fn unbind(&self, actor: &Actor) -> bool {
        self.manifests.write().remove(actor).is_some()
    }

    pub fn is_bound(&self, actor: &Actor) -> bool {
        self.manifests.read().contains_key(actor)
    }

    pub fn manifest(&self, actor: &Actor) -> Option<CapabilityManifest> {
        self.manifests
            .read()
            .get(actor)
            .map(|bound| bound.manifest.clone())
    }

    /// Decide whether `actor` may perform `op` on `path`.
    ///
    /// The decision depends only on the inputs and the bound manifest.
    /// `Err` means the decision could not be recorded; treat it as a deny.
    pub async fn check(
        &self,
        actor: &Actor,
        op: OperationKind,
        path: &Path,
        token: Option<&DestructiveToken>,
    ) -> Result<Decision, CapabilityError> {
        let normalized = normalize(&self.root, path);
        let (decision, bypass) = self.evaluate(actor, op, &normalized, token.is_some());

        match decision {
            Decision::Allow if bypass => {
                warn!(actor = %actor, operation = %op, path = %normalized.display(), "Pristine bypass under destructive mode");
                self.ledger
                    .append(
                        streams::GOVERNANCE,
                        EventType::PristineBypass,
                        &BypassRecord {
                            actor: actor.to_string(),
                            operation: op,
                            path: normalized.display().to_string(),
                        },
                    )
                    .await?;
            }
            Decision::Allow => {}
            Decision::Deny(reason) => {
                warn!(actor = %actor, operation = %op, path = %normalized.display(), reason = %reason, "Capability denied");
                self.ledger
                    .append(
                        streams::GOVERNANCE,
                        EventType::CapabilityDenied,
                        &DenialRecord {
                            actor: actor.to_string(),
                            package_id: actor.package_id(),
                            operation: op,
                            path: normalized.display().to_string(),
                            reason,
                        },
                    )
                    .await?;
            }
        }
        Ok(decision)
    }

    /// [`check`](Self::check) as a `Result`.
    pub async fn authorize(
        &self,
        actor: &Actor,
        op: OperationKind,
        path: &Path,
        token: Option<&DestructiveToken>,
    ) -> Result<(), CapabilityError> {
        match self.check(actor, op, path, token).await? {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(CapabilityError::Denied {
                actor: actor.clone(),
                operation: op,
                path: normalize(&self.root, path),
                reason,
            }),
        }
    }

    /// Pure evaluation. The second value marks a pristine bypass.
    fn evaluate(
        &self,
        actor: &Actor,
        op: OperationKind,
        path: &Path,
        has_token: bool,
    ) -> (Decision, bool) {
        if !is_within(path, &self.root) {
            return (Decision::Deny(DenyReason::OutsideRoot), false);
        }

        if op.is_mutating() && self.pristine.contains(path) {
            if actor.is_orchestrator() && has_token {
                return (Decision::Allow, true);
            }
            return (Decision::Deny(DenyReason::PristineViolation), false);
        }

        let manifests = self.manifests.read();
        let Some(bound) = manifests.get(actor) else {
            return (Decision::Deny(DenyReason::NoManifest), false);
        };
        if bound.compiled.permits(op, path) {
            (Decision::Allow, false)
        } else {
            (Decision::Deny(DenyReason::NoMatchingRule), false)
        }
    }
}

impl std::fmt::Debug for CapabilityEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityEnforcer")
            .field("root", &self.root)
            .field("pristine", &self.pristine)
            .field("actors", &self.manifests.read().len())
            .finish()
    }
}
