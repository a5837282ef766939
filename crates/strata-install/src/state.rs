use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::InstallError;

/// Lifecycle of one package.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageState {
    NotPresent,
    Staged,
    Installing,
    Installed,
    Failed,
    Uninstalled,
}

/// Named transitions; the only way to change a [`PackageState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageTransition {
    /// Archive located and its hash verified.
    Stage,
    /// Pre-install checks failed; nothing was written.
    Abandon,
    /// Destination authorized and extraction starting.
    BeginInstall,
    Complete,
    Fail,
    Uninstall,
}

impl PackageState {
    pub fn apply(self, transition: PackageTransition) -> Option<PackageState> {
        use PackageState::*;
        use PackageTransition::*;

        match (self, transition) {
            (NotPresent | Failed | Uninstalled, Stage) => Some(Staged),
            (Staged, Abandon) => Some(NotPresent),
            (Staged, BeginInstall) => Some(Installing),
            (Installing, Complete) => Some(Installed),
            (Installing, Fail) => Some(Failed),
            (Installed, Uninstall) => Some(Uninstalled),
            (NotPresent | Staged | Installing | Installed | Failed | Uninstalled, _) => None,
        }
    }

    pub fn is_installed(&self) -> bool {
        matches!(self, PackageState::Installed)
    }

    /// Failed and uninstalled packages behave as absent for new installs.
    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            PackageState::NotPresent | PackageState::Failed | PackageState::Uninstalled
        )
    }
}

/// Per-session package states. Unknown packages are `NotPresent`.
#[derive(Debug, Default)]
pub struct StateTable {
    states: RwLock<BTreeMap<String, PackageState>>,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with packages that are already installed.
    pub fn with_installed<I: IntoIterator<Item = String>>(installed: I) -> Self {
        let states = installed
            .into_iter()
            .map(|id| (id, PackageState::Installed))
            .collect();
        Self {
            states: RwLock::new(states),
        }
    }

    pub fn get(&self, package_id: &str) -> PackageState {
        self.states
            .read()
            .get(package_id)
            .copied()
            .unwrap_or(PackageState::NotPresent)
    }

    pub fn transition(
        &self,
        package_id: &str,
        transition: PackageTransition,
    ) -> Result<PackageState, InstallError> {
        let mut states = self.states.write();
        let from = states
            .get(package_id)
            .copied()
            .unwrap_or(PackageState::NotPresent);
        let to = from
            .apply(transition)
            .ok_or_else(|| InstallError::InvalidTransition {
                package_id: package_id.to_string(),
                from,
                transition,
            })?;
        debug!(package_id, ?from, ?to, "Package state transition");
        states.insert(package_id.to_string(), to);
        Ok(to)
    }

    pub fn installed(&self) -> BTreeSet<String> {
        self.states
            .read()
            .iter()
            .filter(|(_, s)| s.is_installed())
            .map(|(id, _)| id.clone())
            .collect()
    }
}
