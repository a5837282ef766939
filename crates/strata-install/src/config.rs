//! Session configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::InstallError;
use crate::policy::InstallPolicy;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "strata.toml";

/// Where everything lives. Unset directories default to fixed names under `root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    /// Governed root. Capability checks deny everything outside it.
    pub root: PathBuf,

    /// Ledger streams and index (default `<root>/ledger`)
    pub ledger_dir: Option<PathBuf>,

    /// Installed receipts (default `<root>/receipts`)
    pub receipts_dir: Option<PathBuf>,

    /// Package store holding archives and the seed registry (default `<root>/store`)
    pub store_dir: Option<PathBuf>,

    /// Seed registry file (default `<store_dir>/seed_registry.json`)
    pub registry: Option<PathBuf>,

    /// Drill exports (default `<root>/drills`)
    pub drill_dir: Option<PathBuf>,

    /// Destination base for installs, relative to `root`
    pub install_base: String,

    /// Pristine prefixes, relative to `root` unless absolute
    pub pristine: Vec<PathBuf>,

    /// Hex-encoded Ed25519 public keys trusted for package signatures
    pub trusted_keys: Vec<String>,

    pub policy: InstallPolicy,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            ledger_dir: None,
            receipts_dir: None,
            store_dir: None,
            registry: None,
            drill_dir: None,
            install_base: "installed".to_string(),
            pristine: vec![PathBuf::from("ledger"), PathBuf::from("store")],
            trusted_keys: Vec::new(),
            policy: InstallPolicy::default(),
        }
    }
}

impl StrataConfig {
    /// Configuration rooted at `root` with every other setting defaulted.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load from `path`, or from `strata.toml` when `None`. A missing file
    /// yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, InstallError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| InstallError::io(path, e))?;
        let mut config: StrataConfig =
            toml::from_str(&contents).map_err(|e| InstallError::Config(e.to_string()))?;
        if config.root.is_relative() {
            if let Some(parent) = path.parent() {
                config.root = parent.join(&config.root);
            }
        }
        Ok(config)
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.resolve(&self.ledger_dir, "ledger")
    }

    pub fn receipts_dir(&self) -> PathBuf {
        self.resolve(&self.receipts_dir, "receipts")
    }

    pub fn store_dir(&self) -> PathBuf {
        self.resolve(&self.store_dir, "store")
    }

    pub fn registry_path(&self) -> PathBuf {
        match &self.registry {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.root.join(p),
            None => self.store_dir().join("seed_registry.json"),
        }
    }

    pub fn drill_dir(&self) -> PathBuf {
        self.resolve(&self.drill_dir, "drills")
    }

    /// `<root>/<base>/<package_id>`, with `base` defaulting to `install_base`.
    pub fn destination_for(&self, package_id: &str, base: Option<&str>) -> PathBuf {
        self.root
            .join(base.unwrap_or(&self.install_base))
            .join(package_id)
    }

    fn resolve(&self, value: &Option<PathBuf>, default: &str) -> PathBuf {
        match value {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.root.join(p),
            None => self.root.join(default),
        }
    }
}
