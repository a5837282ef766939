use std::fmt;

use serde::{Deserialize, Serialize};

pub const ENV_INSTALL_MODE: &str = "STRATA_INSTALL_MODE";
pub const ENV_ALLOW_UNSIGNED: &str = "STRATA_ALLOW_UNSIGNED";
pub const ENV_ALLOW_UNATTESTED: &str = "STRATA_ALLOW_UNATTESTED";

/// Trust requirements for the standard installer.
///
/// Strict mode makes missing signatures and attestations fatal. The waiver
/// flags only take effect outside strict mode; when both are set, strict
/// wins and the conflict is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallPolicy {
    pub strict: bool,
    pub allow_unsigned: bool,
    pub allow_unattested: bool,
    /// Standard (T0-T3) installs are refused unless set. Genesis ignores it.
    pub install_mode: bool,
}

impl Default for InstallPolicy {
    fn default() -> Self {
        Self {
            strict: true,
            allow_unsigned: false,
            allow_unattested: false,
            install_mode: false,
        }
    }
}

/// What a waiver would excuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaiverKind {
    Unsigned,
    Unattested,
}

impl fmt::Display for WaiverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaiverKind::Unsigned => f.write_str("unsigned"),
            WaiverKind::Unattested => f.write_str("unattested"),
        }
    }
}

/// How a missing signature or attestation is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingResolution {
    /// Proceed and record a `WAIVER` event.
    Waive,
    /// Fail the install.
    Refuse,
    /// A waiver was requested under strict mode: record `WAIVER_CONFLICT`, then fail.
    Conflict,
}

impl InstallPolicy {
    /// Overlay the install-mode and waiver environment variables.
    pub fn from_env(self) -> Self {
        self.with_env(|key| std::env::var(key).ok())
    }

    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_INSTALL_MODE) {
            self.install_mode = env_flag(&v);
        }
        if let Some(v) = lookup(ENV_ALLOW_UNSIGNED) {
            self.allow_unsigned = env_flag(&v);
        }
        if let Some(v) = lookup(ENV_ALLOW_UNATTESTED) {
            self.allow_unattested = env_flag(&v);
        }
        self
    }

    pub fn waiver_requested(&self, kind: WaiverKind) -> bool {
        match kind {
            WaiverKind::Unsigned => self.allow_unsigned,
            WaiverKind::Unattested => self.allow_unattested,
        }
    }

    pub fn resolve_missing(&self, kind: WaiverKind) -> MissingResolution {
        match (self.strict, self.waiver_requested(kind)) {
            (true, true) => MissingResolution::Conflict,
            (true, false) | (false, false) => MissingResolution::Refuse,
            (false, true) => MissingResolution::Waive,
        }
    }
}

/// `1`, `true`, `yes` and `on` (any case) are true.
pub fn env_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
