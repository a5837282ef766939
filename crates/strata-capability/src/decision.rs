use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a capability check was denied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    /// The actor has no bound manifest.
    NoManifest,
    /// No rule in the actor's manifest covers the operation.
    NoMatchingRule,
    /// The path resolves outside the governed root.
    OutsideRoot,
    /// Mutation of a pristine path without destructive-mode authority.
    PristineViolation,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::NoManifest => "NO_MANIFEST",
            DenyReason::NoMatchingRule => "NO_MATCHING_RULE",
            DenyReason::OutsideRoot => "OUTSIDE_ROOT",
            DenyReason::PristineViolation => "PRISTINE_VIOLATION",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a capability check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Decision::Allow => None,
            Decision::Deny(reason) => Some(*reason),
        }
    }
}
