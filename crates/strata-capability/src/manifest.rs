use std::fmt;
use std::path::Path;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::error::CapabilityError;

/// Filesystem operation classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Read,
    Write,
    Execute,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Write => "write",
            OperationKind::Execute => "execute",
        }
    }

    /// Operations that change the tree.
    pub fn is_mutating(&self) -> bool {
        matches!(self, OperationKind::Write | OperationKind::Execute)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(path_pattern, operation)` grant.
///
/// Patterns are globs: `*` stays inside one path component, `**` spans
/// components. Relative patterns are anchored at the governed root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRule {
    pub path_pattern: String,
    pub operation: OperationKind,
}

impl CapabilityRule {
    pub fn new(path_pattern: impl Into<String>, operation: OperationKind) -> Self {
        Self {
            path_pattern: path_pattern.into(),
            operation,
        }
    }
}

/// Ordered rule set owned by one actor.
///
/// Built once, then bound to an actor; the enforcer keeps its own frozen copy.
/// An empty manifest allows nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityManifest {
    rules: Vec<CapabilityRule>,
}

impl CapabilityManifest {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_rules(rules: Vec<CapabilityRule>) -> Self {
        Self { rules }
    }

    pub fn with_rule(mut self, path_pattern: impl Into<String>, operation: OperationKind) -> Self {
        self.rules.push(CapabilityRule::new(path_pattern, operation));
        self
    }

    pub fn rules(&self) -> &[CapabilityRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check every pattern parses.
    pub fn validate(&self) -> Result<(), CapabilityError> {
        for rule in &self.rules {
            Pattern::new(&rule.path_pattern).map_err(|e| CapabilityError::InvalidPattern {
                pattern: rule.path_pattern.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Agent roles with fixed capability sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Fast-memory agent with no persistent state: read-only.
    Stateless,
    /// May persist under its own session directory.
    SessionMemory,
    /// May persist learned artifacts under the shared learning area.
    LearningTier,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Stateless => "stateless",
            AgentRole::SessionMemory => "session_memory",
            AgentRole::LearningTier => "learning_tier",
        }
    }

    /// The fixed manifest for an agent of this role.
    pub fn baseline_manifest(&self, agent_id: &str) -> CapabilityManifest {
        let base = CapabilityManifest::empty().with_rule("**", OperationKind::Read);
        match self {
            AgentRole::Stateless => base,
            AgentRole::SessionMemory => {
                base.with_rule(format!("sessions/{agent_id}/**"), OperationKind::Write)
            }
            AgentRole::LearningTier => base
                .with_rule(format!("sessions/{agent_id}/**"), OperationKind::Write)
                .with_rule("learning/**", OperationKind::Write),
        }
    }
}

/// A manifest with patterns compiled against the governed root.
#[derive(Debug)]
pub(crate) struct CompiledManifest {
    rules: Vec<(Pattern, OperationKind)>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl CompiledManifest {
    pub fn compile(manifest: &CapabilityManifest, root: &Path) -> Result<Self, CapabilityError> {
        let anchor = Pattern::escape(&root.to_string_lossy());
        let rules = manifest
            .rules
            .iter()
            .map(|rule| {
                let text = if Path::new(&rule.path_pattern).is_absolute() {
                    rule.path_pattern.clone()
                } else {
                    format!("{}/{}", anchor.trim_end_matches('/'), rule.path_pattern)
                };
                Pattern::new(&text)
                    .map(|p| (p, rule.operation))
                    .map_err(|e| CapabilityError::InvalidPattern {
                        pattern: rule.path_pattern.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// True when some rule grants `op` on `path`.
    pub fn permits(&self, op: OperationKind, path: &Path) -> bool {
        let text = path.to_string_lossy();
        self.rules
            .iter()
            .any(|(pattern, rule_op)| *rule_op == op && pattern.matches_with(&text, MATCH_OPTIONS))
    }
}
