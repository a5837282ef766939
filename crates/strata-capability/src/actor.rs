use std::fmt;

use serde::{Deserialize, Serialize};

use crate::manifest::AgentRole;

/// The subject of a capability check.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// The installation orchestrator. The only actor that can hold a
    /// destructive-mode token.
    Orchestrator,
    Package(String),
    Session(String),
    Agent { id: String, role: AgentRole },
}

impl Actor {
    pub fn package(id: impl Into<String>) -> Self {
        Actor::Package(id.into())
    }

    pub fn session(id: impl Into<String>) -> Self {
        Actor::Session(id.into())
    }

    pub fn agent(id: impl Into<String>, role: AgentRole) -> Self {
        Actor::Agent {
            id: id.into(),
            role,
        }
    }

    pub fn is_orchestrator(&self) -> bool {
        matches!(self, Actor::Orchestrator)
    }

    /// Package id, when the actor is a package.
    pub fn package_id(&self) -> Option<&str> {
        match self {
            Actor::Package(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Orchestrator => f.write_str("orchestrator"),
            Actor::Package(id) => write!(f, "package:{id}"),
            Actor::Session(id) => write!(f, "session:{id}"),
            Actor::Agent { id, role } => write!(f, "agent:{}:{id}", role.as_str()),
        }
    }
}
