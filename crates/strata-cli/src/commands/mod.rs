//! Operation handlers and the registry that dispatches to them

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Subcommand;
use strata_install::{DrillMode, InstallPolicy, Session};

use crate::error::{CliError, CliResult};
use crate::output::OutputFormat;

pub mod drill;
pub mod install;
pub mod ledger;

/// Every operation the CLI exposes
#[derive(Debug, Subcommand)]
pub enum Operation {
    /// Install one registry package from an archive
    Install(install::InstallArgs),

    /// Remove an installed package
    Uninstall(install::UninstallArgs),

    /// Install the whole seed registry, tier by tier
    Plan,

    /// Re-verify ledger hash chains
    Verify(ledger::VerifyArgs),

    /// List every ledger entry that references an artifact
    Lineage(ledger::LineageArgs),

    /// Export, wipe, reinstall and compare (requires WIPE_CONFIRM)
    Drill,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Install(_) => "install",
            Operation::Uninstall(_) => "uninstall",
            Operation::Plan => "plan",
            Operation::Verify(_) => "verify",
            Operation::Lineage(_) => "lineage",
            Operation::Drill => "drill",
        }
    }

    /// The install policy this operation runs under. Drills pick their
    /// strictness from `STRATA_DRILL_MODE` and always enable install mode.
    pub fn policy(&self, base: InstallPolicy) -> InstallPolicy {
        match self {
            Operation::Drill => DrillMode::from_env().policy(base),
            _ => base,
        }
    }
}

/// How a successful operation ended. Both exit with status 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Complete,
    /// Some packages failed; details were printed.
    Partial,
}

pub struct OperationContext<'a> {
    pub session: &'a Session,
    pub format: OutputFormat,
}

#[async_trait]
pub trait OperationHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(
        &self,
        ctx: &OperationContext<'_>,
        operation: &Operation,
    ) -> CliResult<Outcome>;
}

/// Name-to-handler table, built once at startup.
pub struct OperationRegistry {
    handlers: HashMap<&'static str, Arc<dyn OperationHandler>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(install::InstallHandler));
        registry.register(Arc::new(install::UninstallHandler));
        registry.register(Arc::new(install::PlanHandler));
        registry.register(Arc::new(ledger::VerifyHandler));
        registry.register(Arc::new(ledger::LineageHandler));
        registry.register(Arc::new(drill::DrillHandler));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn OperationHandler>) {
        self.handlers.insert(handler.name(), handler);
    }

    pub async fn dispatch(
        &self,
        ctx: &OperationContext<'_>,
        operation: &Operation,
    ) -> CliResult<Outcome> {
        let handler = self
            .handlers
            .get(operation.name())
            .ok_or(CliError::UnknownOperation(operation.name()))?;
        tracing::debug!(operation = operation.name(), "Dispatching");
        handler.execute(ctx, operation).await
    }
}

/// A handler was given an operation it does not serve.
pub(crate) fn misrouted(handler: &'static str, operation: &Operation) -> CliError {
    CliError::Internal(anyhow::anyhow!(
        "handler `{handler}` cannot run `{}`",
        operation.name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_operation_has_a_handler() {
        let registry = OperationRegistry::with_defaults();
        let mut names: Vec<_> = registry.handlers.keys().copied().collect();
        names.sort_unstable();
        assert_eq!(
            names,
            vec!["drill", "install", "lineage", "plan", "uninstall", "verify"]
        );
    }

    #[test]
    fn only_drills_override_the_policy() {
        let base = InstallPolicy::default();
        assert_eq!(Operation::Plan.policy(base), base);
        assert!(Operation::Drill.policy(base).install_mode);
    }
}
