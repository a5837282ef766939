//! Install, uninstall and plan commands

use std::path::PathBuf;

use async_trait::async_trait;
use clap::Args;
use colored::*;
use strata_install::{uninstall, Orchestrator, PlanReport};

use super::{misrouted, Operation, OperationContext, OperationHandler, Outcome};
use crate::error::CliResult;
use crate::output::{print_failure, print_json, print_success, print_warning, OutputFormat};

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Archive to install from
    pub archive: PathBuf,

    /// Package id as declared in the seed registry
    pub package_id: String,

    /// Destination base under the governed root
    pub destination_base: Option<String>,
}

#[derive(Debug, Args)]
pub struct UninstallArgs {
    pub package_id: String,

    /// Destination base the package was installed under
    pub destination_base: Option<String>,
}

pub struct InstallHandler;

#[async_trait]
impl OperationHandler for InstallHandler {
    fn name(&self) -> &'static str {
        "install"
    }

    async fn execute(&self, ctx: &OperationContext<'_>, operation: &Operation) -> CliResult<Outcome> {
        let Operation::Install(args) = operation else {
            return Err(misrouted(self.name(), operation));
        };
        let registry = ctx.session.load_registry()?;
        let receipt = Orchestrator::new(ctx.session, &registry)
            .install(
                &args.package_id,
                Some(&args.archive),
                args.destination_base.as_deref(),
            )
            .await?;

        match ctx.format {
            OutputFormat::Json => print_json(&receipt)?,
            OutputFormat::Text => {
                print_success(&format!(
                    "{} {} installed at {}",
                    receipt.package_id,
                    receipt.version,
                    receipt.destination_path.display()
                ));
                println!("  Receipt: {}", receipt.receipt_id);
                println!("  Files: {}", receipt.file_hashes.len());
                println!("  Ledger: {}", receipt.ledger_ref);
            }
        }
        Ok(Outcome::Complete)
    }
}

pub struct UninstallHandler;

#[async_trait]
impl OperationHandler for UninstallHandler {
    fn name(&self) -> &'static str {
        "uninstall"
    }

    async fn execute(&self, ctx: &OperationContext<'_>, operation: &Operation) -> CliResult<Outcome> {
        let Operation::Uninstall(args) = operation else {
            return Err(misrouted(self.name(), operation));
        };
        uninstall(
            ctx.session,
            &args.package_id,
            args.destination_base.as_deref(),
        )
        .await?;
        match ctx.format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "package_id": args.package_id,
                "uninstalled": true,
            }))?,
            OutputFormat::Text => print_success(&format!("{} uninstalled", args.package_id)),
        }
        Ok(Outcome::Complete)
    }
}

pub struct PlanHandler;

#[async_trait]
impl OperationHandler for PlanHandler {
    fn name(&self) -> &'static str {
        "plan"
    }

    async fn execute(&self, ctx: &OperationContext<'_>, operation: &Operation) -> CliResult<Outcome> {
        if !matches!(operation, Operation::Plan) {
            return Err(misrouted(self.name(), operation));
        }
        let registry = ctx.session.load_registry()?;
        let report = Orchestrator::new(ctx.session, &registry)
            .install_plan()
            .await?;

        match ctx.format {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Text => print_plan(&report),
        }
        Ok(if report.is_complete() {
            Outcome::Complete
        } else {
            Outcome::Partial
        })
    }
}

pub(crate) fn print_plan(report: &PlanReport) {
    println!(
        "{:<6} {:>9} {:>9} {:>7} {:>8}",
        "TIER", "ATTEMPTED", "INSTALLED", "FAILED", "PRESENT"
    );
    for score in &report.tiers {
        println!(
            "{:<6} {:>9} {:>9} {:>7} {:>8}",
            score.tier.to_string(),
            score.attempted,
            score.installed,
            score.failed,
            score.already_installed
        );
    }
    for (package_id, code) in &report.failed {
        print_failure(&format!("{package_id}: {}", code.red()));
    }
    if report.cancelled {
        print_warning("Plan cancelled before completion");
    }
    if report.is_complete() {
        print_success(&format!("{} package(s) installed", report.installed.len()));
    } else {
        print_warning(&format!(
            "{} installed, {} failed",
            report.installed.len(),
            report.failed.len()
        ));
    }
}
