//! Rebuild drill command

use async_trait::async_trait;
use colored::*;
use strata_capability::DestructiveToken;
use strata_install::{Drill, DrillReport, ENV_WIPE_CONFIRM};

use super::install::print_plan;
use super::{misrouted, Operation, OperationContext, OperationHandler, Outcome};
use crate::error::{CliError, CliResult};
use crate::output::{print_failure, print_json, print_success, OutputFormat};

pub struct DrillHandler;

#[async_trait]
impl OperationHandler for DrillHandler {
    fn name(&self) -> &'static str {
        "drill"
    }

    async fn execute(&self, ctx: &OperationContext<'_>, operation: &Operation) -> CliResult<Outcome> {
        if !matches!(operation, Operation::Drill) {
            return Err(misrouted(self.name(), operation));
        }
        let confirmation =
            std::env::var(ENV_WIPE_CONFIRM).map_err(|_| CliError::WipeNotConfirmed)?;
        let token = DestructiveToken::from_confirmation(&confirmation)?;

        let registry = ctx.session.load_registry()?;
        let report = Drill::new(ctx.session, &registry).run(&token).await?;

        match ctx.format {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Text => print_report(&report),
        }

        if !report.mismatches.is_empty() {
            return Err(CliError::DrillMismatch {
                packages: report.mismatches,
            });
        }
        Ok(if report.plan.is_complete() {
            Outcome::Complete
        } else {
            Outcome::Partial
        })
    }
}

fn print_report(report: &DrillReport) {
    println!("Drill {}", report.drill_id.bold());
    println!("  Export: {}", report.export_dir.display());
    println!("  Removed: {}", report.removed);
    println!(
        "  Installed before/after: {}/{}",
        report.pre_installed.len(),
        report.post_installed.len()
    );
    print_plan(&report.plan);
    for package_id in &report.mismatches {
        print_failure(&format!("{}: {package_id}", "MISMATCH".red()));
    }
    if report.passed() {
        print_success("Rebuild reproduced the installed set");
    }
}
