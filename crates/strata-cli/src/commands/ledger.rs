//! Ledger verification and lineage commands

use std::collections::BTreeMap;

use async_trait::async_trait;
use clap::Args;
use colored::*;
use strata_ledger::{ChainReport, LedgerEntry};
use tracing::warn;

use super::{misrouted, Operation, OperationContext, OperationHandler, Outcome};
use crate::error::{CliError, CliResult};
use crate::output::{print_failure, print_json, print_success, print_warning, OutputFormat};

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Verify one stream instead of all of them
    #[arg(long)]
    pub stream: Option<String>,
}

#[derive(Debug, Args)]
pub struct LineageArgs {
    /// Package, artifact or receipt id
    pub artifact_id: String,
}

pub struct VerifyHandler;

#[async_trait]
impl OperationHandler for VerifyHandler {
    fn name(&self) -> &'static str {
        "verify"
    }

    async fn execute(&self, ctx: &OperationContext<'_>, operation: &Operation) -> CliResult<Outcome> {
        let Operation::Verify(args) = operation else {
            return Err(misrouted(self.name(), operation));
        };
        let ledger = ctx.session.ledger();
        let reports: BTreeMap<String, ChainReport> = match &args.stream {
            Some(stream) => {
                let report = ledger.verify_chain(stream)?;
                BTreeMap::from([(stream.clone(), report)])
            }
            None => ledger.verify_all()?,
        };

        match ctx.format {
            OutputFormat::Json => print_json(&reports)?,
            OutputFormat::Text => {
                for report in reports.values() {
                    print_chain(report);
                }
            }
        }

        let broken: Vec<String> = reports
            .iter()
            .filter(|(_, r)| !r.valid)
            .map(|(s, _)| s.clone())
            .collect();
        if broken.is_empty() {
            Ok(Outcome::Complete)
        } else {
            Err(CliError::ChainVerification { streams: broken })
        }
    }
}

fn print_chain(report: &ChainReport) {
    if report.valid {
        print_success(&format!(
            "{}: {} entries verified",
            report.stream, report.entries_checked
        ));
        return;
    }
    print_failure(&format!(
        "{}: {} issue(s) in {} entries",
        report.stream,
        report.issues.len(),
        report.entries_checked
    ));
    for issue in &report.issues {
        println!(
            "  #{} {} {}",
            issue.sequence_number,
            format!("{:?}", issue.kind).yellow(),
            issue.detail.dimmed()
        );
    }
}

pub struct LineageHandler;

#[async_trait]
impl OperationHandler for LineageHandler {
    fn name(&self) -> &'static str {
        "lineage"
    }

    async fn execute(&self, ctx: &OperationContext<'_>, operation: &Operation) -> CliResult<Outcome> {
        let Operation::Lineage(args) = operation else {
            return Err(misrouted(self.name(), operation));
        };
        let ledger = ctx.session.ledger();
        let mut rows: Vec<LedgerEntry> = Vec::new();
        for position in ledger.index_lookup(&args.artifact_id) {
            let entry = ledger
                .read_range(&position.stream, position.sequence_number, position.sequence_number)?
                .next()
                .transpose()?;
            match entry {
                Some(entry) => rows.push(entry),
                None => warn!(position = %position, "Indexed entry not found in its stream"),
            }
        }

        match ctx.format {
            OutputFormat::Json => print_json(&rows)?,
            OutputFormat::Text if rows.is_empty() => {
                print_warning(&format!("No ledger entries reference {}", args.artifact_id))
            }
            OutputFormat::Text => {
                println!("Lineage of {}", args.artifact_id.bold());
                for entry in &rows {
                    println!(
                        "  {:<20} {} {}",
                        entry.position().to_string(),
                        entry.timestamp.to_rfc3339(),
                        entry.event_type.to_string().cyan()
                    );
                }
            }
        }
        Ok(Outcome::Complete)
    }
}
