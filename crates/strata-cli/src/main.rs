//! Strata CLI - governed installs, ledger verification and rebuild drills
//!
//! - `install` / `uninstall` a single registry package
//! - `plan` installs the whole seed registry tier by tier
//! - `verify` and `lineage` inspect the ledger
//! - `drill` proves the tree can be rebuilt from its own exports
//!
//! Fatal conditions print `error[CODE]: message` and exit non-zero;
//! partial outcomes print a summary and exit 0.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use strata_install::{Session, StrataConfig};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod error;
mod output;

use commands::{Operation, OperationContext, OperationRegistry, Outcome};
use error::CliResult;
use output::{print_fatal, OutputFormat};

/// Strata CLI application
#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Strata - governed, ledger-backed package installation", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    /// Governed root (overrides the configuration file)
    #[arg(short, long, env = "STRATA_ROOT")]
    root: Option<PathBuf>,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    output: OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Operation,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .without_time(),
        )
        .init();

    match run(cli).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            print_fatal(e.code(), &e.to_string());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> CliResult<Outcome> {
    let registry = OperationRegistry::with_defaults();

    let mut config = StrataConfig::load(cli.config.as_deref())?;
    if let Some(root) = cli.root {
        config.root = root;
    }
    let policy = cli.command.policy(config.policy.from_env());
    let session = Session::open(config)?.with_policy(policy);

    let cancel = session.cancellation().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling");
            cancel.cancel();
        }
    });

    let ctx = OperationContext {
        session: &session,
        format: cli.output,
    };
    let outcome = registry.dispatch(&ctx, &cli.command).await;
    let closed = session.close();
    let outcome = outcome?;
    closed?;
    Ok(outcome)
}
