//! Output formatting utilities

use anyhow::Context;
use colored::*;
use serde::Serialize;

use crate::error::CliResult;

/// Output format for command results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
}

pub fn print_json<T: Serialize>(data: &T) -> CliResult<()> {
    let rendered = serde_json::to_string_pretty(data).context("rendering JSON output")?;
    println!("{rendered}");
    Ok(())
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message);
}

pub fn print_failure(message: &str) {
    println!("{} {}", "✗".red(), message);
}

/// `error[CODE]: message` on stderr.
pub fn print_fatal(code: &str, message: &str) {
    eprintln!("{}: {}", format!("error[{code}]").red().bold(), message);
}
