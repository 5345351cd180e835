// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! pairflow - bubble lifecycle orchestrator CLI

mod color;
mod commands;
mod exit_error;
mod output;
mod repo_registry;
mod resolve;
mod table;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use output::OutputFormat;

use commands::{agent, bubble, metrics, repo};

#[derive(Parser)]
#[command(
    name = "pairflow",
    version,
    about = "Orchestrates implementer/reviewer bubbles against a shared transcript"
)]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, default_value_t, global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bubble lifecycle: create, start, stop, delete, status, list, ...
    Bubble(bubble::BubbleArgs),
    /// Agent-facing surface: pass, ask-human, converged
    Agent(agent::AgentArgs),
    /// Known-repository bookkeeping
    Repo(repo::RepoArgs),
    /// Aggregate metrics events
    Metrics(metrics::MetricsArgs),
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        let code = e.downcast_ref::<exit_error::ExitError>().map_or(1, |c| c.code);
        let msg = format_error(&e);
        if !msg.is_empty() {
            eprintln!("Error: {msg}");
        }
        std::process::exit(code);
    }
}

fn init_tracing() {
    let filter = std::env::var("PAIRFLOW_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Bubble(args) => bubble::handle(args.command, cli.output).await,
        Commands::Agent(args) => agent::handle(args.command, cli.output).await,
        Commands::Repo(args) => repo::handle(args.command, cli.output),
        Commands::Metrics(args) => metrics::handle(args.command),
    }
}

/// Format an anyhow error, deduplicating the chain.
///
/// If the top-level Display already contains the source error text, we skip
/// the "Caused by" chain to avoid noisy duplicate output (common when
/// thiserror variants use `#[error("... {0}")]` with `#[from]`).
/// Otherwise we render the full chain so context isn't lost.
fn format_error(err: &anyhow::Error) -> String {
    let top = err.to_string();

    let chain_redundant = err.chain().skip(1).all(|cause| top.contains(&cause.to_string()));

    if chain_redundant {
        return top;
    }

    let mut buf = top;
    for (i, cause) in err.chain().skip(1).enumerate() {
        buf.push_str(&format!("\n\nCaused by:\n    {i}: {cause}"));
    }
    buf
}

/// `$PAIRFLOW_HOME`, falling back to the platform home directory — the root
/// under which the archive, metrics, and known-repos registry live.
pub fn home_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("PAIRFLOW_HOME") {
        return Ok(PathBuf::from(dir));
    }
    std::env::var("HOME")
        .map(PathBuf::from)
        .context("cannot determine home directory: set HOME or PAIRFLOW_HOME")
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
