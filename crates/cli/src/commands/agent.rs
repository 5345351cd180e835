// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pass|ask-human|converged` (§6): the agent-facing surface, invoked from
//! inside a bubble's worktree so the bubble is detected from the current
//! directory rather than passed explicitly.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use pf_adapters::DesktopNotifyAdapter;
use pf_core::clock::SystemClock;
use pf_core::envelope::{Finding, PassIntent, Severity};
use pf_core::idgen::UuidIdSource;
use pf_core::state::ActiveRole;
use pf_lifecycle::{self as lifecycle, GlobalPaths, PassInput};
use serde::Serialize;

use crate::output::OutputFormat;
use crate::resolve;

#[derive(Args)]
pub struct AgentArgs {
    #[command(subcommand)]
    pub command: AgentCommand,
}

#[derive(Subcommand)]
pub enum AgentCommand {
    /// Hand the active round off to the other role
    Pass {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        repo: Option<PathBuf>,
        /// Role making the call: implementer or reviewer
        #[arg(long)]
        as_role: String,
        #[arg(long)]
        summary: String,
        /// `severity:title[:detail]`, e.g. `p1:missing null check:src/lib.rs:42`
        #[arg(long = "finding", value_parser = parse_finding)]
        findings: Vec<Finding>,
        #[arg(long)]
        intent: Option<String>,
        #[arg(long = "ref")]
        refs: Vec<String>,
    },
    /// Ask the human a question, blocking the round on their reply
    AskHuman {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        repo: Option<PathBuf>,
        #[arg(long)]
        question: String,
    },
    /// Declare the bubble converged and ready for human approval
    Converged {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        repo: Option<PathBuf>,
        #[arg(long)]
        summary: String,
    },
}

pub async fn handle(command: AgentCommand, format: OutputFormat) -> Result<()> {
    let home = crate::home_dir()?;
    let global = GlobalPaths::from_env(&home);
    let clock = SystemClock;
    let ids = UuidIdSource;

    match command {
        AgentCommand::Pass {
            id,
            repo,
            as_role,
            summary,
            findings,
            intent,
            refs,
        } => {
            let t = resolve::resolve(repo.as_deref(), id.as_deref())?;
            let caller = parse_active_role(&as_role)?;
            let input = PassInput {
                summary,
                findings,
                pass_intent: intent.as_deref().map(parse_pass_intent).transpose()?,
                refs,
            };
            let outcome = lifecycle::pass(&global, &clock, &ids, &t.repo_path, &t.bubble_id, caller, input).await?;
            print_outcome(format, outcome)
        }

        AgentCommand::AskHuman { id, repo, question } => {
            let t = resolve::resolve(repo.as_deref(), id.as_deref())?;
            let notify = DesktopNotifyAdapter::new();
            let outcome = lifecycle::ask_human(&global, &clock, &ids, &notify, &t.repo_path, &t.bubble_id, &question).await?;
            print_outcome(format, outcome)
        }

        AgentCommand::Converged { id, repo, summary } => {
            let t = resolve::resolve(repo.as_deref(), id.as_deref())?;
            let notify = DesktopNotifyAdapter::new();
            let outcome = lifecycle::converged(&global, &clock, &ids, &notify, &t.repo_path, &t.bubble_id, &summary).await?;
            print_outcome(format, outcome)
        }
    }
}

fn print_outcome(format: OutputFormat, outcome: pf_lifecycle::OperationOutcome) -> Result<()> {
    #[derive(Serialize)]
    struct Summary {
        bubble_id: String,
        state: String,
        round: u32,
    }
    let summary = Summary {
        bubble_id: outcome.bubble_id.to_string(),
        state: format!("{:?}", outcome.new_state.state),
        round: outcome.new_state.round,
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => println!("{} -> {} (round {})", summary.bubble_id, summary.state, summary.round),
    }
    Ok(())
}

fn parse_active_role(s: &str) -> Result<ActiveRole> {
    match s {
        "implementer" => Ok(ActiveRole::Implementer),
        "reviewer" => Ok(ActiveRole::Reviewer),
        other => anyhow::bail!("invalid --as-role {other} (expected implementer|reviewer)"),
    }
}

fn parse_pass_intent(s: &str) -> Result<PassIntent> {
    match s {
        "task" => Ok(PassIntent::Task),
        "review" => Ok(PassIntent::Review),
        "fix-request" => Ok(PassIntent::FixRequest),
        other => anyhow::bail!("invalid --intent {other} (expected task|review|fix-request)"),
    }
}

/// Parses `--finding severity:title[:detail]`, e.g. `p1:missing null check:src/lib.rs:42`.
fn parse_finding(s: &str) -> Result<Finding, String> {
    let mut parts = s.splitn(3, ':');
    let severity = parts.next().ok_or("missing severity")?;
    let title = parts.next().ok_or("missing title")?;
    let detail = parts.next();
    let severity = match severity {
        "p0" => Severity::P0,
        "p1" => Severity::P1,
        "p2" => Severity::P2,
        "p3" => Severity::P3,
        other => return Err(format!("invalid severity {other} (expected p0|p1|p2|p3)")),
    };
    Ok(Finding {
        severity,
        title: title.to_string(),
        detail: detail.map(str::to_string),
        code: None,
        refs: Vec::new(),
    })
}
