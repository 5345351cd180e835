// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `bubble create|start|stop|delete|status|list|reconcile|reply|approve|
//! request-rework|commit|merge|inbox|watchdog|open|resume` (§6).

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Subcommand};
use pf_adapters::{DesktopNotifyAdapter, SubprocessGitAdapter, TmuxAdapter};
use pf_core::clock::{Clock, SystemClock};
use pf_core::config::{LocalOverlayPolicy, NotificationsPolicy, QualityMode, ReviewArtifactType};
use pf_core::idgen::UuidIdSource;
use pf_core::ShortId;
use pf_lifecycle::{
    self as lifecycle, BubblePaths, CreateInput, DeleteOutcome, GlobalPaths, OperationOutcome,
};
use pf_storage::transcript::ReadOptions;
use pf_storage::{registry, state_store, LockOptions};
use serde::Serialize;

use crate::exit_error::ExitError;
use crate::output::OutputFormat;
use crate::resolve;

#[derive(Args)]
pub struct BubbleArgs {
    #[command(subcommand)]
    pub command: BubbleCommand,
}

#[derive(Subcommand)]
pub enum BubbleCommand {
    /// Create a new bubble
    Create {
        id: String,
        #[arg(long)]
        repo: PathBuf,
        #[arg(long, default_value = "main")]
        base_branch: String,
        #[arg(long)]
        bubble_branch: Option<String>,
        #[arg(long, conflicts_with = "task_file")]
        task: Option<String>,
        #[arg(long, conflicts_with = "task")]
        task_file: Option<PathBuf>,
        #[arg(long, default_value = "implementer")]
        implementer: String,
        #[arg(long, default_value = "reviewer")]
        reviewer: String,
        #[arg(long = "test-cmd", default_value = "")]
        test_cmd: String,
        #[arg(long = "typecheck-cmd", default_value = "")]
        typecheck_cmd: String,
        #[arg(long, default_value_t = 30)]
        watchdog_timeout_minutes: u32,
        #[arg(long, default_value_t = 20)]
        max_rounds: u32,
        /// Skip the human approval step before commit.
        #[arg(long)]
        no_approval: bool,
        #[arg(long, default_value = "standard")]
        quality_mode: String,
        #[arg(long)]
        review_artifact_type: Option<String>,
        #[arg(long, default_value = "deny")]
        local_overlay: String,
        #[arg(long, default_value = "silent")]
        notifications: String,
    },
    /// Spawn (or resume) the bubble's multiplexer session and move it to RUNNING
    Start(BubbleRef),
    /// Cancel a running bubble and release its runtime-session claim
    Stop(BubbleRef),
    /// Archive and remove a bubble's directory
    Delete {
        #[command(flatten)]
        target: BubbleRef,
        #[arg(long)]
        force: bool,
    },
    /// Show a single bubble's config and current state
    Status(BubbleRef),
    /// List every bubble under a repo (or every known repo)
    List {
        #[arg(long)]
        repo: Option<PathBuf>,
    },
    /// Remove dead runtime-session entries for a repo's registry
    Reconcile {
        #[arg(long)]
        repo: PathBuf,
    },
    /// Human reply to a pending HUMAN_QUESTION
    Reply {
        #[command(flatten)]
        target: BubbleRef,
        #[arg(long)]
        message: String,
    },
    /// Human approval of a bubble in READY_FOR_APPROVAL
    Approve(BubbleRef),
    /// Human-requested rework, immediate or queued depending on state
    RequestRework {
        #[command(flatten)]
        target: BubbleRef,
        #[arg(long)]
        message: String,
    },
    /// Commit the approved change using the done-package artifact
    Commit {
        #[command(flatten)]
        target: BubbleRef,
        #[arg(long)]
        message: String,
    },
    /// Merge the bubble branch into its base branch
    Merge(BubbleRef),
    /// List the inbox-mirrored envelopes (questions, replies, approvals)
    Inbox(BubbleRef),
    /// Run a single watchdog tick for one bubble
    Watchdog(BubbleRef),
    /// Print how to attach to the bubble's multiplexer session
    Open(BubbleRef),
    /// Resume a stopped bubble (alias for `start`)
    Resume(BubbleRef),
}

#[derive(Args)]
pub struct BubbleRef {
    #[arg(long)]
    pub id: Option<String>,
    #[arg(long)]
    pub repo: Option<PathBuf>,
}

fn global_paths() -> Result<GlobalPaths> {
    let home = crate::home_dir()?;
    Ok(GlobalPaths::from_env(&home))
}

pub async fn handle(command: BubbleCommand, format: OutputFormat) -> Result<()> {
    let global = global_paths()?;
    let clock = SystemClock;
    let ids = UuidIdSource;

    match command {
        BubbleCommand::Create {
            id,
            repo,
            base_branch,
            bubble_branch,
            task,
            task_file,
            implementer,
            reviewer,
            test_cmd,
            typecheck_cmd,
            watchdog_timeout_minutes,
            max_rounds,
            no_approval,
            quality_mode,
            review_artifact_type,
            local_overlay,
            notifications,
        } => {
            let task_text = match (task, task_file) {
                (Some(t), None) => t,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read task file {}", path.display()))?,
                _ => bail!("exactly one of --task or --task-file is required"),
            };
            let repo_path = std::fs::canonicalize(&repo)
                .with_context(|| format!("repo path {} not found", repo.display()))?;
            let input = CreateInput {
                repo_path,
                bubble_id: id.clone(),
                base_branch,
                bubble_branch: bubble_branch.unwrap_or_else(|| format!("bubble/{id}")),
                task_text,
                implementer,
                reviewer,
                test_command: test_cmd,
                typecheck_command: typecheck_cmd,
                watchdog_timeout_minutes,
                max_rounds,
                commit_requires_approval: !no_approval,
                quality_mode: parse_quality_mode(&quality_mode)?,
                review_artifact_type: review_artifact_type.as_deref().map(parse_review_artifact_type).transpose()?,
                local_overlay_policy: parse_local_overlay(&local_overlay)?,
                notifications_policy: parse_notifications(&notifications)?,
            };
            let outcome = lifecycle::create(&global, &clock, &ids, input)?;
            print_outcome_summary(format, "created", &outcome.state.bubble_id.to_string(), outcome.state.round, &format!("{:?}", outcome.state.state))
        }

        BubbleCommand::Start(target) => {
            let t = resolve::resolve(target.repo.as_deref(), target.id.as_deref())?;
            let session = TmuxAdapter::new();
            let git = SubprocessGitAdapter::new();
            let outcome = lifecycle::start(&global, &clock, &ids, &session, &git, &t.repo_path, &t.bubble_id).await?;
            print_operation_outcome(format, &outcome)
        }

        BubbleCommand::Resume(target) => {
            let t = resolve::resolve(target.repo.as_deref(), target.id.as_deref())?;
            let session = TmuxAdapter::new();
            let git = SubprocessGitAdapter::new();
            let outcome = lifecycle::start(&global, &clock, &ids, &session, &git, &t.repo_path, &t.bubble_id).await?;
            print_operation_outcome(format, &outcome)
        }

        BubbleCommand::Stop(target) => {
            let t = resolve::resolve(target.repo.as_deref(), target.id.as_deref())?;
            let session = TmuxAdapter::new();
            let outcome = lifecycle::stop(&global, &clock, &ids, &session, &t.repo_path, &t.bubble_id).await?;
            if let Some(err) = &outcome.state_write_error {
                eprintln!("warning: state write failed after cancellation: {err}");
            }
            println!("{} -> {:?}", t.bubble_id, outcome.new_state.state);
            Ok(())
        }

        BubbleCommand::Delete { target, force } => {
            let t = resolve::resolve(target.repo.as_deref(), target.id.as_deref())?;
            let session = TmuxAdapter::new();
            let git = SubprocessGitAdapter::new();
            let outcome = lifecycle::delete(&global, &clock, &ids, &session, &git, &t.repo_path, &t.bubble_id, force).await?;
            match outcome {
                DeleteOutcome::Deleted => {
                    println!("{} deleted", t.bubble_id);
                    Ok(())
                }
                DeleteOutcome::ConfirmationRequired { manifest } => {
                    match format {
                        OutputFormat::Json => println!("{manifest}"),
                        OutputFormat::Text => {
                            println!("bubble {} has live artifacts; re-run with --force to confirm:", t.bubble_id);
                            println!("{manifest}");
                        }
                    }
                    Err(ExitError::new(2).into())
                }
            }
        }

        BubbleCommand::Status(target) => {
            let t = resolve::resolve(target.repo.as_deref(), target.id.as_deref())?;
            print_status(format, &t.repo_path, &t.bubble_id)
        }

        BubbleCommand::List { repo } => {
            let repos = repos_to_scan(repo)?;
            let mut rows = Vec::new();
            for repo_path in repos {
                for bubble_id in list_bubble_ids(&repo_path)? {
                    let paths = BubblePaths::new(&repo_path, &bubble_id);
                    if let Some(read) = state_store::read(&paths.state())? {
                        rows.push(BubbleRow {
                            bubble_id,
                            repo_path: repo_path.to_string_lossy().to_string(),
                            state: format!("{:?}", read.snapshot.state),
                            round: read.snapshot.round,
                        });
                    }
                }
            }
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
                OutputFormat::Text => {
                    for row in &rows {
                        println!("{:<24} {:<10} round {:<4} {}", row.bubble_id, row.state, row.round, row.repo_path);
                    }
                }
            }
            Ok(())
        }

        BubbleCommand::Reconcile { repo } => {
            let repo_path = std::fs::canonicalize(&repo)?;
            let paths = BubblePaths::new(&repo_path, "_");
            let now_ms = clock.now_ms();
            let removed = registry::reconcile(&paths.registry(), &paths.registry_lock(), LockOptions::default(), now_ms, |session| {
                std::process::Command::new("tmux")
                    .args(["has-session", "-t", &session.multiplexer_session_name])
                    .status()
                    .map(|s| s.success())
                    .unwrap_or(false)
            })?;
            for id in &removed {
                println!("removed dead session for {id}");
            }
            Ok(())
        }

        BubbleCommand::Reply { target, message } => {
            let t = resolve::resolve(target.repo.as_deref(), target.id.as_deref())?;
            let session = TmuxAdapter::new();
            let outcome = lifecycle::reply(&global, &clock, &ids, &session, &t.repo_path, &t.bubble_id, &message).await?;
            print_operation_outcome(format, &outcome)
        }

        BubbleCommand::Approve(target) => {
            let t = resolve::resolve(target.repo.as_deref(), target.id.as_deref())?;
            let outcome = lifecycle::approve(&global, &clock, &ids, &t.repo_path, &t.bubble_id).await?;
            print_operation_outcome(format, &outcome)
        }

        BubbleCommand::RequestRework { target, message } => {
            let t = resolve::resolve(target.repo.as_deref(), target.id.as_deref())?;
            let outcome = lifecycle::request_rework(&global, &clock, &ids, &t.repo_path, &t.bubble_id, &message).await?;
            print_operation_outcome(format, &outcome)
        }

        BubbleCommand::Commit { target, message } => {
            let t = resolve::resolve(target.repo.as_deref(), target.id.as_deref())?;
            let git = SubprocessGitAdapter::new();
            let outcome = lifecycle::commit(&global, &clock, &ids, &git, &t.repo_path, &t.bubble_id, &message).await?;
            print_operation_outcome(format, &outcome)
        }

        BubbleCommand::Merge(target) => {
            let t = resolve::resolve(target.repo.as_deref(), target.id.as_deref())?;
            let paths = BubblePaths::new(&t.repo_path, &t.bubble_id);
            let read = state_store::read(&paths.state())?.ok_or_else(|| anyhow!("no state for bubble {}", t.bubble_id))?;
            let config = pf_config::parse_bubble_toml(&std::fs::read_to_string(paths.config())?)?;
            let status = std::process::Command::new("git")
                .arg("-C")
                .arg(&t.repo_path)
                .args(["merge", "--no-edit", &config.bubble_branch])
                .status()
                .context("failed to run git merge")?;
            if !status.success() {
                bail!("git merge of {} into the current branch failed", config.bubble_branch);
            }
            println!("merged {} (bubble was in state {:?})", config.bubble_branch, read.snapshot.state);
            Ok(())
        }

        BubbleCommand::Inbox(target) => {
            let t = resolve::resolve(target.repo.as_deref(), target.id.as_deref())?;
            let paths = BubblePaths::new(&t.repo_path, &t.bubble_id);
            let envelopes = pf_storage::transcript::read(&paths.transcript(), ReadOptions::default())?;
            let inbox: Vec<_> = envelopes
                .into_iter()
                .filter(|e| {
                    matches!(
                        e.envelope_type,
                        pf_core::EnvelopeType::HumanQuestion
                            | pf_core::EnvelopeType::HumanReply
                            | pf_core::EnvelopeType::ApprovalRequest
                            | pf_core::EnvelopeType::ApprovalDecision
                    )
                })
                .collect();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&inbox)?),
                OutputFormat::Text => {
                    for envelope in &inbox {
                        println!("[{}] {:?} {:?}->{:?}", envelope.ts, envelope.envelope_type, envelope.sender, envelope.recipient);
                    }
                }
            }
            Ok(())
        }

        BubbleCommand::Watchdog(target) => {
            let t = resolve::resolve(target.repo.as_deref(), target.id.as_deref())?;
            let session = TmuxAdapter::new();
            let action = lifecycle::run_watchdog_once(&global, &clock, &ids, &session, &t.repo_path, &t.bubble_id).await?;
            println!("{action:?}");
            Ok(())
        }

        BubbleCommand::Open(target) => {
            let t = resolve::resolve(target.repo.as_deref(), target.id.as_deref())?;
            let paths = BubblePaths::new(&t.repo_path, &t.bubble_id);
            let session = registry::read(&paths.registry(), &pf_core::BubbleId::new(t.bubble_id.clone()))?;
            match session {
                Some(s) => println!("tmux attach -t {}", s.multiplexer_session_name),
                None => bail!("no runtime session claimed for bubble {}", t.bubble_id),
            }
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct BubbleRow {
    bubble_id: String,
    repo_path: String,
    state: String,
    round: u32,
}

fn repos_to_scan(explicit: Option<PathBuf>) -> Result<Vec<PathBuf>> {
    if let Some(repo) = explicit {
        return Ok(vec![std::fs::canonicalize(&repo).with_context(|| format!("repo path {} not found", repo.display()))?]);
    }
    let home = crate::home_dir()?;
    crate::repo_registry::list(&home)
}

fn list_bubble_ids(repo_path: &Path) -> Result<Vec<String>> {
    let bubbles_dir = repo_path.join(".pairflow").join("bubbles");
    if !bubbles_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(&bubbles_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            ids.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

fn print_status(format: OutputFormat, repo_path: &Path, bubble_id: &str) -> Result<()> {
    let paths = BubblePaths::new(repo_path, bubble_id);
    let config_text = std::fs::read_to_string(paths.config())
        .with_context(|| format!("no bubble named {bubble_id} under {}", repo_path.display()))?;
    let config = pf_config::parse_bubble_toml(&config_text)?;
    let read = state_store::read(&paths.state())?.ok_or_else(|| anyhow!("no state for bubble {bubble_id}"))?;

    #[derive(Serialize)]
    struct Status<'a> {
        bubble_id: &'a str,
        state: String,
        round: u32,
        active_role: Option<String>,
        implementer: &'a str,
        reviewer: &'a str,
        base_branch: &'a str,
        bubble_branch: &'a str,
    }
    let status = Status {
        bubble_id,
        state: format!("{:?}", read.snapshot.state),
        round: read.snapshot.round,
        active_role: read.snapshot.active_role.map(|r| format!("{r:?}")),
        implementer: &config.implementer,
        reviewer: &config.reviewer,
        base_branch: &config.base_branch,
        bubble_branch: &config.bubble_branch,
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Text => {
            println!("{} — {} (round {})", status.bubble_id, status.state, status.round);
            if let Some(role) = &status.active_role {
                println!("  active: {role}");
            }
            println!("  {} -> {} ({} reviewing {})", status.bubble_branch, status.base_branch, status.reviewer, status.implementer);
        }
    }
    Ok(())
}

fn print_operation_outcome(format: OutputFormat, outcome: &OperationOutcome) -> Result<()> {
    print_outcome_summary(format, "updated", outcome.bubble_id.as_str(), outcome.new_state.round, &format!("{:?}", outcome.new_state.state))
}

fn print_outcome_summary(format: OutputFormat, verb: &str, bubble_id: &str, round: u32, state: &str) -> Result<()> {
    #[derive(Serialize)]
    struct Summary<'a> {
        bubble_id: &'a str,
        state: &'a str,
        round: u32,
    }
    let summary = Summary { bubble_id, state, round };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => println!("{bubble_id} {verb} -> {state} (round {round})"),
    }
    Ok(())
}

fn parse_quality_mode(s: &str) -> Result<QualityMode> {
    match s {
        "standard" => Ok(QualityMode::Standard),
        "strict" => Ok(QualityMode::Strict),
        other => bail!("invalid --quality-mode {other} (expected standard|strict)"),
    }
}

fn parse_review_artifact_type(s: &str) -> Result<ReviewArtifactType> {
    match s {
        "auto" => Ok(ReviewArtifactType::Auto),
        "code" => Ok(ReviewArtifactType::Code),
        "document" => Ok(ReviewArtifactType::Document),
        other => bail!("invalid --review-artifact-type {other} (expected auto|code|document)"),
    }
}

fn parse_local_overlay(s: &str) -> Result<LocalOverlayPolicy> {
    match s {
        "allow" => Ok(LocalOverlayPolicy::Allow),
        "deny" => Ok(LocalOverlayPolicy::Deny),
        other => bail!("invalid --local-overlay {other} (expected allow|deny)"),
    }
}

fn parse_notifications(s: &str) -> Result<NotificationsPolicy> {
    match s {
        "all" => Ok(NotificationsPolicy::All),
        "desktop-only" => Ok(NotificationsPolicy::DesktopOnly),
        "multiplexer-only" => Ok(NotificationsPolicy::MultiplexerOnly),
        "silent" => Ok(NotificationsPolicy::Silent),
        other => bail!("invalid --notifications {other} (expected all|desktop-only|multiplexer-only|silent)"),
    }
}
