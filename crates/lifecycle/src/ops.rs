// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The public lifecycle operations (§4.4): `create`, `start`, `stop`,
//! `delete`, `commit`, the agent commands (`pass`, `ask_human`,
//! `converged`), and the human commands (`reply`, `approve`,
//! `request_rework`).
//!
//! Every operation follows the nine-step recipe in §4.4: resolve the
//! bubble, backfill its instance id, read state under no lock, validate
//! preconditions, append the envelope, compute and persist the next state,
//! then best-effort notify. Steps 6 and 7 are deliberately two separate
//! locked operations (`transcript::append` then `state_store::write`), not
//! one critical section — if the append lands and the state write fails,
//! the transcript is canonical and the caller gets back a
//! [`LifecycleError::Recovery`] rather than a rolled-back transcript.

use std::path::Path;

use chrono::{SecondsFormat, TimeZone, Utc};
use pf_adapters::{GitAdapter, NotifyAdapter, SessionAdapter};
use pf_core::clock::Clock;
use pf_core::config::{BubbleConfig, NotificationsPolicy};
use pf_core::envelope::{Decision, Envelope, EnvelopeType, Finding, PassIntent, Payload, Recipient, Severity};
use pf_core::id::{BubbleId, BubbleInstanceId, IntentId, ShortId};
use pf_core::idgen::IdSource;
use pf_core::state::{ActiveRole, BubbleState, ReworkIntent, ReworkIntentStatus, RoundRoleEntry, StateSnapshot};
use pf_storage::archive::{self, ArchiveEntry, ArchiveStatus};
use pf_storage::lock::LockOptions;
use pf_storage::metrics::{self, EventType, MetricsEvent};
use pf_storage::registry::{self, RuntimeSession};
use pf_storage::state_store::{self, WriteGuard};
use pf_storage::transcript::{self, DraftEnvelope, ReadOptions};

use crate::error::LifecycleError;
use crate::paths::{BubblePaths, GlobalPaths};

pub(crate) fn now_iso(now_ms: i64) -> String {
    Utc.timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// The common result shape every mutating operation returns (§4.4 step 9).
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    pub bubble_id: BubbleId,
    pub sequence: u64,
    pub envelope: Envelope,
    pub new_state: StateSnapshot,
}

/// Mirrors the private `repo_key` hash in `pf_storage::archive` so the
/// index entry this crate writes agrees with the directory
/// `archive::snapshot_bubble_dir` actually created.
fn repo_key_hash(repo_path: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(repo_path.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

pub(crate) fn transcript_read_options() -> ReadOptions {
    ReadOptions {
        allow_missing: true,
        tolerate_partial_tail: true,
        strict_audit: false,
    }
}

pub(crate) fn read_state_required(paths: &BubblePaths) -> Result<state_store::Read, LifecycleError> {
    state_store::read(&paths.state())?
        .ok_or_else(|| LifecycleError::NotFound(format!("no state snapshot for bubble {}", paths.bubble_id)))
}

/// Mutates `current` without going through [`StateSnapshot::apply_transition`].
/// Used for the handful of operations that mutate a snapshot in place while
/// remaining in the same `BubbleState` — a resumed `start` on an already
/// `RUNNING` bubble, and a queued `request-rework` on `WAITING_HUMAN` —
/// where `allowed_targets` deliberately excludes self-transitions because
/// they are not "transitions" in the state-machine sense.
pub(crate) fn mutate_in_place(
    current: &StateSnapshot,
    mutate: impl FnOnce(&mut StateSnapshot),
) -> Result<StateSnapshot, LifecycleError> {
    let mut next = current.clone();
    mutate(&mut next);
    next.validate_invariants()?;
    Ok(next)
}

pub(crate) fn load_config(paths: &BubblePaths) -> Result<BubbleConfig, LifecycleError> {
    let text = std::fs::read_to_string(paths.config())
        .map_err(|_| LifecycleError::NotFound(format!("no config for bubble {}", paths.bubble_id)))?;
    Ok(pf_config::parse_bubble_toml(&text)?)
}

fn save_config(paths: &BubblePaths, config: &BubbleConfig) -> Result<(), LifecycleError> {
    let text = pf_config::serialize_bubble_toml(config)?;
    std::fs::write(paths.config(), text)?;
    Ok(())
}

pub(crate) fn append_envelope(
    paths: &BubblePaths,
    draft: DraftEnvelope,
    now_ms: i64,
) -> Result<(Envelope, u64), LifecycleError> {
    Ok(transcript::append(
        &paths.transcript(),
        Some(&paths.inbox()),
        &paths.lock(),
        draft,
        now_ms,
        LockOptions::default(),
        false,
    )?)
}

/// Persists `next_state`, mapping a failure into [`LifecycleError::Recovery`]
/// when `envelope_id` is `Some` (i.e. the transcript append already landed).
pub(crate) fn write_state(
    paths: &BubblePaths,
    next_state: &StateSnapshot,
    guard: WriteGuard,
    now_ms: i64,
    envelope_id_if_appended: Option<&str>,
) -> Result<(), LifecycleError> {
    let result = state_store::write(&paths.state(), &paths.lock(), next_state, guard, LockOptions::default(), now_ms);
    match result {
        Ok(_) => Ok(()),
        Err(e) => match envelope_id_if_appended {
            Some(envelope_id) => Err(LifecycleError::Recovery {
                envelope_id: envelope_id.to_string(),
                cause: e.to_string(),
            }),
            None => Err(e.into()),
        },
    }
}

/// Step 2 of the common recipe: backfill `bubble_instance_id` if missing,
/// emitting a one-shot `bubble_instance_backfilled` metrics event.
pub(crate) fn backfill_instance_id(
    paths: &BubblePaths,
    global: &GlobalPaths,
    config: &mut BubbleConfig,
    ids: &impl IdSource,
    now_ms: i64,
) -> Result<(), LifecycleError> {
    if config.bubble_instance_id.is_some() {
        return Ok(());
    }
    let instance_id = BubbleInstanceId::new(ids.next_id());
    config.bubble_instance_id = Some(instance_id.clone());
    save_config(paths, config)?;
    emit_metric(
        global,
        config,
        EventType::BubbleInstanceBackfilled,
        None,
        "orchestrator",
        now_ms,
    );
    Ok(())
}

/// Step 8 of the common recipe: best-effort metrics emission. Never
/// propagated as an operation failure (§5 "notifications ... are
/// best-effort; their failures are logged, never surfaced").
pub(crate) fn emit_metric(
    global: &GlobalPaths,
    config: &BubbleConfig,
    event_type: EventType,
    round: Option<u32>,
    actor_role: &str,
    now_ms: i64,
) {
    let instance_id = match &config.bubble_instance_id {
        Some(id) => id.to_string(),
        None => return,
    };
    let dt = Utc
        .timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(Utc::now);
    let event = MetricsEvent {
        schema_version: 1,
        ts: now_iso(now_ms),
        repo_path: config.repo_path.display().to_string(),
        bubble_instance_id: instance_id,
        bubble_id: config.id.to_string(),
        event_type,
        round,
        actor_role: actor_role.to_string(),
        metadata: None,
    };
    if let Err(e) = metrics::emit(
        &global.metrics_root,
        &global.global_lock_root,
        &event,
        dt.format("%Y").to_string().parse().unwrap_or(1970),
        dt.format("%m").to_string().parse().unwrap_or(1),
        LockOptions::default(),
        now_ms,
    ) {
        tracing::warn!(error = %e, ?event_type, "metrics emission failed; continuing");
    }
}

/// Step 8: best-effort multiplexer delivery. Never propagated.
pub(crate) async fn deliver_to_session<S: SessionAdapter>(
    session_adapter: &S,
    session_id: &str,
    text: &str,
) {
    if let Err(e) = session_adapter.send_literal(session_id, text).await {
        tracing::warn!(error = %e, "multiplexer delivery failed; continuing");
        return;
    }
    if let Err(e) = session_adapter.send_enter(session_id).await {
        tracing::warn!(error = %e, "multiplexer enter-key delivery failed; continuing");
    }
}

/// Step 8: best-effort desktop/audible notification, gated by
/// `notifications_policy`.
async fn notify_best_effort<N: NotifyAdapter>(notify_adapter: &N, config: &BubbleConfig, title: &str, message: &str) {
    if matches!(
        config.notifications_policy,
        NotificationsPolicy::Silent | NotificationsPolicy::MultiplexerOnly
    ) {
        return;
    }
    if let Err(e) = notify_adapter.notify(title, message).await {
        tracing::warn!(error = %e, "desktop notification failed; continuing");
    }
}

// ---------------------------------------------------------------------
// create
// ---------------------------------------------------------------------

pub struct CreateInput {
    pub repo_path: std::path::PathBuf,
    pub bubble_id: String,
    pub base_branch: String,
    pub bubble_branch: String,
    pub task_text: String,
    pub implementer: String,
    pub reviewer: String,
    pub test_command: String,
    pub typecheck_command: String,
    pub watchdog_timeout_minutes: u32,
    pub max_rounds: u32,
    pub commit_requires_approval: bool,
    pub quality_mode: pf_core::config::QualityMode,
    pub review_artifact_type: Option<pf_core::config::ReviewArtifactType>,
    pub local_overlay_policy: pf_core::config::LocalOverlayPolicy,
    pub notifications_policy: NotificationsPolicy,
}

pub struct CreateOutcome {
    pub paths: BubblePaths,
    pub config: BubbleConfig,
    pub state: StateSnapshot,
}

pub fn create(
    global: &GlobalPaths,
    clock: &impl Clock,
    ids: &impl IdSource,
    input: CreateInput,
) -> Result<CreateOutcome, LifecycleError> {
    BubbleConfig::validate_id(&input.bubble_id)?;
    let bubble_id = BubbleId::new(input.bubble_id.clone());
    let paths = BubblePaths::new(&input.repo_path, bubble_id.as_str());
    if paths.bubble_dir().exists() {
        return Err(LifecycleError::Conflict(format!(
            "bubble directory already exists for {bubble_id}"
        )));
    }

    let now_ms = clock.now_ms();
    let review_artifact_type = input
        .review_artifact_type
        .unwrap_or_else(|| BubbleConfig::infer_review_artifact_type(&input.task_text));

    let mut config = BubbleConfig {
        schema_version: 1,
        id: bubble_id.clone(),
        bubble_instance_id: Some(BubbleInstanceId::new(ids.next_id())),
        repo_path: input.repo_path.clone(),
        base_branch: input.base_branch,
        bubble_branch: input.bubble_branch,
        implementer: input.implementer,
        reviewer: input.reviewer,
        test_command: input.test_command,
        typecheck_command: input.typecheck_command,
        watchdog_timeout_minutes: input.watchdog_timeout_minutes,
        max_rounds: input.max_rounds,
        commit_requires_approval: input.commit_requires_approval,
        quality_mode: input.quality_mode,
        review_artifact_type,
        local_overlay_policy: input.local_overlay_policy,
        notifications_policy: input.notifications_policy,
    };
    config.validate()?;

    std::fs::create_dir_all(paths.bubble_dir())?;
    std::fs::create_dir_all(paths.artifacts_dir())?;
    save_config(&paths, &config)?;
    std::fs::write(paths.task_artifact(), &input.task_text)?;
    // empty inbox/transcript: created lazily by the first append below.

    let initial_state = StateSnapshot::new(bubble_id.clone());
    state_store::write(
        &paths.state(),
        &paths.lock(),
        &initial_state,
        WriteGuard::default(),
        LockOptions::default(),
        now_ms,
    )?;

    // Initialise the runtime-session registry file (§4.4 step: "runtime
    // sessions file initialiser") so reads never race a missing file.
    registry::upsert(
        &paths.registry(),
        &paths.registry_lock(),
        RuntimeSession {
            bubble_id: bubble_id.clone(),
            repo_path: input.repo_path.display().to_string(),
            worktree_path: String::new(),
            multiplexer_session_name: String::new(),
            updated_at: now_iso(now_ms),
        },
        LockOptions::default(),
        now_ms,
    )?;
    registry::remove(&paths.registry(), &paths.registry_lock(), &bubble_id, LockOptions::default(), now_ms)?;

    let (_envelope, _seq) = append_envelope(
        &paths,
        DraftEnvelope {
            bubble_id: bubble_id.clone(),
            sender: Recipient::Human,
            recipient: Recipient::Implementer,
            envelope_type: EnvelopeType::Task,
            round: 0,
            payload: Payload {
                summary: Some(input.task_text.clone()),
                ..Default::default()
            },
            refs: Vec::new(),
        },
        now_ms,
    )?;

    emit_metric(global, &config, EventType::BubbleCreated, Some(0), "human", now_ms);

    Ok(CreateOutcome {
        paths,
        config,
        state: initial_state,
    })
}

// ---------------------------------------------------------------------
// start
// ---------------------------------------------------------------------

pub async fn start<C: Clock, S: SessionAdapter, G: GitAdapter>(
    global: &GlobalPaths,
    clock: &C,
    ids: &impl IdSource,
    session_adapter: &S,
    git_adapter: &G,
    repo_path: &Path,
    bubble_id: &str,
) -> Result<OperationOutcome, LifecycleError> {
    let paths = BubblePaths::new(repo_path, bubble_id);
    let mut config = load_config(&paths)?;
    let now_ms = clock.now_ms();
    backfill_instance_id(&paths, global, &mut config, ids, now_ms)?;

    let current = read_state_required(&paths)?;
    if !matches!(
        current.snapshot.state,
        BubbleState::Created | BubbleState::PreparingWorkspace | BubbleState::Running
    ) {
        return Err(LifecycleError::Precondition(format!(
            "start requires CREATED/PREPARING_WORKSPACE/RUNNING, found {:?}",
            current.snapshot.state
        )));
    }

    let bubble_id_typed = BubbleId::new(bubble_id);
    if let Some(existing) = registry::read(&paths.registry(), &bubble_id_typed)? {
        if !existing.multiplexer_session_name.is_empty()
            && session_adapter.is_alive(&existing.multiplexer_session_name).await.unwrap_or(false)
        {
            return Err(LifecycleError::Conflict(format!("bubble {bubble_id} is already running")));
        }
        registry::remove(&paths.registry(), &paths.registry_lock(), &bubble_id_typed, LockOptions::default(), now_ms)?;
    }

    let session_id: String;

    let next_state = if current.snapshot.state == BubbleState::Running {
        // Resume: re-launch the session, skip bootstrap. Still RUNNING
        // afterwards, so this mutates in place rather than transitioning.
        session_id = session_adapter
            .spawn(bubble_id, &paths.worktree_dir(), default_shell_command(), &[])
            .await?;
        mutate_in_place(&current.snapshot, |s| {
            s.last_command_at = Some(now_iso(now_ms));
        })?
    } else {
        // CREATED transitions into PREPARING_WORKSPACE; a bubble already
        // found in PREPARING_WORKSPACE is a crash-recovery reattach and
        // skips straight to re-attempting bootstrap.
        let after_prepare = if current.snapshot.state == BubbleState::Created {
            let prepared = current.snapshot.apply_transition(BubbleState::PreparingWorkspace, |_| {})?;
            state_store::write(
                &paths.state(),
                &paths.lock(),
                &prepared,
                WriteGuard {
                    expected_fingerprint: Some(current.fingerprint.clone()),
                    expected_state: Some(current.snapshot.state),
                },
                LockOptions::default(),
                now_ms,
            )?;
            prepared
        } else {
            current.snapshot.clone()
        };

        if let Err(e) = git_adapter
            .bootstrap_worktree(repo_path, &paths.worktree_dir(), &config.base_branch, &config.bubble_branch)
            .await
        {
            let failed = after_prepare.apply_transition(BubbleState::Failed, |s| {
                s.last_command_at = Some(now_iso(now_ms));
            })?;
            let _ = state_store::write(&paths.state(), &paths.lock(), &failed, WriteGuard::default(), LockOptions::default(), now_ms);
            return Err(e.into());
        }

        let spawn_result = session_adapter
            .spawn(bubble_id, &paths.worktree_dir(), default_shell_command(), &[])
            .await;
        session_id = match spawn_result {
            Ok(id) => id,
            Err(e) => {
                let _ = git_adapter
                    .cleanup_worktree(repo_path, &paths.worktree_dir(), &config.bubble_branch)
                    .await;
                let failed = after_prepare.apply_transition(BubbleState::Failed, |s| {
                    s.last_command_at = Some(now_iso(now_ms));
                })?;
                let _ = state_store::write(&paths.state(), &paths.lock(), &failed, WriteGuard::default(), LockOptions::default(), now_ms);
                return Err(e.into());
            }
        };

        after_prepare.apply_transition(BubbleState::Running, |s| {
            s.round = 1;
            s.set_active(ActiveRole::Implementer, now_iso(now_ms));
            s.last_command_at = Some(now_iso(now_ms));
            s.round_role_history.push(RoundRoleEntry {
                round: 1,
                implementer: config.implementer.clone(),
                reviewer: config.reviewer.clone(),
                switched_at: now_iso(now_ms),
            });
        })?
    };

    registry::claim(
        &paths.registry(),
        &paths.registry_lock(),
        RuntimeSession {
            bubble_id: bubble_id_typed.clone(),
            repo_path: repo_path.display().to_string(),
            worktree_path: paths.worktree_dir().display().to_string(),
            multiplexer_session_name: session_id,
            updated_at: now_iso(now_ms),
        },
        LockOptions::default(),
        now_ms,
    )?;

    let latest = read_state_required(&paths)?;
    write_state(
        &paths,
        &next_state,
        WriteGuard {
            expected_fingerprint: Some(latest.fingerprint),
            expected_state: None,
        },
        now_ms,
        None,
    )?;

    Ok(OperationOutcome {
        bubble_id: bubble_id_typed,
        sequence: 0,
        envelope: synthetic_envelope(bubble_id, EnvelopeType::Task, Recipient::Orchestrator, Recipient::Implementer, next_state.round, now_ms),
        new_state: next_state,
    })
}

fn default_shell_command() -> &'static str {
    "${SHELL:-/bin/bash}"
}

/// Operations that mutate state without an accompanying transcript append
/// (`start`/`stop`) still need something to hand back in
/// [`OperationOutcome::envelope`]; this builds a non-persisted placeholder
/// rather than widening the return type into an enum.
fn synthetic_envelope(
    bubble_id: &str,
    envelope_type: EnvelopeType,
    sender: Recipient,
    recipient: Recipient,
    round: u32,
    now_ms: i64,
) -> Envelope {
    Envelope {
        id: pf_core::envelope::format_envelope_id("00000000", 0),
        ts: now_iso(now_ms),
        bubble_id: BubbleId::new(bubble_id),
        sender,
        recipient,
        envelope_type,
        round,
        payload: Payload::default(),
        refs: Vec::new(),
    }
}

// ---------------------------------------------------------------------
// stop
// ---------------------------------------------------------------------

pub struct StopOutcome {
    pub new_state: StateSnapshot,
    pub state_write_error: Option<String>,
}

pub async fn stop<C: Clock, S: SessionAdapter>(
    global: &GlobalPaths,
    clock: &C,
    ids: &impl IdSource,
    session_adapter: &S,
    repo_path: &Path,
    bubble_id: &str,
) -> Result<StopOutcome, LifecycleError> {
    let paths = BubblePaths::new(repo_path, bubble_id);
    let mut config = load_config(&paths)?;
    let now_ms = clock.now_ms();
    backfill_instance_id(&paths, global, &mut config, ids, now_ms)?;

    let current = read_state_required(&paths)?;
    if current.snapshot.state.is_terminal() {
        return Err(LifecycleError::Precondition(format!(
            "stop requires a non-terminal state, found {:?}",
            current.snapshot.state
        )));
    }

    let bubble_id_typed = BubbleId::new(bubble_id);
    if let Some(session) = registry::read(&paths.registry(), &bubble_id_typed)? {
        if !session.multiplexer_session_name.is_empty() {
            if let Err(e) = session_adapter.kill(&session.multiplexer_session_name).await {
                tracing::warn!(error = %e, "killing multiplexer session during stop failed; continuing cleanup");
            }
        }
    }
    registry::remove(&paths.registry(), &paths.registry_lock(), &bubble_id_typed, LockOptions::default(), now_ms)?;

    let next_state = current.snapshot.apply_transition(BubbleState::Cancelled, |s| {
        s.clear_active();
        s.last_command_at = Some(now_iso(now_ms));
    })?;

    let write_result = state_store::write(
        &paths.state(),
        &paths.lock(),
        &next_state,
        WriteGuard {
            expected_fingerprint: Some(current.fingerprint),
            expected_state: Some(current.snapshot.state),
        },
        LockOptions::default(),
        now_ms,
    );

    Ok(StopOutcome {
        new_state: next_state,
        state_write_error: write_result.err().map(|e| e.to_string()),
    })
}

// ---------------------------------------------------------------------
// delete
// ---------------------------------------------------------------------

pub enum DeleteOutcome {
    Deleted,
    ConfirmationRequired { manifest: String },
}

pub async fn delete<C: Clock, S: SessionAdapter, G: GitAdapter>(
    global: &GlobalPaths,
    clock: &C,
    ids: &impl IdSource,
    session_adapter: &S,
    git_adapter: &G,
    repo_path: &Path,
    bubble_id: &str,
    force: bool,
) -> Result<DeleteOutcome, LifecycleError> {
    let paths = BubblePaths::new(repo_path, bubble_id);
    let mut config = load_config(&paths)?;
    let now_ms = clock.now_ms();
    backfill_instance_id(&paths, global, &mut config, ids, now_ms)?;

    let bubble_id_typed = BubbleId::new(bubble_id);
    let session_claim = registry::read(&paths.registry(), &bubble_id_typed)?;
    let worktree_exists = paths.worktree_dir().exists();
    let branch_in_use = session_claim.is_some() || worktree_exists;
    if branch_in_use && !force {
        let manifest = format!(
            "{{\"worktree_exists\":{worktree_exists},\"has_runtime_session\":{}}}",
            session_claim.is_some()
        );
        return Ok(DeleteOutcome::ConfirmationRequired { manifest });
    }

    let current = read_state_required(&paths)?;
    if !current.snapshot.state.is_terminal() && current.snapshot.state != BubbleState::Created {
        let _ = stop(global, clock, ids, session_adapter, repo_path, bubble_id).await;
    }

    let instance_id = config
        .bubble_instance_id
        .as_ref()
        .map(ShortId::as_str)
        .unwrap_or(bubble_id)
        .to_string();

    let manifest_json = serde_json::json!({
        "bubble_id": bubble_id,
        "bubble_instance_id": instance_id,
        "deleted_at": now_iso(now_ms),
    })
    .to_string();
    let repo_path_str = config.repo_path.display().to_string();
    let archive_path = archive::snapshot_bubble_dir(
        &global.archive_root,
        &repo_path_str,
        &instance_id,
        &paths.bubble_dir(),
        &manifest_json,
    )?;

    archive::upsert_index_entry(
        &global.archive_index(),
        &global.archive_lock(),
        ArchiveEntry {
            bubble_instance_id: instance_id.clone(),
            bubble_id: bubble_id.to_string(),
            repo_path: repo_path_str,
            repo_key: repo_key_hash(&config.repo_path.display().to_string()),
            archive_path: archive_path.display().to_string(),
            status: ArchiveStatus::Deleted,
            created_at: now_iso(now_ms),
            deleted_at: Some(now_iso(now_ms)),
            purged_at: None,
            updated_at: now_iso(now_ms),
        },
        LockOptions::default(),
        now_ms,
    )?;

    if let Err(e) = git_adapter
        .cleanup_worktree(repo_path, &paths.worktree_dir(), &config.bubble_branch)
        .await
    {
        tracing::warn!(error = %e, "worktree cleanup during delete failed; bubble directory removal still proceeds");
    }

    match std::fs::remove_dir_all(paths.bubble_dir()) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    emit_metric(global, &config, EventType::BubbleDeleted, None, "human", now_ms);

    Ok(DeleteOutcome::Deleted)
}

// ---------------------------------------------------------------------
// commit
// ---------------------------------------------------------------------

pub async fn commit<C: Clock, G: GitAdapter>(
    global: &GlobalPaths,
    clock: &C,
    ids: &impl IdSource,
    git_adapter: &G,
    repo_path: &Path,
    bubble_id: &str,
    message: &str,
) -> Result<OperationOutcome, LifecycleError> {
    let paths = BubblePaths::new(repo_path, bubble_id);
    let mut config = load_config(&paths)?;
    let now_ms = clock.now_ms();
    backfill_instance_id(&paths, global, &mut config, ids, now_ms)?;

    let current = read_state_required(&paths)?;
    if current.snapshot.state != BubbleState::ApprovedForCommit {
        return Err(LifecycleError::Precondition(format!(
            "commit requires APPROVED_FOR_COMMIT, found {:?}",
            current.snapshot.state
        )));
    }

    let done_package = std::fs::read_to_string(paths.done_package_artifact()).unwrap_or_default();
    if done_package.trim().is_empty() {
        return Err(LifecycleError::Precondition(
            "artifacts/done-package.md must be staged and non-empty before commit".into(),
        ));
    }

    let bubble_id_typed = BubbleId::new(bubble_id);
    let (envelope, sequence) = append_envelope(
        &paths,
        DraftEnvelope {
            bubble_id: bubble_id_typed.clone(),
            sender: Recipient::Implementer,
            recipient: Recipient::Orchestrator,
            envelope_type: EnvelopeType::DonePackage,
            round: current.snapshot.round,
            payload: Payload {
                summary: Some(done_package),
                ..Default::default()
            },
            refs: Vec::new(),
        },
        now_ms,
    )?;

    let commit_sha = git_adapter
        .commit_all(&paths.worktree_dir(), message)
        .await
        .map_err(|e| LifecycleError::Recovery {
            envelope_id: envelope.id.to_string(),
            cause: e.to_string(),
        })?;

    let committed = current.snapshot.apply_transition(BubbleState::Committed, |s| {
        s.last_command_at = Some(now_iso(now_ms));
    })?;
    let done = committed.apply_transition(BubbleState::Done, |s| {
        s.last_command_at = Some(now_iso(now_ms));
    })?;

    write_state(
        &paths,
        &done,
        WriteGuard {
            expected_fingerprint: Some(current.fingerprint),
            expected_state: Some(BubbleState::ApprovedForCommit),
        },
        now_ms,
        Some(envelope.id.as_str()),
    )?;

    tracing::info!(%commit_sha, "bubble committed");

    Ok(OperationOutcome {
        bubble_id: bubble_id_typed,
        sequence,
        envelope,
        new_state: done,
    })
}

// ---------------------------------------------------------------------
// Agent command: pass
// ---------------------------------------------------------------------

pub struct PassInput {
    pub summary: String,
    pub findings: Vec<Finding>,
    pub pass_intent: Option<PassIntent>,
    pub refs: Vec<String>,
}

pub async fn pass<C: Clock>(
    global: &GlobalPaths,
    clock: &C,
    ids: &impl IdSource,
    repo_path: &Path,
    bubble_id: &str,
    caller: ActiveRole,
    input: PassInput,
) -> Result<OperationOutcome, LifecycleError> {
    let paths = BubblePaths::new(repo_path, bubble_id);
    let mut config = load_config(&paths)?;
    let now_ms = clock.now_ms();
    backfill_instance_id(&paths, global, &mut config, ids, now_ms)?;

    let current = read_state_required(&paths)?;
    if current.snapshot.state != BubbleState::Running {
        return Err(LifecycleError::Precondition(format!(
            "pass requires RUNNING, found {:?}",
            current.snapshot.state
        )));
    }
    let active_role = current
        .snapshot
        .active_role
        .ok_or_else(|| LifecycleError::Precondition("no active agent set while RUNNING".into()))?;
    if active_role != caller {
        return Err(LifecycleError::Precondition(format!(
            "pass called by {caller:?} but active agent is {active_role:?}"
        )));
    }

    let bubble_id_typed = BubbleId::new(bubble_id);
    let sender = role_to_recipient(active_role);
    let recipient = role_to_recipient(active_role.other());

    let (envelope, sequence) = append_envelope(
        &paths,
        DraftEnvelope {
            bubble_id: bubble_id_typed.clone(),
            sender,
            recipient,
            envelope_type: EnvelopeType::Pass,
            round: current.snapshot.round,
            payload: Payload {
                summary: Some(input.summary),
                findings: input.findings,
                pass_intent: input.pass_intent,
                ..Default::default()
            },
            refs: input.refs,
        },
        now_ms,
    )?;

    let next_state = mutate_in_place(&current.snapshot, |s| {
        s.last_command_at = Some(now_iso(now_ms));
        match active_role {
            ActiveRole::Reviewer => {
                s.round += 1;
                s.set_active(ActiveRole::Implementer, now_iso(now_ms));
                s.round_role_history.push(RoundRoleEntry {
                    round: s.round,
                    implementer: config.implementer.clone(),
                    reviewer: config.reviewer.clone(),
                    switched_at: now_iso(now_ms),
                });
            }
            ActiveRole::Implementer => {
                s.set_active(ActiveRole::Reviewer, now_iso(now_ms));
            }
        }
    })?;

    write_state(
        &paths,
        &next_state,
        WriteGuard {
            expected_fingerprint: Some(current.fingerprint),
            expected_state: Some(BubbleState::Running),
        },
        now_ms,
        Some(envelope.id.as_str()),
    )?;

    emit_metric(
        global,
        &config,
        EventType::BubblePassed,
        Some(next_state.round),
        active_role.short_code(),
        now_ms,
    );

    Ok(OperationOutcome {
        bubble_id: bubble_id_typed,
        sequence,
        envelope,
        new_state: next_state,
    })
}

pub(crate) fn role_to_recipient(role: ActiveRole) -> Recipient {
    match role {
        ActiveRole::Implementer => Recipient::Implementer,
        ActiveRole::Reviewer => Recipient::Reviewer,
    }
}

// ---------------------------------------------------------------------
// Agent command: ask-human
// ---------------------------------------------------------------------

pub async fn ask_human<C: Clock, N: NotifyAdapter>(
    global: &GlobalPaths,
    clock: &C,
    ids: &impl IdSource,
    notify_adapter: &N,
    repo_path: &Path,
    bubble_id: &str,
    question: &str,
) -> Result<OperationOutcome, LifecycleError> {
    let paths = BubblePaths::new(repo_path, bubble_id);
    let mut config = load_config(&paths)?;
    let now_ms = clock.now_ms();
    backfill_instance_id(&paths, global, &mut config, ids, now_ms)?;

    let current = read_state_required(&paths)?;
    if current.snapshot.state != BubbleState::Running {
        return Err(LifecycleError::Precondition(format!(
            "ask-human requires RUNNING, found {:?}",
            current.snapshot.state
        )));
    }
    let active_role = current
        .snapshot
        .active_role
        .ok_or_else(|| LifecycleError::Precondition("no active agent set while RUNNING".into()))?;

    let bubble_id_typed = BubbleId::new(bubble_id);
    let (envelope, sequence) = append_envelope(
        &paths,
        DraftEnvelope {
            bubble_id: bubble_id_typed.clone(),
            sender: role_to_recipient(active_role),
            recipient: Recipient::Human,
            envelope_type: EnvelopeType::HumanQuestion,
            round: current.snapshot.round,
            payload: Payload {
                question: Some(question.to_string()),
                ..Default::default()
            },
            refs: Vec::new(),
        },
        now_ms,
    )?;

    let next_state = current.snapshot.apply_transition(BubbleState::WaitingHuman, |s| {
        s.last_command_at = Some(now_iso(now_ms));
    })?;

    write_state(
        &paths,
        &next_state,
        WriteGuard {
            expected_fingerprint: Some(current.fingerprint),
            expected_state: Some(BubbleState::Running),
        },
        now_ms,
        Some(envelope.id.as_str()),
    )?;

    emit_metric(
        global,
        &config,
        EventType::BubbleAskedHuman,
        Some(next_state.round),
        active_role.short_code(),
        now_ms,
    );
    notify_best_effort(notify_adapter, &config, "Pairflow: question waiting", question).await;

    Ok(OperationOutcome {
        bubble_id: bubble_id_typed,
        sequence,
        envelope,
        new_state: next_state,
    })
}

// ---------------------------------------------------------------------
// Agent command: converged (reviewer only)
// ---------------------------------------------------------------------

pub async fn converged<C: Clock, N: NotifyAdapter>(
    global: &GlobalPaths,
    clock: &C,
    ids: &impl IdSource,
    notify_adapter: &N,
    repo_path: &Path,
    bubble_id: &str,
    summary: &str,
) -> Result<OperationOutcome, LifecycleError> {
    let paths = BubblePaths::new(repo_path, bubble_id);
    let mut config = load_config(&paths)?;
    let now_ms = clock.now_ms();
    backfill_instance_id(&paths, global, &mut config, ids, now_ms)?;

    let current = read_state_required(&paths)?;
    if current.snapshot.state != BubbleState::Running {
        return Err(LifecycleError::Precondition(format!(
            "converged requires RUNNING, found {:?}",
            current.snapshot.state
        )));
    }
    if current.snapshot.active_role != Some(ActiveRole::Reviewer) {
        return Err(LifecycleError::Precondition(
            "converged may only be called by the reviewer".into(),
        ));
    }
    if current.snapshot.round < 2 {
        return Err(LifecycleError::Precondition(
            "converged requires at least 2 completed implementer<->reviewer exchanges".into(),
        ));
    }

    let transcript = transcript::read(&paths.transcript(), transcript_read_options())?;
    if let Some(last_review) = transcript
        .iter()
        .rev()
        .find(|e| e.envelope_type == EnvelopeType::Pass && e.sender == Recipient::Reviewer)
    {
        let blocking = last_review
            .payload
            .findings
            .iter()
            .any(|f| matches!(f.severity, Severity::P0 | Severity::P1));
        if blocking {
            return Err(LifecycleError::Precondition(
                "reviewer's last review contains an unresolved P0/P1 finding".into(),
            ));
        }
    }
    let asked = transcript.iter().filter(|e| e.envelope_type == EnvelopeType::HumanQuestion).count();
    let replied = transcript.iter().filter(|e| e.envelope_type == EnvelopeType::HumanReply).count();
    if asked > replied {
        return Err(LifecycleError::Precondition(
            "an unanswered HUMAN_QUESTION is still pending".into(),
        ));
    }

    let bubble_id_typed = BubbleId::new(bubble_id);
    let (_convergence_envelope, _seq) = append_envelope(
        &paths,
        DraftEnvelope {
            bubble_id: bubble_id_typed.clone(),
            sender: Recipient::Reviewer,
            recipient: Recipient::Human,
            envelope_type: EnvelopeType::Convergence,
            round: current.snapshot.round,
            payload: Payload {
                summary: Some(summary.to_string()),
                ..Default::default()
            },
            refs: Vec::new(),
        },
        now_ms,
    )?;
    // Same lock scope in spirit: both appends serialize through the same
    // per-bubble transcript lock, so no other writer can interleave
    // between them even though each call re-acquires it.
    let (approval_envelope, sequence) = append_envelope(
        &paths,
        DraftEnvelope {
            bubble_id: bubble_id_typed.clone(),
            sender: Recipient::Reviewer,
            recipient: Recipient::Human,
            envelope_type: EnvelopeType::ApprovalRequest,
            round: current.snapshot.round,
            payload: Payload::default(),
            refs: Vec::new(),
        },
        now_ms,
    )?;

    let next_state = current.snapshot.apply_transition(BubbleState::ReadyForApproval, |s| {
        s.last_command_at = Some(now_iso(now_ms));
    })?;

    write_state(
        &paths,
        &next_state,
        WriteGuard {
            expected_fingerprint: Some(current.fingerprint),
            expected_state: Some(BubbleState::Running),
        },
        now_ms,
        Some(approval_envelope.id.as_str()),
    )?;

    emit_metric(
        global,
        &config,
        EventType::BubbleConverged,
        Some(next_state.round),
        "rev",
        now_ms,
    );
    notify_best_effort(notify_adapter, &config, "Pairflow: ready for approval", summary).await;

    Ok(OperationOutcome {
        bubble_id: bubble_id_typed,
        sequence,
        envelope: approval_envelope,
        new_state: next_state,
    })
}

// ---------------------------------------------------------------------
// Human command: reply
// ---------------------------------------------------------------------

pub async fn reply<C: Clock, S: SessionAdapter>(
    global: &GlobalPaths,
    clock: &C,
    ids: &impl IdSource,
    session_adapter: &S,
    repo_path: &Path,
    bubble_id: &str,
    message: &str,
) -> Result<OperationOutcome, LifecycleError> {
    let paths = BubblePaths::new(repo_path, bubble_id);
    let mut config = load_config(&paths)?;
    let now_ms = clock.now_ms();
    backfill_instance_id(&paths, global, &mut config, ids, now_ms)?;

    let current = read_state_required(&paths)?;
    if current.snapshot.state != BubbleState::WaitingHuman {
        return Err(LifecycleError::Precondition(format!(
            "reply requires WAITING_HUMAN, found {:?}",
            current.snapshot.state
        )));
    }

    let transcript = transcript::read(&paths.transcript(), transcript_read_options())?;
    let last_asker = transcript
        .iter()
        .rev()
        .find(|e| e.envelope_type == EnvelopeType::HumanQuestion)
        .map(|e| e.sender)
        .unwrap_or(Recipient::Implementer);

    let bubble_id_typed = BubbleId::new(bubble_id);
    let (envelope, sequence) = append_envelope(
        &paths,
        DraftEnvelope {
            bubble_id: bubble_id_typed.clone(),
            sender: Recipient::Human,
            recipient: last_asker,
            envelope_type: EnvelopeType::HumanReply,
            round: current.snapshot.round,
            payload: Payload {
                message: Some(message.to_string()),
                ..Default::default()
            },
            refs: Vec::new(),
        },
        now_ms,
    )?;

    let next_state = current.snapshot.apply_transition(BubbleState::Running, |s| {
        s.last_command_at = Some(now_iso(now_ms));
    })?;

    write_state(
        &paths,
        &next_state,
        WriteGuard {
            expected_fingerprint: Some(current.fingerprint),
            expected_state: Some(BubbleState::WaitingHuman),
        },
        now_ms,
        Some(envelope.id.as_str()),
    )?;

    if let Some(session) = registry::read(&paths.registry(), &bubble_id_typed)? {
        if !session.multiplexer_session_name.is_empty() {
            deliver_to_session(session_adapter, &session.multiplexer_session_name, message).await;
        }
    }

    Ok(OperationOutcome {
        bubble_id: bubble_id_typed,
        sequence,
        envelope,
        new_state: next_state,
    })
}

// ---------------------------------------------------------------------
// Human command: approve
// ---------------------------------------------------------------------

pub async fn approve<C: Clock>(
    global: &GlobalPaths,
    clock: &C,
    ids: &impl IdSource,
    repo_path: &Path,
    bubble_id: &str,
) -> Result<OperationOutcome, LifecycleError> {
    let paths = BubblePaths::new(repo_path, bubble_id);
    let mut config = load_config(&paths)?;
    let now_ms = clock.now_ms();
    backfill_instance_id(&paths, global, &mut config, ids, now_ms)?;

    let current = read_state_required(&paths)?;
    if current.snapshot.state != BubbleState::ReadyForApproval {
        return Err(LifecycleError::Precondition(format!(
            "approve requires READY_FOR_APPROVAL, found {:?}",
            current.snapshot.state
        )));
    }

    let bubble_id_typed = BubbleId::new(bubble_id);
    let (envelope, sequence) = append_envelope(
        &paths,
        DraftEnvelope {
            bubble_id: bubble_id_typed.clone(),
            sender: Recipient::Human,
            recipient: Recipient::Reviewer,
            envelope_type: EnvelopeType::ApprovalDecision,
            round: current.snapshot.round,
            payload: Payload {
                decision: Some(Decision::Approve),
                ..Default::default()
            },
            refs: Vec::new(),
        },
        now_ms,
    )?;

    let next_state = current.snapshot.apply_transition(BubbleState::ApprovedForCommit, |s| {
        s.last_command_at = Some(now_iso(now_ms));
    })?;

    write_state(
        &paths,
        &next_state,
        WriteGuard {
            expected_fingerprint: Some(current.fingerprint),
            expected_state: Some(BubbleState::ReadyForApproval),
        },
        now_ms,
        Some(envelope.id.as_str()),
    )?;

    emit_metric(global, &config, EventType::BubbleApproved, Some(next_state.round), "human", now_ms);

    Ok(OperationOutcome {
        bubble_id: bubble_id_typed,
        sequence,
        envelope,
        new_state: next_state,
    })
}

// ---------------------------------------------------------------------
// Human command: request-rework
// ---------------------------------------------------------------------

pub async fn request_rework<C: Clock>(
    global: &GlobalPaths,
    clock: &C,
    ids: &impl IdSource,
    repo_path: &Path,
    bubble_id: &str,
    message: &str,
) -> Result<OperationOutcome, LifecycleError> {
    let paths = BubblePaths::new(repo_path, bubble_id);
    let mut config = load_config(&paths)?;
    let now_ms = clock.now_ms();
    backfill_instance_id(&paths, global, &mut config, ids, now_ms)?;

    if message.trim().is_empty() {
        return Err(LifecycleError::Validation(
            "request-rework requires a non-empty message".into(),
        ));
    }

    let current = read_state_required(&paths)?;
    let bubble_id_typed = BubbleId::new(bubble_id);

    match current.snapshot.state {
        BubbleState::ReadyForApproval => {
            let (envelope, sequence) = append_envelope(
                &paths,
                DraftEnvelope {
                    bubble_id: bubble_id_typed.clone(),
                    sender: Recipient::Human,
                    recipient: Recipient::Reviewer,
                    envelope_type: EnvelopeType::ApprovalDecision,
                    round: current.snapshot.round,
                    payload: Payload {
                        decision: Some(Decision::Revise),
                        message: Some(message.to_string()),
                        ..Default::default()
                    },
                    refs: Vec::new(),
                },
                now_ms,
            )?;

            let next_state = current.snapshot.apply_transition(BubbleState::Running, |s| {
                s.round += 1;
                s.set_active(ActiveRole::Implementer, now_iso(now_ms));
                s.last_command_at = Some(now_iso(now_ms));
                s.round_role_history.push(RoundRoleEntry {
                    round: s.round,
                    implementer: config.implementer.clone(),
                    reviewer: config.reviewer.clone(),
                    switched_at: now_iso(now_ms),
                });
            })?;

            write_state(
                &paths,
                &next_state,
                WriteGuard {
                    expected_fingerprint: Some(current.fingerprint),
                    expected_state: Some(BubbleState::ReadyForApproval),
                },
                now_ms,
                Some(envelope.id.as_str()),
            )?;

            emit_metric(
                global,
                &config,
                EventType::BubbleReworkRequested,
                Some(next_state.round),
                "human",
                now_ms,
            );

            Ok(OperationOutcome {
                bubble_id: bubble_id_typed,
                sequence,
                envelope,
                new_state: next_state,
            })
        }
        BubbleState::WaitingHuman => {
            let intent_id = IntentId::new(ids.next_id());
            let mut next = current.snapshot.clone();
            let superseded_event = next.pending_rework_intent.is_some();
            if let Some(mut existing) = next.pending_rework_intent.take() {
                existing.status = ReworkIntentStatus::Superseded;
                existing.superseded_by_intent_id = Some(intent_id.clone());
                next.rework_intent_history.push(existing);
            }
            next.pending_rework_intent = Some(ReworkIntent {
                intent_id,
                message: message.to_string(),
                requested_by: "human".to_string(),
                requested_at: now_iso(now_ms),
                status: ReworkIntentStatus::Pending,
                superseded_by_intent_id: None,
            });
            next.validate_invariants()?;

            write_state(
                &paths,
                &next,
                WriteGuard {
                    expected_fingerprint: Some(current.fingerprint),
                    expected_state: Some(BubbleState::WaitingHuman),
                },
                now_ms,
                None,
            )?;

            if superseded_event {
                emit_metric(global, &config, EventType::ReworkIntentSuperseded, Some(next.round), "human", now_ms);
            }
            emit_metric(global, &config, EventType::ReworkIntentQueued, Some(next.round), "human", now_ms);

            Ok(OperationOutcome {
                bubble_id: bubble_id_typed.clone(),
                sequence: 0,
                envelope: synthetic_envelope(
                    bubble_id,
                    EnvelopeType::HumanReply,
                    Recipient::Human,
                    Recipient::Implementer,
                    next.round,
                    now_ms,
                ),
                new_state: next,
            })
        }
        other => Err(LifecycleError::Precondition(format!(
            "request-rework requires READY_FOR_APPROVAL or WAITING_HUMAN, found {other:?}"
        ))),
    }
}

#[cfg(test)]
#[path = "ops_tests.rs"]
mod tests;
