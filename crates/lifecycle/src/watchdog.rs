// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-bubble watchdog (§4.5): a pure liveness calculation
//! ([`evaluate_watchdog`]) plus a driver ([`run_watchdog_once`]) that
//! applies the three priority actions against a stalled bubble — deferred
//! rework-intent delivery, a stuck-input retry, and expiry escalation to
//! the human.

use std::path::Path;

use pf_adapters::SessionAdapter;
use pf_core::clock::Clock;
use pf_core::envelope::{EnvelopeType, Payload, Recipient};
use pf_core::id::BubbleId;
use pf_core::idgen::IdSource;
use pf_core::state::{ActiveRole, BubbleState, ReworkIntentStatus, RoundRoleEntry, StateSnapshot};
use pf_storage::metrics::EventType;
use pf_storage::registry;
use pf_storage::state_store::WriteGuard;
use pf_storage::transcript::DraftEnvelope;

use crate::error::LifecycleError;
use crate::ops::{
    append_envelope, backfill_instance_id, emit_metric, load_config, mutate_in_place, now_iso, read_state_required,
    write_state,
};
use crate::paths::{BubblePaths, GlobalPaths};

/// Liveness snapshot for a single bubble, per §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogStatus {
    /// Whether the bubble is in a state the watchdog tracks at all (RUNNING
    /// or WAITING_HUMAN with an active agent).
    pub monitored: bool,
    pub remaining_seconds: i64,
    pub expired: bool,
}

fn parse_iso_ms(value: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Pure liveness calculation: `remainingSeconds = timeout - (now -
/// max(last_command_at, active_since))`, `expired` when that is `<= 0`.
/// A bubble outside RUNNING/WAITING_HUMAN, or one with no active agent, is
/// not monitored at all.
pub fn evaluate_watchdog(state: &StateSnapshot, watchdog_timeout_minutes: u32, now_ms: i64) -> WatchdogStatus {
    let tracked_state = matches!(state.state, BubbleState::Running | BubbleState::WaitingHuman);
    if !tracked_state || state.active_agent.is_none() {
        return WatchdogStatus {
            monitored: false,
            remaining_seconds: 0,
            expired: false,
        };
    }

    let last_command_ms = state.last_command_at.as_deref().and_then(parse_iso_ms);
    let active_since_ms = state.active_since.as_deref().and_then(parse_iso_ms);
    let reference_ms = match (last_command_ms, active_since_ms) {
        (Some(a), Some(b)) => a.max(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => now_ms,
    };

    let timeout_ms = i64::from(watchdog_timeout_minutes) * 60_000;
    let elapsed_ms = now_ms - reference_ms;
    let remaining_seconds = (timeout_ms - elapsed_ms).div_euclid(1000);

    WatchdogStatus {
        monitored: true,
        remaining_seconds,
        expired: remaining_seconds <= 0,
    }
}

/// The action `run_watchdog_once` took, for the caller to log or report.
#[derive(Debug, Clone)]
pub enum WatchdogAction {
    /// A queued rework intent was delivered to the implementer's pane and
    /// the bubble moved WAITING_HUMAN -> RUNNING.
    DeferredIntentApplied { round: u32 },
    /// A queued rework intent exists but multiplexer delivery failed; the
    /// bubble is left WAITING_HUMAN unchanged.
    DeferredIntentDeliveryFailed { cause: String },
    /// RUNNING and not yet expired: the last message was re-sent to the
    /// active agent's pane.
    StuckInputRetried,
    /// RUNNING and expired: escalated to the human via a HUMAN_QUESTION and
    /// moved to WAITING_HUMAN.
    ExpiryEscalated,
    /// Nothing to do this tick.
    NoOp { reason_code: String },
}

/// Applies the §4.5 priority actions for a single bubble, one tick at a
/// time: (1) deferred-intent application, (2) stuck-input retry, (3) expiry
/// escalation. Only one action is taken per call.
pub async fn run_watchdog_once<C: Clock, S: SessionAdapter>(
    global: &GlobalPaths,
    clock: &C,
    ids: &impl IdSource,
    session_adapter: &S,
    repo_path: &Path,
    bubble_id: &str,
) -> Result<WatchdogAction, LifecycleError> {
    let paths = BubblePaths::new(repo_path, bubble_id);
    let mut config = load_config(&paths)?;
    let now_ms = clock.now_ms();
    backfill_instance_id(&paths, global, &mut config, ids, now_ms)?;

    let current = read_state_required(&paths)?;
    let bubble_id_typed = BubbleId::new(bubble_id);

    // Priority 1: a queued rework intent on a WAITING_HUMAN bubble is
    // applied as soon as the watchdog can deliver it, independent of the
    // timeout clock.
    if current.snapshot.state == BubbleState::WaitingHuman {
        if let Some(intent) = current.snapshot.pending_rework_intent.clone() {
            let session = registry::read(&paths.registry(), &bubble_id_typed)?;
            let delivered = match &session {
                Some(s) if !s.multiplexer_session_name.is_empty() => {
                    session_adapter.send_literal(&s.multiplexer_session_name, &intent.message).await.is_ok()
                        && session_adapter.send_enter(&s.multiplexer_session_name).await.is_ok()
                }
                _ => false,
            };

            if !delivered {
                return Ok(WatchdogAction::DeferredIntentDeliveryFailed {
                    cause: "no live multiplexer session to deliver the queued rework intent to".to_string(),
                });
            }

            let next_state = current.snapshot.apply_transition(BubbleState::Running, |s| {
                let mut applied = intent.clone();
                applied.status = ReworkIntentStatus::Applied;
                s.pending_rework_intent = None;
                s.rework_intent_history.push(applied);
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
                    expected_state: Some(BubbleState::WaitingHuman),
                },
                now_ms,
                None,
            )?;

            emit_metric(
                global,
                &config,
                EventType::ReworkIntentApplied,
                Some(next_state.round),
                "watchdog",
                now_ms,
            );

            return Ok(WatchdogAction::DeferredIntentApplied { round: next_state.round });
        }
    }

    let status = evaluate_watchdog(&current.snapshot, config.watchdog_timeout_minutes, now_ms);
    if !status.monitored {
        return Ok(WatchdogAction::NoOp {
            reason_code: "not_monitored".to_string(),
        });
    }

    // Priority 2: RUNNING and still within the timeout window — nudge the
    // active agent's pane with an extra Enter keystroke in case the last
    // one was dropped.
    if current.snapshot.state == BubbleState::Running && !status.expired {
        let session = registry::read(&paths.registry(), &bubble_id_typed)?;
        let Some(session) = session.filter(|s| !s.multiplexer_session_name.is_empty()) else {
            return Ok(WatchdogAction::NoOp {
                reason_code: "no_runtime_session".to_string(),
            });
        };
        if let Err(e) = session_adapter.send_enter(&session.multiplexer_session_name).await {
            tracing::warn!(error = %e, "watchdog retry keystroke failed; continuing");
        }

        let next_state = mutate_in_place(&current.snapshot, |s| {
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
            None,
        )?;
        return Ok(WatchdogAction::StuckInputRetried);
    }

    // Priority 3: RUNNING and expired — escalate to the human.
    if current.snapshot.state == BubbleState::Running && status.expired {
        let active_role = current.snapshot.active_role.unwrap_or(ActiveRole::Implementer);
        let sender = match active_role {
            ActiveRole::Implementer => Recipient::Implementer,
            ActiveRole::Reviewer => Recipient::Reviewer,
        };
        let (envelope, _sequence) = append_envelope(
            &paths,
            DraftEnvelope {
                bubble_id: bubble_id_typed.clone(),
                sender,
                recipient: Recipient::Human,
                envelope_type: EnvelopeType::HumanQuestion,
                round: current.snapshot.round,
                payload: Payload {
                    question: Some(format!(
                        "no activity for {} minutes; the active agent may be stuck",
                        config.watchdog_timeout_minutes
                    )),
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

        return Ok(WatchdogAction::ExpiryEscalated);
    }

    Ok(WatchdogAction::NoOp {
        reason_code: "no_action_applicable".to_string(),
    })
}

#[cfg(test)]
#[path = "watchdog_tests.rs"]
mod tests;
