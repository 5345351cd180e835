use super::*;

use pf_adapters::{FakeGitAdapter, FakeSessionAdapter};
use pf_core::clock::FakeClock;
use pf_core::config::{LocalOverlayPolicy, NotificationsPolicy, QualityMode};
use pf_core::idgen::SequentialIdSource;
use pf_core::state::ReworkIntent;
use pf_storage::state_store;
use tempfile::TempDir;

use crate::ops::{create, start, CreateInput};

struct Harness {
    _dir: TempDir,
    repo_path: std::path::PathBuf,
    global: GlobalPaths,
    ids: SequentialIdSource,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let repo_path = dir.path().join("repo");
        std::fs::create_dir_all(&repo_path).expect("create repo dir");
        let global = GlobalPaths {
            archive_root: dir.path().join("archive"),
            metrics_root: dir.path().join("metrics"),
            global_lock_root: dir.path().join("locks"),
        };
        Harness {
            _dir: dir,
            repo_path,
            global,
            ids: SequentialIdSource::new("id"),
        }
    }

    fn create_input(&self, bubble_id: &str, watchdog_timeout_minutes: u32) -> CreateInput {
        CreateInput {
            repo_path: self.repo_path.clone(),
            bubble_id: bubble_id.to_string(),
            base_branch: "main".to_string(),
            bubble_branch: format!("bubble/{bubble_id}"),
            task_text: "fix the login bug".to_string(),
            implementer: "agent-a".to_string(),
            reviewer: "agent-b".to_string(),
            test_command: "cargo test".to_string(),
            typecheck_command: "cargo check".to_string(),
            watchdog_timeout_minutes,
            max_rounds: 10,
            commit_requires_approval: true,
            quality_mode: QualityMode::Standard,
            review_artifact_type: None,
            local_overlay_policy: LocalOverlayPolicy::Deny,
            notifications_policy: NotificationsPolicy::Silent,
        }
    }

    async fn started(&self, bubble_id: &str, watchdog_timeout_minutes: u32, clock: &FakeClock) -> (FakeSessionAdapter, FakeGitAdapter) {
        create(&self.global, clock, &self.ids, self.create_input(bubble_id, watchdog_timeout_minutes)).unwrap();
        let session = FakeSessionAdapter::new();
        let git = FakeGitAdapter::new();
        start(&self.global, clock, &self.ids, &session, &git, &self.repo_path, bubble_id)
            .await
            .unwrap();
        (session, git)
    }
}

fn running_snapshot(timeout_min: u32, last_activity_ms: i64) -> StateSnapshot {
    let mut s = StateSnapshot::new(BubbleId::new("fix-login-bug"));
    s.state = BubbleState::Running;
    s.round = 1;
    s.set_active(ActiveRole::Implementer, now_iso(last_activity_ms));
    s.last_command_at = Some(now_iso(last_activity_ms));
    let _ = timeout_min;
    s
}

#[test]
fn a_created_bubble_is_not_monitored() {
    let s = StateSnapshot::new(BubbleId::new("fix-login-bug"));
    let status = evaluate_watchdog(&s, 30, 1_700_000_000_000);
    assert!(!status.monitored);
}

#[test]
fn a_running_bubble_well_within_timeout_is_not_expired() {
    let now_ms = 1_700_000_000_000;
    let snapshot = running_snapshot(30, now_ms - 60_000);
    let status = evaluate_watchdog(&snapshot, 30, now_ms);
    assert!(status.monitored);
    assert!(!status.expired);
    assert!(status.remaining_seconds > 0);
}

#[test]
fn a_running_bubble_past_timeout_is_expired() {
    let now_ms = 1_700_000_000_000;
    let snapshot = running_snapshot(30, now_ms - 31 * 60_000);
    let status = evaluate_watchdog(&snapshot, 30, now_ms);
    assert!(status.monitored);
    assert!(status.expired);
    assert!(status.remaining_seconds <= 0);
}

#[test]
fn waiting_human_without_an_active_agent_is_not_monitored() {
    let mut s = StateSnapshot::new(BubbleId::new("fix-login-bug"));
    s.state = BubbleState::WaitingHuman;
    let status = evaluate_watchdog(&s, 30, 1_700_000_000_000);
    assert!(!status.monitored);
}

#[tokio::test]
async fn run_once_retries_a_stuck_pane_while_still_within_the_timeout() {
    let h = Harness::new();
    let clock = FakeClock::new(1_700_000_000_000);
    let (session, _git) = h.started("fix-login-bug", 30, &clock).await;

    let action = run_watchdog_once(&h.global, &clock, &h.ids, &session, &h.repo_path, "fix-login-bug")
        .await
        .unwrap();
    assert!(matches!(action, WatchdogAction::StuckInputRetried));
}

#[tokio::test]
async fn run_once_escalates_to_the_human_once_the_timeout_has_elapsed() {
    let h = Harness::new();
    let clock = FakeClock::new(1_700_000_000_000);
    let (session, _git) = h.started("fix-login-bug", 5, &clock).await;

    clock.advance(6 * 60_000);
    let action = run_watchdog_once(&h.global, &clock, &h.ids, &session, &h.repo_path, "fix-login-bug")
        .await
        .unwrap();
    assert!(matches!(action, WatchdogAction::ExpiryEscalated));

    let paths = BubblePaths::new(&h.repo_path, "fix-login-bug");
    let after = state_store::read(&paths.state()).unwrap().expect("state exists");
    assert_eq!(after.snapshot.state, BubbleState::WaitingHuman);
}

#[tokio::test]
async fn run_once_applies_a_queued_rework_intent_once_delivery_succeeds() {
    let h = Harness::new();
    let clock = FakeClock::new(1_700_000_000_000);
    let (session, _git) = h.started("fix-login-bug", 30, &clock).await;

    let paths = BubblePaths::new(&h.repo_path, "fix-login-bug");
    let current = state_store::read(&paths.state()).unwrap().expect("state exists");
    let waiting = current.snapshot.apply_transition(BubbleState::WaitingHuman, |s| {
        s.pending_rework_intent = Some(ReworkIntent {
            intent_id: pf_core::id::IntentId::new("intent-1"),
            message: "please simplify the error handling".to_string(),
            requested_by: "human".to_string(),
            requested_at: now_iso(clock.now_ms()),
            status: pf_core::state::ReworkIntentStatus::Pending,
            superseded_by_intent_id: None,
        });
    }).unwrap();
    state_store::write(
        &paths.state(),
        &paths.lock(),
        &waiting,
        state_store::WriteGuard {
            expected_fingerprint: Some(current.fingerprint),
            expected_state: Some(BubbleState::Running),
        },
        pf_storage::lock::LockOptions::default(),
        clock.now_ms(),
    )
    .unwrap();

    let action = run_watchdog_once(&h.global, &clock, &h.ids, &session, &h.repo_path, "fix-login-bug")
        .await
        .unwrap();
    assert!(matches!(action, WatchdogAction::DeferredIntentApplied { .. }));

    let after = state_store::read(&paths.state()).unwrap().expect("state exists");
    assert_eq!(after.snapshot.state, BubbleState::Running);
    assert!(after.snapshot.pending_rework_intent.is_none());
    assert_eq!(after.snapshot.rework_intent_history.len(), 1);
}

#[tokio::test]
async fn run_once_reports_delivery_failure_when_no_session_is_registered() {
    let h = Harness::new();
    let clock = FakeClock::new(1_700_000_000_000);
    let (session, _git) = h.started("fix-login-bug", 30, &clock).await;

    let paths = BubblePaths::new(&h.repo_path, "fix-login-bug");
    let current = state_store::read(&paths.state()).unwrap().expect("state exists");
    let waiting = current.snapshot.apply_transition(BubbleState::WaitingHuman, |s| {
        s.pending_rework_intent = Some(ReworkIntent {
            intent_id: pf_core::id::IntentId::new("intent-1"),
            message: "please simplify the error handling".to_string(),
            requested_by: "human".to_string(),
            requested_at: now_iso(clock.now_ms()),
            status: pf_core::state::ReworkIntentStatus::Pending,
            superseded_by_intent_id: None,
        });
    }).unwrap();
    state_store::write(
        &paths.state(),
        &paths.lock(),
        &waiting,
        state_store::WriteGuard {
            expected_fingerprint: Some(current.fingerprint),
            expected_state: Some(BubbleState::Running),
        },
        pf_storage::lock::LockOptions::default(),
        clock.now_ms(),
    )
    .unwrap();

    // Drop the runtime-session claim entirely so delivery has nowhere to go.
    registry::remove(
        &paths.registry(),
        &paths.registry_lock(),
        &BubbleId::new("fix-login-bug"),
        pf_storage::lock::LockOptions::default(),
        clock.now_ms(),
    )
    .unwrap();

    let action = run_watchdog_once(&h.global, &clock, &h.ids, &session, &h.repo_path, "fix-login-bug")
        .await
        .unwrap();
    assert!(matches!(action, WatchdogAction::DeferredIntentDeliveryFailed { .. }));

    let after = state_store::read(&paths.state()).unwrap().expect("state exists");
    assert_eq!(after.snapshot.state, BubbleState::WaitingHuman);
}
