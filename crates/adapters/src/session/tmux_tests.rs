// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

static TEST_PREFIX: LazyLock<String> = LazyLock::new(|| {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    format!("t{:04x}", nanos & 0xFFFF)
});

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_name(suffix: &str) -> String {
    let id = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}-{}", *TEST_PREFIX, suffix, id)
}

fn tmux_available() -> bool {
    std::process::Command::new("tmux")
        .arg("-V")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

macro_rules! fail_if_no_tmux {
    () => {
        if !tmux_available() {
            panic!("tmux is required but not available");
        }
    };
}

#[tokio::test]
#[serial(tmux)]
async fn spawn_creates_session_and_returns_id() {
    fail_if_no_tmux!();
    let adapter = TmuxAdapter::new();
    let name = unique_name("spawn");

    let id = adapter
        .spawn(&name, Path::new("/tmp"), "sleep 60", &[])
        .await
        .unwrap();

    assert_eq!(id, format!("pairflow-{}", name));
    let _ = adapter.kill(&id).await;
}

#[tokio::test]
#[serial(tmux)]
async fn spawn_replaces_existing_session() {
    fail_if_no_tmux!();
    let adapter = TmuxAdapter::new();
    let name = unique_name("replace");

    let id1 = adapter
        .spawn(&name, Path::new("/tmp"), "sleep 60", &[])
        .await
        .unwrap();
    let id2 = adapter
        .spawn(&name, Path::new("/tmp"), "sleep 60", &[])
        .await
        .unwrap();

    assert_eq!(id1, id2);
    assert!(adapter.is_alive(&id2).await.unwrap());
    let _ = adapter.kill(&id2).await;
}

#[tokio::test]
#[serial(tmux)]
async fn send_sends_keys_to_session() {
    fail_if_no_tmux!();
    let adapter = TmuxAdapter::new();
    let name = unique_name("send");

    let id = adapter
        .spawn(&name, Path::new("/tmp"), "cat", &[])
        .await
        .unwrap();
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    adapter.send_literal(&id, "hello").await.unwrap();
    adapter.send_enter(&id).await.unwrap();
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    let output = adapter.capture_output(&id, 10).await.unwrap();
    assert!(output.contains("hello"));
    let _ = adapter.kill(&id).await;
}

#[tokio::test]
#[serial(tmux)]
async fn send_to_nonexistent_session_returns_not_found() {
    fail_if_no_tmux!();
    let adapter = TmuxAdapter::new();
    let result = adapter.send("nonexistent-session-xyz", "test").await;
    assert!(matches!(result, Err(SessionError::NotFound(_))));
}

#[tokio::test]
#[serial(tmux)]
async fn kill_terminates_session() {
    fail_if_no_tmux!();
    let adapter = TmuxAdapter::new();
    let name = unique_name("kill");

    let id = adapter
        .spawn(&name, Path::new("/tmp"), "sleep 60", &[])
        .await
        .unwrap();
    assert!(adapter.is_alive(&id).await.unwrap());

    adapter.kill(&id).await.unwrap();
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    assert!(!adapter.is_alive(&id).await.unwrap());
}

#[tokio::test]
#[serial(tmux)]
async fn kill_nonexistent_session_succeeds() {
    fail_if_no_tmux!();
    let adapter = TmuxAdapter::new();
    let result = adapter.kill("nonexistent-session-xyz").await;
    assert!(result.is_ok());
}

#[tokio::test]
#[serial(tmux)]
async fn is_process_running_detects_direct_pane_process() {
    fail_if_no_tmux!();
    let adapter = TmuxAdapter::new();
    let name = unique_name("directproc");

    let id = adapter
        .spawn(&name, Path::new("/tmp"), "sleep 60", &[])
        .await
        .unwrap();
    tokio::time::sleep(tokio::time::Duration::from_millis(300)).await;

    let running = adapter.is_process_running(&id, "sleep").await.unwrap();
    assert!(running, "should detect process running as the pane itself");
    let _ = adapter.kill(&id).await;
}

#[tokio::test]
#[serial(tmux)]
async fn is_process_running_nonexistent_session_returns_not_found() {
    fail_if_no_tmux!();
    let adapter = TmuxAdapter::new();
    let result = adapter
        .is_process_running("nonexistent-session-xyz", "sleep")
        .await;
    assert!(matches!(result, Err(SessionError::NotFound(_))));
}

#[tokio::test]
#[serial(tmux)]
async fn spawn_rejects_nonexistent_cwd() {
    fail_if_no_tmux!();
    let adapter = TmuxAdapter::new();
    let name = unique_name("badcwd");

    let result = adapter
        .spawn(&name, Path::new("/nonexistent/path"), "sleep 1", &[])
        .await;

    assert!(matches!(result, Err(SessionError::SpawnFailed(_))));
    let err = result.unwrap_err();
    assert!(err.to_string().contains("working directory does not exist"));
}

#[test]
fn tmux_adapter_is_zero_sized() {
    let adapter = TmuxAdapter;
    assert!(std::mem::size_of_val(&adapter) == 0);
}

#[tokio::test]
#[serial(tmux)]
async fn spawn_fails_when_tmux_unavailable() {
    use std::env;

    let original_path = env::var("PATH").unwrap_or_default();
    env::set_var("PATH", "/nonexistent");

    let adapter = TmuxAdapter::new();
    let result = adapter
        .spawn("test-no-tmux", Path::new("/tmp"), "sleep 1", &[])
        .await;

    env::set_var("PATH", &original_path);
    assert!(matches!(result, Err(SessionError::SpawnFailed(_))));
}

#[tokio::test]
#[serial(tmux)]
async fn is_alive_fails_when_tmux_unavailable() {
    use std::env;

    let original_path = env::var("PATH").unwrap_or_default();
    env::set_var("PATH", "/nonexistent");

    let adapter = TmuxAdapter::new();
    let result = adapter.is_alive("any-session").await;

    env::set_var("PATH", &original_path);
    assert!(matches!(result, Err(SessionError::CommandFailed(_))));
}
