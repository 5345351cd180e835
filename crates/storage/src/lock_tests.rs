use super::*;
use serial_test::serial;
use tempfile::tempdir;

#[test]
fn acquires_runs_and_releases() {
    let dir = tempdir().expect("tempdir");
    let lock_path = dir.path().join("b.lock");
    let result = with_lock(&lock_path, LockOptions::default(), 1000, || 42).expect("lock");
    assert_eq!(result, 42);
    assert!(!lock_path.exists(), "lock file must be removed after use");
}

#[test]
fn contended_lock_times_out() {
    let dir = tempdir().expect("tempdir");
    let lock_path = dir.path().join("b.lock");
    // Simulate a held lock by creating the file out-of-band.
    fs::write(&lock_path, br#"{"pid":999999999,"acquired_at_ms":0}"#).expect("write");

    let opts = LockOptions {
        timeout: Duration::from_millis(150),
        poll_interval: Duration::from_millis(20),
        stale_after: None,
    };
    let err = with_lock(&lock_path, opts, 1000, || ()).unwrap_err();
    assert!(matches!(err, LockError::Timeout { .. }));
}

#[test]
#[serial]
fn stale_lock_from_dead_pid_is_recovered() {
    reset_warning_dedup();
    let dir = tempdir().expect("tempdir");
    let lock_path = dir.path().join("b.lock");
    // A pid essentially guaranteed not to be alive.
    fs::write(
        &lock_path,
        serde_json::to_vec(&LockContent {
            pid: 999_999_998,
            acquired_at_ms: 0,
        })
        .expect("encode"),
    )
    .expect("write");

    let opts = LockOptions {
        timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(10),
        stale_after: Some(Duration::from_millis(1)),
    };
    let result = with_lock(&lock_path, opts, 10_000, || "recovered").expect("lock");
    assert_eq!(result, "recovered");
}

#[test]
#[serial]
fn misconfigured_threshold_is_clamped_not_fatal() {
    reset_warning_dedup();
    let dir = tempdir().expect("tempdir");
    let lock_path = dir.path().join("b.lock");
    let opts = LockOptions {
        timeout: Duration::from_millis(50),
        poll_interval: Duration::from_millis(10),
        stale_after: Some(Duration::from_secs(999)),
    };
    let result = with_lock(&lock_path, opts, 0, || "ok");
    assert!(result.is_ok());
}
