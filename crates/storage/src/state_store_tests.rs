use super::*;
use pf_core::{BubbleId, StateSnapshot};
use tempfile::tempdir;

#[test]
fn read_on_missing_file_returns_none() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("state.json");
    assert!(read(&path).expect("read").is_none());
}

#[test]
fn write_then_read_round_trips() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("state.json");
    let lock = dir.path().join("b.lock");
    let snapshot = StateSnapshot::new(BubbleId::new("fix-login-bug"));

    write(&path, &lock, &snapshot, WriteGuard::default(), LockOptions::default(), 0)
        .expect("write");
    let back = read(&path).expect("read").expect("present");
    assert_eq!(back.snapshot.bubble_id, snapshot.bubble_id);
}

#[test]
fn fingerprint_mismatch_is_a_conflict() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("state.json");
    let lock = dir.path().join("b.lock");
    let snapshot = StateSnapshot::new(BubbleId::new("fix-login-bug"));
    write(&path, &lock, &snapshot, WriteGuard::default(), LockOptions::default(), 0)
        .expect("write");

    let bogus_fp = Fingerprint::of_str("not-the-real-fingerprint");
    let guard = WriteGuard {
        expected_fingerprint: Some(bogus_fp),
        expected_state: None,
    };
    let err = write(&path, &lock, &snapshot, guard, LockOptions::default(), 0).unwrap_err();
    assert!(matches!(err, StateStoreError::FingerprintMismatch { .. }));
}

#[test]
fn expected_state_mismatch_is_a_conflict() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("state.json");
    let lock = dir.path().join("b.lock");
    let snapshot = StateSnapshot::new(BubbleId::new("fix-login-bug"));
    write(&path, &lock, &snapshot, WriteGuard::default(), LockOptions::default(), 0)
        .expect("write");

    let guard = WriteGuard {
        expected_fingerprint: None,
        expected_state: Some(BubbleState::Running),
    };
    let err = write(&path, &lock, &snapshot, guard, LockOptions::default(), 0).unwrap_err();
    assert!(matches!(err, StateStoreError::StateMismatch { .. }));
}
