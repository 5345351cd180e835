use super::*;
use tempfile::tempdir;

fn sample_entry() -> ArchiveEntry {
    ArchiveEntry {
        bubble_instance_id: "inst-1".into(),
        bubble_id: "fix-login-bug".into(),
        repo_path: "/repo".into(),
        repo_key: repo_key("/repo"),
        archive_path: "/archive/x/inst-1".into(),
        status: ArchiveStatus::Active,
        created_at: "2026-01-01T00:00:00Z".into(),
        deleted_at: None,
        purged_at: None,
        updated_at: "2026-01-01T00:00:00Z".into(),
    }
}

#[test]
fn snapshot_bubble_dir_copies_contents_via_atomic_rename() {
    let dir = tempdir().expect("tempdir");
    let bubble_dir = dir.path().join("bubble");
    fs::create_dir_all(bubble_dir.join("artifacts")).expect("mkdir");
    fs::write(bubble_dir.join("state.json"), b"{}").expect("write");
    fs::write(bubble_dir.join("artifacts/task.md"), b"do the thing").expect("write");

    let archive_root = dir.path().join("archive");
    let dest = snapshot_bubble_dir(&archive_root, "/repo", "inst-1", &bubble_dir, "{}")
        .expect("snapshot");
    assert!(dest.join("state.json").exists());
    assert!(dest.join("artifacts/task.md").exists());
    assert!(dest.join("archive-manifest.json").exists());
}

#[test]
fn snapshot_is_idempotent_across_retries() {
    let dir = tempdir().expect("tempdir");
    let bubble_dir = dir.path().join("bubble");
    fs::create_dir_all(&bubble_dir).expect("mkdir");
    fs::write(bubble_dir.join("state.json"), b"{}").expect("write");

    let archive_root = dir.path().join("archive");
    let dest1 = snapshot_bubble_dir(&archive_root, "/repo", "inst-1", &bubble_dir, "{}")
        .expect("snapshot 1");
    let dest2 = snapshot_bubble_dir(&archive_root, "/repo", "inst-1", &bubble_dir, "{}")
        .expect("snapshot 2");
    assert_eq!(dest1, dest2);
    assert!(dest2.join("state.json").exists());
}

#[test]
fn upsert_then_set_status_round_trips() {
    let dir = tempdir().expect("tempdir");
    let index_path = dir.path().join("index.json");
    let lock = dir.path().join("archive.lock");

    upsert_index_entry(&index_path, &lock, sample_entry(), LockOptions::default(), 0)
        .expect("upsert");
    set_status(
        &index_path,
        &lock,
        "inst-1",
        ArchiveStatus::Deleted,
        "2026-01-02T00:00:00Z".into(),
        LockOptions::default(),
        0,
    )
    .expect("set status");

    let entry = find_entry(&index_path, "inst-1").expect("find").expect("present");
    assert_eq!(entry.status, ArchiveStatus::Deleted);
    assert_eq!(entry.deleted_at.as_deref(), Some("2026-01-02T00:00:00Z"));
}

#[test]
fn repeated_delete_converges_without_duplicate_entries() {
    let dir = tempdir().expect("tempdir");
    let index_path = dir.path().join("index.json");
    let lock = dir.path().join("archive.lock");

    for _ in 0..2 {
        upsert_index_entry(&index_path, &lock, sample_entry(), LockOptions::default(), 0)
            .expect("upsert");
    }
    let entries = list_entries(&index_path).expect("list");
    assert_eq!(entries.len(), 1);
}
