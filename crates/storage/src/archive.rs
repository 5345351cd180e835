// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Archive snapshot & index (§4.8): a temp+rename write idiom generalized
//! from a single state file to a whole directory copy.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lock::{with_lock, LockError, LockOptions};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("not found: no archive entry for instance {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStatus {
    Active,
    Deleted,
    Purged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub bubble_instance_id: String,
    pub bubble_id: String,
    pub repo_path: String,
    pub repo_key: String,
    pub archive_path: String,
    pub status: ArchiveStatus,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purged_at: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArchiveIndex {
    schema_version: u32,
    entries: Vec<ArchiveEntry>,
}

impl Default for ArchiveIndex {
    fn default() -> Self {
        Self {
            schema_version: 1,
            entries: Vec::new(),
        }
    }
}

fn repo_key(repo_path: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(repo_path.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// Copies `bubble_dir` into `<archive_root>/<repo_key>/<instance_id>/` via a
/// temp sibling directory plus atomic rename, so a reader never observes a
/// partially-written snapshot. Idempotent: re-running after a prior success
/// overwrites the temp dir and renames again.
pub fn snapshot_bubble_dir(
    archive_root: &Path,
    repo_path: &str,
    instance_id: &str,
    bubble_dir: &Path,
    manifest_json: &str,
) -> Result<PathBuf, ArchiveError> {
    let key = repo_key(repo_path);
    let dest_dir = archive_root.join(&key).join(instance_id);
    let tmp_dir = archive_root
        .join(&key)
        .join(format!(".tmp-{instance_id}-{}", std::process::id()));
    if let Some(parent) = tmp_dir.parent() {
        fs::create_dir_all(parent)?;
    }
    if tmp_dir.exists() {
        fs::remove_dir_all(&tmp_dir)?;
    }
    copy_dir_recursive(bubble_dir, &tmp_dir)?;
    fs::write(tmp_dir.join("archive-manifest.json"), manifest_json)?;

    if dest_dir.exists() {
        fs::remove_dir_all(&dest_dir)?;
    }
    fs::rename(&tmp_dir, &dest_dir)?;
    Ok(dest_dir)
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let dest_path = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dest_path)?;
        } else {
            fs::copy(entry.path(), &dest_path)?;
        }
    }
    Ok(())
}

fn load_index(index_path: &Path) -> Result<ArchiveIndex, ArchiveError> {
    match fs::read(index_path) {
        Ok(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(&bytes)?),
        Ok(_) => Ok(ArchiveIndex::default()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ArchiveIndex::default()),
        Err(e) => Err(e.into()),
    }
}

fn save_index(index_path: &Path, index: &ArchiveIndex) -> Result<(), ArchiveError> {
    if let Some(parent) = index_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut bytes = serde_json::to_vec_pretty(index)?;
    bytes.push(b'\n');
    let tmp = index_path.with_extension("json.tmp");
    {
        use std::io::Write as _;
        let mut f = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        f.write_all(&bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, index_path)?;
    Ok(())
}

/// Upserts `entry` into the index at `index_path` (keyed by
/// `bubble_instance_id`), serialised by `lock_path`.
pub fn upsert_index_entry(
    index_path: &Path,
    lock_path: &Path,
    entry: ArchiveEntry,
    lock_options: LockOptions,
    now_ms: i64,
) -> Result<(), ArchiveError> {
    let index_path = index_path.to_path_buf();
    let result: Result<Result<(), ArchiveError>, LockError> =
        with_lock(lock_path, lock_options, now_ms, move || {
            let mut index = load_index(&index_path)?;
            if let Some(existing) = index
                .entries
                .iter_mut()
                .find(|e| e.bubble_instance_id == entry.bubble_instance_id)
            {
                *existing = entry;
            } else {
                index.entries.push(entry);
            }
            save_index(&index_path, &index)
        });
    result?
}

pub fn set_status(
    index_path: &Path,
    lock_path: &Path,
    instance_id: &str,
    status: ArchiveStatus,
    timestamp: String,
    lock_options: LockOptions,
    now_ms: i64,
) -> Result<(), ArchiveError> {
    let index_path = index_path.to_path_buf();
    let instance_id = instance_id.to_string();
    let result: Result<Result<(), ArchiveError>, LockError> =
        with_lock(lock_path, lock_options, now_ms, move || {
            let mut index = load_index(&index_path)?;
            let entry = index
                .entries
                .iter_mut()
                .find(|e| e.bubble_instance_id == instance_id)
                .ok_or_else(|| ArchiveError::NotFound(instance_id.clone()))?;
            entry.status = status;
            entry.updated_at = timestamp.clone();
            match status {
                ArchiveStatus::Deleted => entry.deleted_at = Some(timestamp),
                ArchiveStatus::Purged => entry.purged_at = Some(timestamp),
                ArchiveStatus::Active => {}
            }
            save_index(&index_path, &index)
        });
    result??;
    Ok(())
}

pub fn find_entry(index_path: &Path, instance_id: &str) -> Result<Option<ArchiveEntry>, ArchiveError> {
    let index = load_index(index_path)?;
    Ok(index
        .entries
        .into_iter()
        .find(|e| e.bubble_instance_id == instance_id))
}

pub fn list_entries(index_path: &Path) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    Ok(load_index(index_path)?.entries)
}

#[cfg(test)]
#[path = "archive_tests.rs"]
mod tests;
