// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime session registry (§4.7): one file per repository, keyed by
//! bubble id, serialised by a single lock on the registry path.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use pf_core::BubbleId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lock::{with_lock, LockError, LockOptions};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Lock(#[from] LockError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSession {
    pub bubble_id: BubbleId,
    pub repo_path: String,
    pub worktree_path: String,
    pub multiplexer_session_name: String,
    pub updated_at: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    sessions: BTreeMap<String, RuntimeSession>,
}

fn load(path: &Path) -> Result<RegistryFile, RegistryError> {
    match fs::read(path) {
        Ok(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(&bytes)?),
        Ok(_) => Ok(RegistryFile::default()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryFile::default()),
        Err(e) => Err(e.into()),
    }
}

fn save(path: &Path, file: &RegistryFile) -> Result<(), RegistryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut bytes = serde_json::to_vec_pretty(file)?;
    bytes.push(b'\n');
    let tmp = path.with_extension("json.tmp");
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
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read(registry_path: &Path, bubble_id: &BubbleId) -> Result<Option<RuntimeSession>, RegistryError> {
    Ok(load(registry_path)?.sessions.remove(bubble_id.as_str()))
}

pub fn upsert(
    registry_path: &Path,
    lock_path: &Path,
    session: RuntimeSession,
    lock_options: LockOptions,
    now_ms: i64,
) -> Result<(), RegistryError> {
    let registry_path = registry_path.to_path_buf();
    let result: Result<Result<(), RegistryError>, LockError> =
        with_lock(lock_path, lock_options, now_ms, move || {
            let mut file = load(&registry_path)?;
            file.sessions
                .insert(session.bubble_id.to_string(), session);
            save(&registry_path, &file)
        });
    result?
}

/// Create-if-absent claim. Returns `(record, won)`: `won` is true iff this
/// call created the entry; the record returned is always the final owner's,
/// so a losing caller can see who actually holds the bubble.
pub fn claim(
    registry_path: &Path,
    lock_path: &Path,
    candidate: RuntimeSession,
    lock_options: LockOptions,
    now_ms: i64,
) -> Result<(RuntimeSession, bool), RegistryError> {
    let registry_path = registry_path.to_path_buf();
    let result: Result<Result<(RuntimeSession, bool), RegistryError>, LockError> =
        with_lock(lock_path, lock_options, now_ms, move || {
            let mut file = load(&registry_path)?;
            let key = candidate.bubble_id.to_string();
            if let Some(existing) = file.sessions.get(&key) {
                return Ok((existing.clone(), false));
            }
            file.sessions.insert(key, candidate.clone());
            save(&registry_path, &file)?;
            Ok((candidate, true))
        });
    result?
}

/// Returns `true` if an entry was removed, `false` if it was already absent
/// (a no-op, per the idempotence law in §8).
pub fn remove(
    registry_path: &Path,
    lock_path: &Path,
    bubble_id: &BubbleId,
    lock_options: LockOptions,
    now_ms: i64,
) -> Result<bool, RegistryError> {
    let registry_path = registry_path.to_path_buf();
    let bubble_id = bubble_id.clone();
    let result: Result<Result<bool, RegistryError>, LockError> =
        with_lock(lock_path, lock_options, now_ms, move || {
            let mut file = load(&registry_path)?;
            let removed = file.sessions.remove(bubble_id.as_str()).is_some();
            if removed {
                save(&registry_path, &file)?;
            }
            Ok(removed)
        });
    result?
}

pub fn remove_many(
    registry_path: &Path,
    lock_path: &Path,
    bubble_ids: &[BubbleId],
    lock_options: LockOptions,
    now_ms: i64,
) -> Result<usize, RegistryError> {
    let registry_path = registry_path.to_path_buf();
    let ids: Vec<String> = bubble_ids.iter().map(|b| b.to_string()).collect();
    let result: Result<Result<usize, RegistryError>, LockError> =
        with_lock(lock_path, lock_options, now_ms, move || {
            let mut file = load(&registry_path)?;
            let mut removed = 0;
            for id in &ids {
                if file.sessions.remove(id).is_some() {
                    removed += 1;
                }
            }
            if removed > 0 {
                save(&registry_path, &file)?;
            }
            Ok(removed)
        });
    result?
}

/// Removes every entry for which `is_alive` returns false. `is_alive` is
/// injected so the registry never embeds multiplexer-probing logic
/// directly (§9 "external commands are dependency-injectable").
pub fn reconcile(
    registry_path: &Path,
    lock_path: &Path,
    lock_options: LockOptions,
    now_ms: i64,
    mut is_alive: impl FnMut(&RuntimeSession) -> bool,
) -> Result<Vec<BubbleId>, RegistryError> {
    let registry_path = registry_path.to_path_buf();
    let mut file = load(&registry_path)?;
    let mut dead = Vec::new();
    file.sessions.retain(|_, session| {
        if is_alive(session) {
            true
        } else {
            dead.push(session.bubble_id.clone());
            false
        }
    });
    if !dead.is_empty() {
        let dead_ids = dead.clone();
        let result: Result<Result<(), RegistryError>, LockError> =
            with_lock(lock_path, lock_options, now_ms, move || {
                let mut file = load(&registry_path)?;
                for id in &dead_ids {
                    file.sessions.remove(id.as_str());
                }
                save(&registry_path, &file)
            });
        result??;
    }
    Ok(dead)
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
