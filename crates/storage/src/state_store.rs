// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State store (§4.3): fingerprint-guarded, atomically-written state
//! snapshot file, using a write-to-temp-then-rename idiom.

use std::fs;
use std::path::Path;

use pf_core::fingerprint::Fingerprint;
use pf_core::state::{BubbleState, StateSnapshot};
use thiserror::Error;

use crate::lock::{with_lock, LockError, LockOptions};

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("conflict: fingerprint mismatch for {bubble_id}")]
    FingerprintMismatch { bubble_id: String },

    #[error("conflict: expected state {expected:?}, found {found:?}")]
    StateMismatch {
        expected: BubbleState,
        found: BubbleState,
    },

    #[error("invalid snapshot: {0}")]
    Invalid(#[from] pf_core::PairflowError),
}

#[derive(Debug, Clone)]
pub struct Read {
    pub snapshot: StateSnapshot,
    pub fingerprint: Fingerprint,
}

/// `read` is not part of `§4.1`'s lock contract: it is safe to read the
/// snapshot without holding the bubble lock, because `write` below verifies
/// the fingerprint observed here under the lock before committing.
pub fn read(path: &Path) -> Result<Option<Read>, StateStoreError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let snapshot: StateSnapshot = serde_json::from_slice(&bytes)?;
    let fingerprint = Fingerprint::of_bytes(&bytes);
    Ok(Some(Read {
        snapshot,
        fingerprint,
    }))
}

#[derive(Debug, Clone, Default)]
pub struct WriteGuard {
    pub expected_fingerprint: Option<Fingerprint>,
    pub expected_state: Option<BubbleState>,
}

/// Writes `new_state` under `lock_path`, verifying (if set) that the
/// currently-persisted snapshot matches `guard.expected_fingerprint` and
/// `guard.expected_state` before replacing the file via write-to-temp +
/// rename. Returns the new fingerprint.
pub fn write(
    path: &Path,
    lock_path: &Path,
    new_state: &StateSnapshot,
    guard: WriteGuard,
    lock_options: LockOptions,
    now_ms: i64,
) -> Result<Fingerprint, StateStoreError> {
    new_state.validate_invariants()?;
    let path = path.to_path_buf();
    let new_state = new_state.clone();
    let result: Result<Result<Fingerprint, StateStoreError>, LockError> =
        with_lock(lock_path, lock_options, now_ms, move || {
            write_locked(&path, &new_state, guard)
        });
    result?
}

fn write_locked(
    path: &Path,
    new_state: &StateSnapshot,
    guard: WriteGuard,
) -> Result<Fingerprint, StateStoreError> {
    let current = read(path)?;
    if let Some(expected_fp) = &guard.expected_fingerprint {
        let matches = current
            .as_ref()
            .map(|c| &c.fingerprint == expected_fp)
            .unwrap_or(false);
        if !matches {
            return Err(StateStoreError::FingerprintMismatch {
                bubble_id: new_state.bubble_id.to_string(),
            });
        }
    }
    if let Some(expected_state) = guard.expected_state {
        let found = current.as_ref().map(|c| c.snapshot.state);
        if found != Some(expected_state) {
            return Err(StateStoreError::StateMismatch {
                expected: expected_state,
                found: found.unwrap_or(BubbleState::Created),
            });
        }
    }

    let mut bytes = serde_json::to_vec_pretty(new_state)?;
    bytes.push(b'\n');
    let tmp = path.with_extension("json.tmp");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
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
    Ok(Fingerprint::of_bytes(&bytes))
}

#[cfg(test)]
#[path = "state_store_tests.rs"]
mod tests;
