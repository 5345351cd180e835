// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-process file lock with polling acquisition and optional
//! stale-owner recovery (§4.1).
//!
//! Every bubble/registry/archive/shard lock here is acquired, used, and
//! released within one `with_lock` call rather than held for a process
//! lifetime, since operations are one-shot CLI invocations.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock timeout on {path}: waited {waited_ms}ms (budget {timeout_ms}ms)")]
    Timeout {
        path: PathBuf,
        waited_ms: u64,
        timeout_ms: u64,
    },

    #[error("io error on lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct LockContent {
    pid: u32,
    acquired_at_ms: i64,
}

/// Polling/stale-recovery configuration for one `with_lock` call.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// If `Some`, a lock older than this threshold whose owning pid is
    /// confirmed dead is removed and acquisition retried. `None` disables
    /// stale recovery (the default; the core is correct without it, only
    /// slower to recover from crashes, per §9).
    pub stale_after: Option<Duration>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            stale_after: None,
        }
    }
}

impl LockOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    /// Clamps `stale_after > timeout` down to `timeout`, matching
    /// "configuration misuse is clamped with a one-shot warning" (§4.1).
    fn clamped(mut self) -> Self {
        if let Some(stale) = self.stale_after {
            if stale > self.timeout {
                warn_once(&format!(
                    "stale_after ({stale:?}) exceeds timeout ({:?}); clamping",
                    self.timeout
                ));
                self.stale_after = Some(self.timeout);
            }
        }
        self
    }
}

static WARNED: Mutex<Option<HashSet<String>>> = Mutex::new(None);
const WARN_DEDUP_CAP: usize = 256;

/// Emits `tracing::warn!` for `message` at most once per process, using a
/// bounded, clearable dedup set (§9 "process-wide warning dedup").
fn warn_once(message: &str) {
    let mut guard = WARNED.lock();
    let set = guard.get_or_insert_with(HashSet::new);
    if set.len() >= WARN_DEDUP_CAP {
        set.clear();
    }
    if set.insert(message.to_string()) {
        tracing::warn!("{message}");
    }
}

/// Test-only hook so repeated test runs in one process don't silently
/// suppress a warning the test wants to observe.
#[cfg(any(test, feature = "test-support"))]
pub fn reset_warning_dedup() {
    *WARNED.lock() = None;
}

fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        std::process::Command::new("ps")
            .args(["-p", &pid.to_string()])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(true) // assume alive if we can't tell; never delete a live lock
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

/// Attempts to remove a lock file that looks abandoned. Re-reads the file
/// immediately before removal and only proceeds if its content still
/// matches what was observed (minimises, but does not eliminate, the race
/// documented in §9).
fn try_recover_stale(path: &Path, stale_after: Duration, now_ms: i64) -> bool {
    let Ok(bytes) = fs::read(path) else {
        return false;
    };
    let Ok(content) = serde_json::from_slice::<LockContent>(&bytes) else {
        return false;
    };
    let age_ms = now_ms.saturating_sub(content.acquired_at_ms);
    if age_ms < stale_after.as_millis() as i64 {
        return false;
    }
    if is_pid_alive(content.pid) {
        return false;
    }
    // Re-validate identity right before removal.
    let Ok(recheck) = fs::read(path) else {
        return false;
    };
    if recheck != bytes {
        return false;
    }
    fs::remove_file(path).is_ok()
}

/// Acquires an exclusive lock at `lock_path`, runs `task`, and releases the
/// lock (by removing the file) regardless of `task`'s outcome.
pub fn with_lock<T>(
    lock_path: &Path,
    options: LockOptions,
    now_ms: i64,
    task: impl FnOnce() -> T,
) -> Result<T, LockError> {
    let options = options.clamped();
    let start = Instant::now();
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent).map_err(|source| LockError::Io {
            path: lock_path.to_path_buf(),
            source,
        })?;
    }

    loop {
        let content = LockContent {
            pid: std::process::id(),
            acquired_at_ms: now_ms,
        };
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if let Some(stale_after) = options.stale_after {
                    if try_recover_stale(lock_path, stale_after, now_ms) {
                        continue;
                    }
                }
                if start.elapsed() >= options.timeout {
                    return Err(LockError::Timeout {
                        path: lock_path.to_path_buf(),
                        waited_ms: start.elapsed().as_millis() as u64,
                        timeout_ms: options.timeout.as_millis() as u64,
                    });
                }
                std::thread::sleep(options.poll_interval.min(options.timeout));
                continue;
            }
            Err(source) => {
                return Err(LockError::Io {
                    path: lock_path.to_path_buf(),
                    source,
                })
            }
        };

        let payload = serde_json::to_vec(&content).unwrap_or_default();
        if file.write_all(&payload).is_err() {
            let _ = fs::remove_file(lock_path);
        }

        let result = task();
        let _ = fs::remove_file(lock_path);
        return Ok(result);
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
