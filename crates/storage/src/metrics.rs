// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Metrics NDJSON shard writer (§4.8): monthly shards under a per-shard
//! lock, append-only in the same spirit as the transcript store but with no
//! sequence numbers or validation beyond shape.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lock::{with_lock, LockError, LockOptions};

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Lock(#[from] LockError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BubbleCreated,
    BubblePassed,
    BubbleAskedHuman,
    BubbleConverged,
    BubbleReworkRequested,
    ReworkIntentQueued,
    ReworkIntentSuperseded,
    ReworkIntentApplied,
    BubbleApproved,
    BubbleDeleted,
    BubbleInstanceBackfilled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsEvent {
    pub schema_version: u32,
    pub ts: String,
    pub repo_path: String,
    pub bubble_instance_id: String,
    pub bubble_id: String,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    pub actor_role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

pub fn shard_path(metrics_root: &Path, year: u32, month: u32) -> PathBuf {
    metrics_root
        .join(format!("{year:04}"))
        .join(format!("{month:02}"))
        .join(format!("events-{year:04}-{month:02}.ndjson"))
}

/// Appends one metrics event to its monthly shard. Emission is best-effort
/// by convention of the caller (the lifecycle layer never propagates this
/// error as an operation failure, only logs it); this function still
/// surfaces the error so the caller can log a deduped warning.
pub fn emit(
    metrics_root: &Path,
    lock_root: &Path,
    event: &MetricsEvent,
    year: u32,
    month: u32,
    lock_options: LockOptions,
    now_ms: i64,
) -> Result<(), MetricsError> {
    let shard = shard_path(metrics_root, year, month);
    let lock_path = lock_root.join(format!("metrics-{year:04}-{month:02}.lock"));
    let mut line = serde_json::to_string(event)?;
    line.push('\n');

    let shard_for_task = shard.clone();
    let result: Result<Result<(), MetricsError>, LockError> =
        with_lock(&lock_path, lock_options, now_ms, move || {
            if let Some(parent) = shard_for_task.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut f = OpenOptions::new()
                .append(true)
                .create(true)
                .open(&shard_for_task)?;
            f.write_all(line.as_bytes())?;
            f.sync_all()?;
            Ok(())
        });
    result?
}

/// Reads every event in `shard` (used by metrics report consumers; the
/// report aggregation itself is out of scope, §1).
pub fn read_shard(shard: &Path) -> Result<Vec<MetricsEvent>, MetricsError> {
    let bytes = match std::fs::read(shard) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut events = Vec::new();
    for line in String::from_utf8_lossy(&bytes).lines() {
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str(line)?);
    }
    Ok(events)
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
