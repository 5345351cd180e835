// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared by every crate above `pf-core`.
//!
//! One enum, one variant per kind named in the error handling design, so the
//! CLI layer has a single place to pattern-match when choosing an exit
//! code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PairflowError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("lock timeout on {path}: waited {waited_ms}ms (budget {timeout_ms}ms)")]
    LockTimeout {
        path: String,
        waited_ms: u64,
        timeout_ms: u64,
    },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("external command `{command}` failed (exit {exit_code:?}): {stderr_tail}")]
    ExternalCommand {
        command: String,
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    #[error(
        "transcript appended ({envelope_id}) but state write failed: transcript remains \
         canonical; recover state from transcript tail. cause: {cause}"
    )]
    Recovery { envelope_id: String, cause: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl PairflowError {
    /// Exit code per §6/§7: 0 success, 1 error, 2 confirmation required.
    /// `bubble delete` without `--force` is the only caller that produces 2
    /// directly (it never constructs a `PairflowError` for that path); this
    /// mapping covers the remaining taxonomy.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_message_includes_path_and_budget() {
        let err = PairflowError::LockTimeout {
            path: "/tmp/x.lock".into(),
            waited_ms: 5000,
            timeout_ms: 5000,
        };
        let msg = err.to_string();
        assert!(msg.contains("/tmp/x.lock"));
        assert!(msg.contains("5000"));
    }
}
