// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Static bubble configuration (`bubble.toml`). Created on `create`; mutated
//! only to backfill a missing instance identifier.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::PairflowError;
use crate::id::{BubbleId, BubbleInstanceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewArtifactType {
    Auto,
    Code,
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityMode {
    Standard,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalOverlayPolicy {
    /// The worktree may carry local, uncommitted overlay files that are
    /// never part of the committed change (e.g. scratch notes).
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationsPolicy {
    All,
    DesktopOnly,
    MultiplexerOnly,
    Silent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BubbleConfig {
    pub schema_version: u32,
    pub id: BubbleId,
    pub bubble_instance_id: Option<BubbleInstanceId>,
    pub repo_path: PathBuf,
    pub base_branch: String,
    pub bubble_branch: String,
    pub implementer: String,
    pub reviewer: String,
    pub test_command: String,
    pub typecheck_command: String,
    pub watchdog_timeout_minutes: u32,
    pub max_rounds: u32,
    pub commit_requires_approval: bool,
    pub quality_mode: QualityMode,
    pub review_artifact_type: ReviewArtifactType,
    pub local_overlay_policy: LocalOverlayPolicy,
    pub notifications_policy: NotificationsPolicy,
}

impl BubbleConfig {
    /// `^[a-z][a-z0-9_-]{2,63}$`
    pub fn validate_id(id: &str) -> Result<(), PairflowError> {
        let bytes = id.as_bytes();
        let len_ok = (3..=64).contains(&bytes.len());
        let first_ok = bytes
            .first()
            .is_some_and(|c| c.is_ascii_lowercase());
        let rest_ok = bytes[1.min(bytes.len())..]
            .iter()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == b'-' || *c == b'_');
        if len_ok && first_ok && rest_ok {
            Ok(())
        } else {
            Err(PairflowError::Validation(format!(
                "bubble id `{id}` must match ^[a-z][a-z0-9_-]{{2,63}}$"
            )))
        }
    }

    pub fn validate(&self) -> Result<(), PairflowError> {
        Self::validate_id(self.id.as_str())?;
        if self.base_branch.trim().is_empty() {
            return Err(PairflowError::Validation(
                "base_branch must be non-empty".into(),
            ));
        }
        if self.implementer == self.reviewer {
            return Err(PairflowError::Validation(
                "implementer and reviewer must be distinct agent assignments".into(),
            ));
        }
        if self.watchdog_timeout_minutes == 0 {
            return Err(PairflowError::Validation(
                "watchdog_timeout_minutes must be positive".into(),
            ));
        }
        if self.max_rounds == 0 {
            return Err(PairflowError::Validation(
                "max_rounds must be positive".into(),
            ));
        }
        if !self.repo_path.is_absolute() {
            return Err(PairflowError::Validation(
                "repo_path must be absolute".into(),
            ));
        }
        Ok(())
    }

    /// Heuristic inference of review-artifact type from task text, used by
    /// `create` when the config omits an explicit choice. Code signals
    /// (file extensions, "implement", "refactor", code fences) vs. document
    /// signals ("doc", "readme", "spec", "write up"); a tie resolves to
    /// `Auto` so the reviewer decides case-by-case.
    pub fn infer_review_artifact_type(task_text: &str) -> ReviewArtifactType {
        const CODE_SIGNALS: &[&str] = &[
            "```", "fn ", "def ", "implement", "refactor", "bug", "function", "class ", "test(s)",
            ".rs", ".py", ".ts", ".go",
        ];
        const DOC_SIGNALS: &[&str] = &[
            "readme", "write up", "document", "doc page", "spec", "changelog", "proposal",
        ];
        let lower = task_text.to_lowercase();
        let code_score = CODE_SIGNALS.iter().filter(|s| lower.contains(*s)).count();
        let doc_score = DOC_SIGNALS.iter().filter(|s| lower.contains(*s)).count();
        match code_score.cmp(&doc_score) {
            std::cmp::Ordering::Greater => ReviewArtifactType::Code,
            std::cmp::Ordering::Less => ReviewArtifactType::Document,
            std::cmp::Ordering::Equal => ReviewArtifactType::Auto,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
