// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol envelope: the append-only unit of the transcript (§3, §4.2).

use serde::{Deserialize, Serialize};

use crate::error::PairflowError;
use crate::id::{BubbleId, EnvelopeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Implementer,
    Reviewer,
    Orchestrator,
    Human,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeType {
    Task,
    Pass,
    HumanQuestion,
    HumanReply,
    Convergence,
    ApprovalRequest,
    ApprovalDecision,
    DonePackage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    P0,
    P1,
    P2,
    P3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassIntent {
    Task,
    Review,
    FixRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Revise,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refs: Vec<String>,
}

/// Restricted field set; unknown keys are rejected by `deny_unknown_fields`
/// so a malformed payload fails validation instead of silently dropping
/// data (§6 "unknown payload keys ... are rejected").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_intent: Option<PassIntent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EnvelopeId,
    pub ts: String,
    pub bubble_id: BubbleId,
    pub sender: Recipient,
    pub recipient: Recipient,
    #[serde(rename = "type")]
    pub envelope_type: EnvelopeType,
    pub round: u32,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refs: Vec<String>,
}

/// `msg_<YYYYMMDD>_<NNN...>`, zero-padded to at least 3 digits, widening
/// without truncation once the per-transcript sequence reaches 1000.
pub fn format_envelope_id(date_utc: &str, sequence: u64) -> EnvelopeId {
    EnvelopeId::new(format!("msg_{date_utc}_{sequence:03}"))
}

impl Envelope {
    /// Per-type payload requirements and overall shape, per §3/§6. Does not
    /// check `refs` containment (worktree-relative safety is the review
    /// evidence classifier's job, §4.6) or sender/recipient role legality
    /// against bubble state (the lifecycle operation's job).
    pub fn validate(&self) -> Result<(), PairflowError> {
        if self.id.as_str().is_empty() {
            return Err(PairflowError::Validation("envelope id must be non-empty".into()));
        }
        if self.ts.trim().is_empty() {
            return Err(PairflowError::Validation("envelope ts must be non-empty".into()));
        }
        if self.bubble_id.as_str().is_empty() {
            return Err(PairflowError::Validation("bubble_id must be non-empty".into()));
        }
        if self.refs.iter().any(|r| r.trim().is_empty()) {
            return Err(PairflowError::Validation("refs entries must be non-empty".into()));
        }
        match self.envelope_type {
            EnvelopeType::Pass | EnvelopeType::Convergence => {
                require_non_empty(&self.payload.summary, "payload.summary", &self.envelope_type)?;
            }
            EnvelopeType::HumanQuestion => {
                require_non_empty(&self.payload.question, "payload.question", &self.envelope_type)?;
            }
            EnvelopeType::HumanReply => {
                require_non_empty(&self.payload.message, "payload.message", &self.envelope_type)?;
            }
            EnvelopeType::ApprovalDecision => {
                if self.payload.decision.is_none() {
                    return Err(PairflowError::Validation(
                        "payload.decision: APPROVAL_DECISION payload requires decision".into(),
                    ));
                }
            }
            EnvelopeType::Task | EnvelopeType::ApprovalRequest | EnvelopeType::DonePackage => {}
        }
        Ok(())
    }
}

fn require_non_empty(
    field: &Option<String>,
    field_path: &str,
    envelope_type: &EnvelopeType,
) -> Result<(), PairflowError> {
    let ok = field.as_deref().is_some_and(|s| !s.trim().is_empty());
    if ok {
        Ok(())
    } else {
        Err(PairflowError::Validation(format!(
            "{field_path}: {envelope_type:?} payload requires non-empty {}",
            field_path.trim_start_matches("payload.")
        )))
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
