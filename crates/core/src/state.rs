// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bubble state snapshot and the transition table (§3, §4.3).

use serde::{Deserialize, Serialize};

use crate::error::PairflowError;
use crate::id::{BubbleId, IntentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BubbleState {
    Created,
    PreparingWorkspace,
    Running,
    WaitingHuman,
    ReadyForApproval,
    ApprovedForCommit,
    Committed,
    Done,
    Failed,
    Cancelled,
}

impl BubbleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Allowed direct transitions, per the table in §4.3.
    fn allowed_targets(self) -> &'static [BubbleState] {
        use BubbleState::*;
        match self {
            Created => &[PreparingWorkspace, Cancelled],
            PreparingWorkspace => &[Running, Failed, Cancelled],
            Running => &[WaitingHuman, ReadyForApproval, Failed, Cancelled],
            WaitingHuman => &[Running, Failed, Cancelled],
            ReadyForApproval => &[Running, ApprovedForCommit, Failed, Cancelled],
            ApprovedForCommit => &[Committed, Failed, Cancelled],
            Committed => &[Done],
            Done | Failed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, target: BubbleState) -> bool {
        self.allowed_targets().contains(&target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveRole {
    Implementer,
    Reviewer,
}

impl ActiveRole {
    /// The `active_agent` short code (`impl`/`rev`) that always accompanies
    /// this role in a snapshot.
    pub fn short_code(self) -> &'static str {
        match self {
            Self::Implementer => "impl",
            Self::Reviewer => "rev",
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::Implementer => Self::Reviewer,
            Self::Reviewer => Self::Implementer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRoleEntry {
    pub round: u32,
    pub implementer: String,
    pub reviewer: String,
    pub switched_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReworkIntentStatus {
    Pending,
    Applied,
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReworkIntent {
    pub intent_id: IntentId,
    pub message: String,
    pub requested_by: String,
    pub requested_at: String,
    pub status: ReworkIntentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by_intent_id: Option<IntentId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub bubble_id: BubbleId,
    pub state: BubbleState,
    pub round: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_role: Option<ActiveRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_since: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_command_at: Option<String>,
    #[serde(default)]
    pub round_role_history: Vec<RoundRoleEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_rework_intent: Option<ReworkIntent>,
    #[serde(default)]
    pub rework_intent_history: Vec<ReworkIntent>,
}

impl StateSnapshot {
    pub fn new(bubble_id: BubbleId) -> Self {
        Self {
            bubble_id,
            state: BubbleState::Created,
            round: 0,
            active_agent: None,
            active_role: None,
            active_since: None,
            last_command_at: None,
            round_role_history: Vec::new(),
            pending_rework_intent: None,
            rework_intent_history: Vec::new(),
        }
    }

    pub fn set_active(&mut self, role: ActiveRole, since: String) {
        self.active_role = Some(role);
        self.active_agent = Some(role.short_code().to_string());
        self.active_since = Some(since);
    }

    pub fn clear_active(&mut self) {
        self.active_role = None;
        self.active_agent = None;
        self.active_since = None;
    }

    /// Validates the invariants in §3: RUNNING (and the downstream states
    /// that still track whoever was last active) carry a fully-populated
    /// active triple; at most one pending rework intent; intent ids unique
    /// across pending + history; rounds non-negative and 0 only before the
    /// bubble starts running.
    pub fn validate_invariants(&self) -> Result<(), PairflowError> {
        let active_required = matches!(
            self.state,
            BubbleState::Running
                | BubbleState::WaitingHuman
                | BubbleState::ReadyForApproval
                | BubbleState::ApprovedForCommit
                | BubbleState::Committed
                | BubbleState::Done
        );
        let active_present =
            self.active_agent.is_some() && self.active_role.is_some() && self.active_since.is_some();
        if active_required && !active_present {
            return Err(PairflowError::Validation(format!(
                "state {:?} requires active_agent, active_role, and active_since",
                self.state
            )));
        }
        if matches!(self.state, BubbleState::Created | BubbleState::PreparingWorkspace)
            && self.round != 0
        {
            return Err(PairflowError::Validation(
                "round must be 0 in CREATED/PREPARING_WORKSPACE".into(),
            ));
        }
        if let Some(intent) = &self.pending_rework_intent {
            if intent.status != ReworkIntentStatus::Pending {
                return Err(PairflowError::Validation(
                    "pending_rework_intent.status must be pending".into(),
                ));
            }
        }
        if self
            .rework_intent_history
            .iter()
            .any(|i| i.status == ReworkIntentStatus::Pending)
        {
            return Err(PairflowError::Validation(
                "rework_intent_history entries must not have status pending".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        let all_ids = self
            .pending_rework_intent
            .iter()
            .map(|i| &i.intent_id)
            .chain(self.rework_intent_history.iter().map(|i| &i.intent_id));
        for id in all_ids {
            if !seen.insert(id.as_str()) {
                return Err(PairflowError::Validation(format!(
                    "intent id {id} is not unique within the bubble"
                )));
            }
        }
        Ok(())
    }

    /// Validates `target` is a legal direct transition from the current
    /// state, applies it plus the supplied field mutation, and re-validates
    /// invariants on the result. The mutation closure is responsible for
    /// round/active_*/last_command_at/history bookkeeping; this function
    /// only enforces the edge is legal and the result is well-formed.
    pub fn apply_transition(
        &self,
        target: BubbleState,
        mutate: impl FnOnce(&mut StateSnapshot),
    ) -> Result<StateSnapshot, PairflowError> {
        if !self.state.can_transition_to(target) {
            return Err(PairflowError::Precondition(format!(
                "illegal transition {:?} -> {:?}",
                self.state, target
            )));
        }
        let mut next = self.clone();
        next.state = target;
        mutate(&mut next);
        next.validate_invariants()?;
        Ok(next)
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
