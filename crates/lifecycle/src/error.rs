// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The lifecycle-level error taxonomy (§7), wrapping the lower-level
//! storage/config/adapter errors into the same seven kinds spec'd for the
//! CLI layer's exit-code mapping.

use pf_adapters::{GitError, NotifyError, SessionError};
use pf_config::ConfigError;
use pf_core::PairflowError;
use pf_storage::{ArchiveError, LockError, MetricsError, RegistryError, StateStoreError, TranscriptError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("lock timeout: {path} (waited {waited_ms}ms, budget {timeout_ms}ms)")]
    LockTimeout {
        path: String,
        waited_ms: u64,
        timeout_ms: u64,
    },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("external command failed: {command} (exit {exit_code:?}): {stderr_tail}")]
    ExternalCommand {
        command: String,
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    #[error(
        "recovery: envelope {envelope_id} was appended but the state write failed ({cause}); \
         transcript remains canonical, recover state from the transcript tail"
    )]
    Recovery { envelope_id: String, cause: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PairflowError> for LifecycleError {
    fn from(e: PairflowError) -> Self {
        match e {
            PairflowError::Validation(m) => LifecycleError::Validation(m),
            PairflowError::Conflict(m) => LifecycleError::Conflict(m),
            PairflowError::LockTimeout {
                path,
                waited_ms,
                timeout_ms,
            } => LifecycleError::LockTimeout {
                path,
                waited_ms,
                timeout_ms,
            },
            PairflowError::Precondition(m) => LifecycleError::Precondition(m),
            PairflowError::NotFound(m) => LifecycleError::NotFound(m),
            PairflowError::ExternalCommand {
                command,
                exit_code,
                stderr_tail,
            } => LifecycleError::ExternalCommand {
                command,
                exit_code,
                stderr_tail,
            },
            PairflowError::Recovery { envelope_id, cause } => {
                LifecycleError::Recovery { envelope_id, cause }
            }
            PairflowError::Io(e) => LifecycleError::Io(e),
            PairflowError::Json(e) => LifecycleError::Validation(e.to_string()),
        }
    }
}

impl From<LockError> for LifecycleError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Timeout {
                path,
                waited_ms,
                timeout_ms,
            } => LifecycleError::LockTimeout {
                path: path.display().to_string(),
                waited_ms,
                timeout_ms,
            },
            LockError::Io { path, source } => {
                LifecycleError::Validation(format!("lock io error at {}: {source}", path.display()))
            }
        }
    }
}

impl From<TranscriptError> for LifecycleError {
    fn from(e: TranscriptError) -> Self {
        match e {
            TranscriptError::Lock(e) => e.into(),
            TranscriptError::Validation(m) => LifecycleError::Validation(m),
            TranscriptError::StrictAuditViolation { expected, found } => LifecycleError::Conflict(
                format!("sequence gap under strict audit: expected {expected}, found {found}"),
            ),
            other => LifecycleError::Validation(other.to_string()),
        }
    }
}

impl From<StateStoreError> for LifecycleError {
    fn from(e: StateStoreError) -> Self {
        match e {
            StateStoreError::Lock(e) => e.into(),
            StateStoreError::FingerprintMismatch { bubble_id } => {
                LifecycleError::Conflict(format!("state fingerprint mismatch for {bubble_id}"))
            }
            StateStoreError::StateMismatch { expected, found } => {
                LifecycleError::Conflict(format!("expected state {expected:?}, found {found:?}"))
            }
            StateStoreError::Invalid(e) => e.into(),
            other => LifecycleError::Validation(other.to_string()),
        }
    }
}

impl From<RegistryError> for LifecycleError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Lock(e) => e.into(),
            other => LifecycleError::Validation(other.to_string()),
        }
    }
}

impl From<ArchiveError> for LifecycleError {
    fn from(e: ArchiveError) -> Self {
        match e {
            ArchiveError::Lock(e) => e.into(),
            ArchiveError::NotFound(m) => LifecycleError::NotFound(m),
            other => LifecycleError::Validation(other.to_string()),
        }
    }
}

impl From<MetricsError> for LifecycleError {
    fn from(e: MetricsError) -> Self {
        match e {
            MetricsError::Lock(e) => e.into(),
            other => LifecycleError::Validation(other.to_string()),
        }
    }
}

impl From<ConfigError> for LifecycleError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Invalid(e) => e.into(),
            other => LifecycleError::Validation(other.to_string()),
        }
    }
}

impl From<SessionError> for LifecycleError {
    fn from(e: SessionError) -> Self {
        LifecycleError::ExternalCommand {
            command: "multiplexer".into(),
            exit_code: None,
            stderr_tail: e.to_string(),
        }
    }
}

impl From<GitError> for LifecycleError {
    fn from(e: GitError) -> Self {
        match e {
            GitError::CommandFailed {
                command,
                exit_code,
                stderr_tail,
            } => LifecycleError::ExternalCommand {
                command,
                exit_code,
                stderr_tail,
            },
            GitError::Io(e) => LifecycleError::Io(e),
        }
    }
}

impl From<NotifyError> for LifecycleError {
    fn from(e: NotifyError) -> Self {
        LifecycleError::ExternalCommand {
            command: "notify".into(),
            exit_code: None,
            stderr_tail: e.to_string(),
        }
    }
}
