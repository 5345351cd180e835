// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal multiplexer delivery (§4 "external interfaces", best-effort —
//! pane layout and shell wrapping beyond this contract are out of scope).

mod noop;
mod tmux;

pub use noop::NoOpSessionAdapter;
pub use tmux::TmuxAdapter;

#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeSession, FakeSessionAdapter, SessionCall};

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
}

/// Best-effort delivery of envelope text into a human-visible terminal pane.
/// A failure here never blocks a lifecycle operation (§6) — callers log and
/// continue.
#[async_trait]
pub trait SessionAdapter: Clone + Send + Sync + 'static {
    async fn spawn(
        &self,
        name: &str,
        cwd: &Path,
        cmd: &str,
        env: &[(String, String)],
    ) -> Result<String, SessionError>;

    async fn send(&self, id: &str, input: &str) -> Result<(), SessionError>;

    /// Send literal text to a session (no key interpretation).
    async fn send_literal(&self, id: &str, text: &str) -> Result<(), SessionError>;

    async fn send_enter(&self, id: &str) -> Result<(), SessionError>;

    async fn kill(&self, id: &str) -> Result<(), SessionError>;

    async fn is_alive(&self, id: &str) -> Result<bool, SessionError>;

    async fn capture_output(&self, id: &str, lines: u32) -> Result<String, SessionError>;

    async fn is_process_running(&self, id: &str, pattern: &str) -> Result<bool, SessionError>;

    /// `None` if the pane is still running or the exit code is unavailable.
    async fn get_exit_code(&self, id: &str) -> Result<Option<i32>, SessionError>;
}
