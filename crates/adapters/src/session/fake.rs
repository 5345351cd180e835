// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory session adapter for lifecycle tests.

use super::{SessionAdapter, SessionError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum SessionCall {
    Spawn {
        name: String,
        cwd: PathBuf,
        cmd: String,
        env: Vec<(String, String)>,
    },
    Send { id: String, input: String },
    SendLiteral { id: String, text: String },
    SendEnter { id: String },
    Kill { id: String },
    IsAlive { id: String },
    CaptureOutput { id: String, lines: u32 },
    IsProcessRunning { id: String, pattern: String },
}

#[derive(Debug, Clone)]
pub struct FakeSession {
    pub name: String,
    pub cwd: PathBuf,
    pub cmd: String,
    pub env: Vec<(String, String)>,
    pub output: Vec<String>,
    pub alive: bool,
    pub exit_code: Option<i32>,
    pub process_running: bool,
}

struct FakeSessionState {
    sessions: HashMap<String, FakeSession>,
    calls: Vec<SessionCall>,
    next_id: u64,
}

#[derive(Clone)]
pub struct FakeSessionAdapter {
    inner: Arc<Mutex<FakeSessionState>>,
}

impl Default for FakeSessionAdapter {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeSessionState {
                sessions: HashMap::new(),
                calls: Vec::new(),
                next_id: 0,
            })),
        }
    }
}

impl FakeSessionAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        self.inner.lock().calls.clone()
    }

    pub fn session(&self, id: &str) -> Option<FakeSession> {
        self.inner.lock().sessions.get(id).cloned()
    }

    pub fn set_alive(&self, id: &str, alive: bool) {
        if let Some(s) = self.inner.lock().sessions.get_mut(id) {
            s.alive = alive;
        }
    }

    pub fn push_output(&self, id: &str, line: &str) {
        if let Some(s) = self.inner.lock().sessions.get_mut(id) {
            s.output.push(line.to_string());
        }
    }
}

#[async_trait]
impl SessionAdapter for FakeSessionAdapter {
    async fn spawn(
        &self,
        name: &str,
        cwd: &Path,
        cmd: &str,
        env: &[(String, String)],
    ) -> Result<String, SessionError> {
        let mut state = self.inner.lock();
        state.calls.push(SessionCall::Spawn {
            name: name.to_string(),
            cwd: cwd.to_path_buf(),
            cmd: cmd.to_string(),
            env: env.to_vec(),
        });
        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.sessions.insert(
            id.clone(),
            FakeSession {
                name: name.to_string(),
                cwd: cwd.to_path_buf(),
                cmd: cmd.to_string(),
                env: env.to_vec(),
                output: Vec::new(),
                alive: true,
                exit_code: None,
                process_running: true,
            },
        );
        Ok(id)
    }

    async fn send(&self, id: &str, input: &str) -> Result<(), SessionError> {
        let mut state = self.inner.lock();
        state.calls.push(SessionCall::Send {
            id: id.to_string(),
            input: input.to_string(),
        });
        if !state.sessions.contains_key(id) {
            return Err(SessionError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn send_literal(&self, id: &str, text: &str) -> Result<(), SessionError> {
        let mut state = self.inner.lock();
        state.calls.push(SessionCall::SendLiteral {
            id: id.to_string(),
            text: text.to_string(),
        });
        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.output.push(text.to_string());
        Ok(())
    }

    async fn send_enter(&self, id: &str) -> Result<(), SessionError> {
        let mut state = self.inner.lock();
        state.calls.push(SessionCall::SendEnter { id: id.to_string() });
        if !state.sessions.contains_key(id) {
            return Err(SessionError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn kill(&self, id: &str) -> Result<(), SessionError> {
        let mut state = self.inner.lock();
        state.calls.push(SessionCall::Kill { id: id.to_string() });
        if let Some(s) = state.sessions.get_mut(id) {
            s.alive = false;
        }
        Ok(())
    }

    async fn is_alive(&self, id: &str) -> Result<bool, SessionError> {
        let mut state = self.inner.lock();
        state.calls.push(SessionCall::IsAlive { id: id.to_string() });
        Ok(state.sessions.get(id).map(|s| s.alive).unwrap_or(false))
    }

    async fn capture_output(&self, id: &str, lines: u32) -> Result<String, SessionError> {
        let mut state = self.inner.lock();
        state.calls.push(SessionCall::CaptureOutput {
            id: id.to_string(),
            lines,
        });
        let session = state
            .sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok(session.output.join("\n"))
    }

    async fn is_process_running(&self, id: &str, pattern: &str) -> Result<bool, SessionError> {
        let mut state = self.inner.lock();
        state.calls.push(SessionCall::IsProcessRunning {
            id: id.to_string(),
            pattern: pattern.to_string(),
        });
        let session = state
            .sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok(session.process_running)
    }

    async fn get_exit_code(&self, id: &str) -> Result<Option<i32>, SessionError> {
        let state = self.inner.lock();
        let session = state
            .sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok(session.exit_code)
    }
}
