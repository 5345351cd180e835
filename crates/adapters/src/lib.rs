// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pf-adapters: the boundary between Pairflow's lifecycle engine and the
//! outside world — a terminal multiplexer session, a desktop notifier, and
//! a git worktree. Each adapter is a small trait so the lifecycle crate can
//! be driven by a fake in tests and the real thing at runtime.

pub mod git;
pub mod notify;
pub mod session;

pub use git::{GitAdapter, GitError, SubprocessGitAdapter, WorktreeFingerprint};
pub use notify::{DesktopNotifyAdapter, NoOpNotifyAdapter, NotifyAdapter, NotifyError};
pub use session::{NoOpSessionAdapter, SessionAdapter, SessionError, TmuxAdapter};

#[cfg(any(test, feature = "test-support"))]
pub use git::{FakeGitAdapter, GitCall};
#[cfg(any(test, feature = "test-support"))]
pub use notify::{FakeNotifyAdapter, NotifyCall};
#[cfg(any(test, feature = "test-support"))]
pub use session::{FakeSession, FakeSessionAdapter, SessionCall};
