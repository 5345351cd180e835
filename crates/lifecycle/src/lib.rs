// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pf-lifecycle: the bubble lifecycle engine. Composes `pf-core`'s state
//! machine, `pf-storage`'s durable primitives, and `pf-adapters`'
//! multiplexer/notifier/git hooks into the public operations described in
//! the lifecycle operation contracts (§4.4), plus the watchdog (§4.5) and
//! the review-evidence classifier (§4.6).
//!
//! Adapter traits require `Clone`, which is not object-safe, so every
//! operation here takes its adapters as generic type parameters
//! (`fn start<C: Clock, S: SessionAdapter, G: GitAdapter>(...)`) rather
//! than `Box<dyn Trait>` — each call site monomorphizes over the concrete
//! adapter it is using (real subprocess adapters in the CLI binary, fakes
//! in tests).

pub mod convergence;
pub mod error;
pub mod ops;
pub mod paths;
pub mod watchdog;

pub use convergence::{classify_review_evidence, EvidenceDecision, EvidenceReport, EvidenceStatus};
pub use error::LifecycleError;
pub use ops::{
    approve, ask_human, commit, converged, create, delete, pass, reply, request_rework, start, stop,
    CreateInput, CreateOutcome, DeleteOutcome, OperationOutcome, PassInput, StopOutcome,
};
pub use paths::{BubblePaths, GlobalPaths};
pub use watchdog::{evaluate_watchdog, run_watchdog_once, WatchdogAction, WatchdogStatus};
