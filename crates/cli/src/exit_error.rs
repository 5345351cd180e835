// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A marker error carrying the process exit code a failure should produce.
//!
//! Library errors are wrapped in `anyhow::Error` as they propagate up to
//! `main`; `main` downcasts for an `ExitError` to pick a non-default code
//! (currently only exit 2, "confirmation required") and falls back to 1.

use std::fmt;

#[derive(Debug)]
pub struct ExitError {
    pub code: i32,
}

impl ExitError {
    pub fn new(code: i32) -> Self {
        Self { code }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit code {}", self.code)
    }
}

impl std::error::Error for ExitError {}
