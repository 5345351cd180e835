// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test helpers for black-box behavioral specifications.
//!
//! Provides a high-level DSL for invoking the `pairflow` binary and
//! asserting on its stdout/stderr/exit code.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Returns the path to a binary, checking llvm-cov target directory first.
/// Falls back to resolving relative to the test binary itself when
/// CARGO_MANIFEST_DIR is stale.
fn binary_path(name: &str) -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));

    let llvm_cov_path = manifest_dir.join("target/llvm-cov-target/debug").join(name);
    if llvm_cov_path.exists() {
        return llvm_cov_path;
    }

    let standard = manifest_dir.join("target/debug").join(name);
    if standard.exists() {
        return standard;
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(debug_dir) = exe.parent().and_then(|d| d.parent()) {
            let fallback = debug_dir.join(name);
            if fallback.exists() {
                return fallback;
            }
        }
    }

    standard
}

fn pairflow_binary() -> PathBuf {
    binary_path("pairflow")
}

/// Create a CLI builder for `pairflow` invocations.
pub fn cli() -> CliBuilder {
    CliBuilder::new()
}

pub struct CliBuilder {
    args: Vec<String>,
    dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl CliBuilder {
    fn new() -> Self {
        Self {
            args: Vec::new(),
            dir: None,
            envs: Vec::new(),
        }
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn pwd(mut self, path: impl Into<PathBuf>) -> Self {
        self.dir = Some(path.into());
        self
    }

    pub fn env(mut self, key: &str, value: impl AsRef<Path>) -> Self {
        self.envs.push((key.to_string(), value.as_ref().to_string_lossy().to_string()));
        self
    }

    pub fn command(self) -> Command {
        let mut cmd = Command::new(pairflow_binary());
        cmd.args(&self.args);
        if let Some(dir) = self.dir {
            cmd.current_dir(dir);
        }
        for (key, value) in self.envs {
            cmd.env(key, value);
        }
        cmd
    }

    pub fn passes(self) -> RunAssert {
        let mut cmd = self.command();
        let output = cmd.output().expect("command should run");
        assert!(
            output.status.success(),
            "expected command to pass, got exit code {:?}\nstdout: {}\nstderr: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        RunAssert { output }
    }

    pub fn fails(self) -> RunAssert {
        let mut cmd = self.command();
        let output = cmd.output().expect("command should run");
        assert!(
            !output.status.success(),
            "expected command to fail, but it passed\nstdout: {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        RunAssert { output }
    }

    pub fn fails_with_code(self, code: i32) -> RunAssert {
        let mut cmd = self.command();
        let output = cmd.output().expect("command should run");
        assert_eq!(
            output.status.code(),
            Some(code),
            "expected exit code {}\nstdout: {}\nstderr: {}",
            code,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        RunAssert { output }
    }
}

pub struct RunAssert {
    output: Output,
}

impl RunAssert {
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.output.stdout).into_owned()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.output.stderr).into_owned()
    }

    pub fn stdout_has(self, expected: &str) -> Self {
        let stdout = self.stdout();
        assert!(stdout.contains(expected), "stdout does not contain '{expected}'\nstdout: {stdout}");
        self
    }

    pub fn stdout_lacks(self, unexpected: &str) -> Self {
        let stdout = self.stdout();
        assert!(!stdout.contains(unexpected), "stdout should not contain '{unexpected}'\nstdout: {stdout}");
        self
    }

    pub fn stderr_has(self, expected: &str) -> Self {
        let stderr = self.stderr();
        assert!(stderr.contains(expected), "stderr does not contain '{expected}'\nstderr: {stderr}");
        self
    }
}

/// A temporary project: a git repo plus an isolated `$PAIRFLOW_HOME`, so
/// archive/metrics/known-repos bookkeeping never touches the real home
/// directory.
pub struct Project {
    dir: tempfile::TempDir,
    home_dir: tempfile::TempDir,
}

impl Project {
    /// Create an empty git repository.
    pub fn git() -> Self {
        let project = Self {
            dir: tempfile::tempdir().unwrap(),
            home_dir: tempfile::tempdir().unwrap(),
        };
        Command::new("git")
            .args(["init", "-q", "-b", "main"])
            .current_dir(project.path())
            .status()
            .expect("git init should work");
        Command::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(project.path())
            .status()
            .expect("git config should work");
        Command::new("git")
            .args(["config", "user.name", "Test"])
            .current_dir(project.path())
            .status()
            .expect("git config should work");
        project.file("README.md", "hello\n");
        Command::new("git")
            .args(["add", "."])
            .current_dir(project.path())
            .status()
            .expect("git add should work");
        Command::new("git")
            .args(["commit", "-q", "-m", "initial"])
            .current_dir(project.path())
            .status()
            .expect("git commit should work");
        project
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn home_path(&self) -> &Path {
        self.home_dir.path()
    }

    pub fn file(&self, path: impl AsRef<Path>, content: &str) {
        let full_path = self.dir.path().join(path.as_ref());
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full_path, content).unwrap();
    }

    pub fn pairflow(&self) -> CliBuilder {
        cli().pwd(self.path()).env("PAIRFLOW_HOME", self.home_path())
    }
}
