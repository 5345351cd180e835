// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Git worktree bootstrap/cleanup and the fingerprint used by the
//! convergence freshness check (§4.6) — the only repository/worktree
//! management this crate performs; everything beyond these hooks is out
//! of scope (§1).

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git {command} failed (exit {exit_code:?}): {stderr_tail}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr_tail: String,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Commit sha + a hash of `git status --porcelain` + a dirty bit, used to
/// detect whether a previously-trusted review artifact is stale (§4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeFingerprint {
    pub commit_sha: String,
    pub porcelain_status_hash: String,
    pub dirty: bool,
}

#[async_trait]
pub trait GitAdapter: Clone + Send + Sync + 'static {
    /// Creates `worktree_path` as a new worktree of `repo_path` on a new
    /// branch `bubble_branch` cut from `base_branch`.
    async fn bootstrap_worktree(
        &self,
        repo_path: &Path,
        worktree_path: &Path,
        base_branch: &str,
        bubble_branch: &str,
    ) -> Result<(), GitError>;

    /// Removes the worktree and (if unmerged elsewhere) the bubble branch.
    /// Best-effort on the branch delete: a worktree that was already
    /// committed and merged upstream may have had its branch deleted by
    /// other means.
    async fn cleanup_worktree(
        &self,
        repo_path: &Path,
        worktree_path: &Path,
        bubble_branch: &str,
    ) -> Result<(), GitError>;

    async fn fingerprint(&self, worktree_path: &Path) -> Result<WorktreeFingerprint, GitError>;

    /// Stages everything in the worktree and commits with `message`,
    /// returning the new commit sha.
    async fn commit_all(&self, worktree_path: &Path, message: &str) -> Result<String, GitError>;
}

#[derive(Clone, Default)]
pub struct SubprocessGitAdapter;

impl SubprocessGitAdapter {
    pub fn new() -> Self {
        Self
    }
}

async fn run_git(cwd: &Path, args: &[&str]) -> Result<std::process::Output, GitError> {
    Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(GitError::Io)
}

fn stderr_tail(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    stderr.lines().rev().take(5).collect::<Vec<_>>().join("\n")
}

fn require_success(command: &str, output: std::process::Output) -> Result<std::process::Output, GitError> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(GitError::CommandFailed {
            command: command.to_string(),
            exit_code: output.status.code(),
            stderr_tail: stderr_tail(&output),
        })
    }
}

#[async_trait]
impl GitAdapter for SubprocessGitAdapter {
    async fn bootstrap_worktree(
        &self,
        repo_path: &Path,
        worktree_path: &Path,
        base_branch: &str,
        bubble_branch: &str,
    ) -> Result<(), GitError> {
        let output = run_git(
            repo_path,
            &[
                "worktree",
                "add",
                "-b",
                bubble_branch,
                &worktree_path.to_string_lossy(),
                base_branch,
            ],
        )
        .await?;
        require_success("worktree add", output)?;
        Ok(())
    }

    async fn cleanup_worktree(
        &self,
        repo_path: &Path,
        worktree_path: &Path,
        bubble_branch: &str,
    ) -> Result<(), GitError> {
        let output = run_git(
            repo_path,
            &["worktree", "remove", "--force", &worktree_path.to_string_lossy()],
        )
        .await?;
        require_success("worktree remove", output)?;

        // Branch delete is best-effort: the branch may already be gone if
        // it was merged and pruned by other means.
        let _ = run_git(repo_path, &["branch", "-D", bubble_branch]).await;
        Ok(())
    }

    async fn fingerprint(&self, worktree_path: &Path) -> Result<WorktreeFingerprint, GitError> {
        let head = run_git(worktree_path, &["rev-parse", "HEAD"]).await?;
        let head = require_success("rev-parse HEAD", head)?;
        let commit_sha = String::from_utf8_lossy(&head.stdout).trim().to_string();

        let status = run_git(worktree_path, &["status", "--porcelain"]).await?;
        let status = require_success("status --porcelain", status)?;
        let porcelain = String::from_utf8_lossy(&status.stdout).to_string();
        let dirty = !porcelain.trim().is_empty();

        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(porcelain.as_bytes());
        let porcelain_status_hash = format!("{:x}", hasher.finalize());

        Ok(WorktreeFingerprint {
            commit_sha,
            porcelain_status_hash,
            dirty,
        })
    }

    async fn commit_all(&self, worktree_path: &Path, message: &str) -> Result<String, GitError> {
        let add = run_git(worktree_path, &["add", "-A"]).await?;
        require_success("add -A", add)?;

        let commit = run_git(worktree_path, &["commit", "-m", message]).await?;
        require_success("commit", commit)?;

        let head = run_git(worktree_path, &["rev-parse", "HEAD"]).await?;
        let head = require_success("rev-parse HEAD", head)?;
        Ok(String::from_utf8_lossy(&head.stdout).trim().to_string())
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeGitAdapter, GitCall};

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::{GitAdapter, GitError, WorktreeFingerprint};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    #[derive(Debug, Clone)]
    pub enum GitCall {
        Bootstrap {
            repo_path: PathBuf,
            worktree_path: PathBuf,
            base_branch: String,
            bubble_branch: String,
        },
        Cleanup {
            worktree_path: PathBuf,
            bubble_branch: String,
        },
        Fingerprint {
            worktree_path: PathBuf,
        },
        CommitAll {
            worktree_path: PathBuf,
            message: String,
        },
    }

    struct FakeGitState {
        calls: Vec<GitCall>,
        fingerprint: WorktreeFingerprint,
        next_commit: u64,
    }

    #[derive(Clone)]
    pub struct FakeGitAdapter {
        inner: Arc<Mutex<FakeGitState>>,
    }

    impl Default for FakeGitAdapter {
        fn default() -> Self {
            Self {
                inner: Arc::new(Mutex::new(FakeGitState {
                    calls: Vec::new(),
                    fingerprint: WorktreeFingerprint {
                        commit_sha: "0".repeat(40),
                        porcelain_status_hash: "0".repeat(64),
                        dirty: false,
                    },
                    next_commit: 1,
                })),
            }
        }
    }

    impl FakeGitAdapter {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<GitCall> {
            self.inner.lock().calls.clone()
        }

        pub fn set_fingerprint(&self, fingerprint: WorktreeFingerprint) {
            self.inner.lock().fingerprint = fingerprint;
        }
    }

    #[async_trait]
    impl GitAdapter for FakeGitAdapter {
        async fn bootstrap_worktree(
            &self,
            repo_path: &Path,
            worktree_path: &Path,
            base_branch: &str,
            bubble_branch: &str,
        ) -> Result<(), GitError> {
            self.inner.lock().calls.push(GitCall::Bootstrap {
                repo_path: repo_path.to_path_buf(),
                worktree_path: worktree_path.to_path_buf(),
                base_branch: base_branch.to_string(),
                bubble_branch: bubble_branch.to_string(),
            });
            std::fs::create_dir_all(worktree_path)?;
            Ok(())
        }

        async fn cleanup_worktree(
            &self,
            _repo_path: &Path,
            worktree_path: &Path,
            bubble_branch: &str,
        ) -> Result<(), GitError> {
            self.inner.lock().calls.push(GitCall::Cleanup {
                worktree_path: worktree_path.to_path_buf(),
                bubble_branch: bubble_branch.to_string(),
            });
            if worktree_path.exists() {
                std::fs::remove_dir_all(worktree_path)?;
            }
            Ok(())
        }

        async fn fingerprint(&self, worktree_path: &Path) -> Result<WorktreeFingerprint, GitError> {
            let mut state = self.inner.lock();
            state.calls.push(GitCall::Fingerprint {
                worktree_path: worktree_path.to_path_buf(),
            });
            Ok(state.fingerprint.clone())
        }

        async fn commit_all(&self, worktree_path: &Path, message: &str) -> Result<String, GitError> {
            let mut state = self.inner.lock();
            state.calls.push(GitCall::CommitAll {
                worktree_path: worktree_path.to_path_buf(),
                message: message.to_string(),
            });
            let sha = format!("{:040}", state.next_commit);
            state.next_commit += 1;
            state.fingerprint.commit_sha = sha.clone();
            state.fingerprint.dirty = false;
            Ok(sha)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn fake_bootstrap_then_cleanup_round_trips() {
        let adapter = FakeGitAdapter::new();
        let dir = tempdir().unwrap();
        let repo = dir.path().join("repo");
        let worktree = dir.path().join("worktree");

        adapter
            .bootstrap_worktree(&repo, &worktree, "main", "bubble/fix-login-bug")
            .await
            .unwrap();
        assert!(worktree.exists());

        adapter
            .cleanup_worktree(&repo, &worktree, "bubble/fix-login-bug")
            .await
            .unwrap();
        assert!(!worktree.exists());

        assert_eq!(adapter.calls().len(), 2);
    }

    #[tokio::test]
    async fn fake_commit_all_advances_fingerprint() {
        let adapter = FakeGitAdapter::new();
        let dir = tempdir().unwrap();
        let worktree = dir.path().join("worktree");
        std::fs::create_dir_all(&worktree).unwrap();

        let sha = adapter.commit_all(&worktree, "done package").await.unwrap();
        let fp = adapter.fingerprint(&worktree).await.unwrap();
        assert_eq!(fp.commit_sha, sha);
        assert!(!fp.dirty);
    }
}
