// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The on-disk layout under `<repo>/.pairflow/...` (§6).

use std::path::{Path, PathBuf};

/// All paths that make up one bubble's on-disk footprint, plus the
/// repo-scoped registry/lock roots it shares with every other bubble.
#[derive(Debug, Clone)]
pub struct BubblePaths {
    pub repo_root: PathBuf,
    pub bubble_id: String,
}

impl BubblePaths {
    pub fn new(repo_path: &Path, bubble_id: &str) -> Self {
        Self {
            repo_root: repo_path.to_path_buf(),
            bubble_id: bubble_id.to_string(),
        }
    }

    pub fn pairflow_root(&self) -> PathBuf {
        self.repo_root.join(".pairflow")
    }

    pub fn bubble_dir(&self) -> PathBuf {
        self.pairflow_root().join("bubbles").join(&self.bubble_id)
    }

    pub fn config(&self) -> PathBuf {
        self.bubble_dir().join("bubble.toml")
    }

    pub fn state(&self) -> PathBuf {
        self.bubble_dir().join("state.json")
    }

    pub fn transcript(&self) -> PathBuf {
        self.bubble_dir().join("transcript.ndjson")
    }

    pub fn inbox(&self) -> PathBuf {
        self.bubble_dir().join("inbox.ndjson")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.bubble_dir().join("artifacts")
    }

    pub fn task_artifact(&self) -> PathBuf {
        self.artifacts_dir().join("task.md")
    }

    pub fn done_package_artifact(&self) -> PathBuf {
        self.artifacts_dir().join("done-package.md")
    }

    pub fn reviewer_test_verification_artifact(&self) -> PathBuf {
        self.artifacts_dir().join("reviewer-test-verification.json")
    }

    pub fn worktree_dir(&self) -> PathBuf {
        self.pairflow_root().join("worktrees").join(&self.bubble_id)
    }

    pub fn lock(&self) -> PathBuf {
        self.pairflow_root()
            .join("locks")
            .join(format!("{}.lock", self.bubble_id))
    }

    pub fn registry(&self) -> PathBuf {
        self.pairflow_root().join("runtime").join("sessions.json")
    }

    pub fn registry_lock(&self) -> PathBuf {
        self.pairflow_root().join("locks").join("registry.lock")
    }
}

/// Global (not per-repo) roots for the archive and metrics subsystems
/// (§6), resolved from `PAIRFLOW_ARCHIVE_ROOT` / `PAIRFLOW_METRICS_ROOT` or
/// `$HOME/.pairflow/{archive,metrics}`.
#[derive(Debug, Clone)]
pub struct GlobalPaths {
    pub archive_root: PathBuf,
    pub metrics_root: PathBuf,
    pub global_lock_root: PathBuf,
}

impl GlobalPaths {
    pub fn from_env(home: &Path) -> Self {
        let archive_root = std::env::var("PAIRFLOW_ARCHIVE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".pairflow").join("archive"));
        let metrics_root = std::env::var("PAIRFLOW_METRICS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".pairflow").join("metrics"));
        Self {
            archive_root,
            metrics_root,
            global_lock_root: home.join(".pairflow").join("locks"),
        }
    }

    pub fn archive_index(&self) -> PathBuf {
        self.archive_root.join("index.json")
    }

    pub fn archive_lock(&self) -> PathBuf {
        self.global_lock_root.join("archive.lock")
    }

    pub fn metrics_lock(&self, year: u32, month: u32) -> PathBuf {
        self.global_lock_root
            .join(format!("metrics-{year:04}-{month:02}.lock"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn bubble_paths_nest_under_dot_pairflow() {
        let paths = BubblePaths::new(Path::new("/repo"), "fix-login-bug");
        assert_eq!(
            paths.bubble_dir(),
            Path::new("/repo/.pairflow/bubbles/fix-login-bug")
        );
        assert_eq!(
            paths.lock(),
            Path::new("/repo/.pairflow/locks/fix-login-bug.lock")
        );
    }

    #[test]
    #[serial(env)]
    fn global_paths_default_under_home() {
        std::env::remove_var("PAIRFLOW_ARCHIVE_ROOT");
        std::env::remove_var("PAIRFLOW_METRICS_ROOT");
        let paths = GlobalPaths::from_env(Path::new("/home/user"));
        assert_eq!(
            paths.archive_root,
            Path::new("/home/user/.pairflow/archive")
        );
        assert_eq!(
            paths.metrics_root,
            Path::new("/home/user/.pairflow/metrics")
        );
    }
}
