// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resolving a bubble's repo + id from explicit flags or the current
//! working directory (§4.4 step 1: "repo path explicit or recovered from
//! current working directory's worktree").

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

pub struct Target {
    pub repo_path: PathBuf,
    pub bubble_id: String,
}

/// Resolves `--repo`/`--id` against explicit flags first, falling back to
/// detecting a `.pairflow/worktrees/<id>` ancestor of the current
/// directory (the layout `start` creates each bubble's workspace under).
pub fn resolve(repo: Option<&Path>, id: Option<&str>) -> Result<Target> {
    if let (Some(repo), Some(id)) = (repo, id) {
        return Ok(Target {
            repo_path: std::fs::canonicalize(repo).with_context(|| format!("repo path {} not found", repo.display()))?,
            bubble_id: id.to_string(),
        });
    }

    let cwd = std::env::current_dir().context("cannot read current directory")?;
    let detected = detect_from_worktree(&cwd);

    let bubble_id = match (id, detected.as_ref()) {
        (Some(id), _) => id.to_string(),
        (None, Some((_, id))) => id.clone(),
        (None, None) => {
            return Err(anyhow!(
                "no --id given and the current directory is not inside a bubble worktree"
            ))
        }
    };

    let repo_path = match (repo, detected) {
        (Some(repo), _) => std::fs::canonicalize(repo).with_context(|| format!("repo path {} not found", repo.display()))?,
        (None, Some((repo_path, _))) => repo_path,
        (None, None) => return Err(anyhow!("no --repo given and the current directory is not inside a bubble worktree")),
    };

    Ok(Target { repo_path, bubble_id })
}

/// Walks up from `start` looking for `<repo>/.pairflow/worktrees/<id>`,
/// returning `(repo_path, bubble_id)` on a match.
fn detect_from_worktree(start: &Path) -> Option<(PathBuf, String)> {
    let mut current = start;
    loop {
        if current.file_name().is_some() {
            let worktrees_dir = current.parent()?;
            if worktrees_dir.file_name().map(|n| n == "worktrees").unwrap_or(false) {
                let pairflow_dir = worktrees_dir.parent()?;
                if pairflow_dir.file_name().map(|n| n == ".pairflow").unwrap_or(false) {
                    let repo_path = pairflow_dir.parent()?.to_path_buf();
                    let bubble_id = current.file_name()?.to_string_lossy().to_string();
                    return Some((repo_path, bubble_id));
                }
            }
        }
        current = current.parent()?;
    }
}
