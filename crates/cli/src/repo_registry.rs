// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `repo add|remove|list` (§6): a small list of repositories the CLI
//! knows about, so `bubble list`/`metrics report` can scan every repo
//! without an explicit `--repo` on each invocation. This bookkeeping is a
//! CLI-external-interface concern, not lifecycle state — it lives under
//! the same `$HOME/.pairflow` root as the archive/metrics roots but never
//! touches a bubble directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
struct RepoFile {
    #[serde(default)]
    repos: Vec<PathBuf>,
}

fn registry_path(home: &Path) -> PathBuf {
    home.join(".pairflow").join("repos.json")
}

fn load(home: &Path) -> anyhow::Result<RepoFile> {
    let path = registry_path(home);
    match std::fs::read(&path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RepoFile::default()),
        Err(e) => Err(e.into()),
    }
}

fn save(home: &Path, file: &RepoFile) -> anyhow::Result<()> {
    let path = registry_path(home);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(file)?)?;
    Ok(())
}

pub fn add(home: &Path, repo: &Path) -> anyhow::Result<()> {
    let repo = std::fs::canonicalize(repo)?;
    let mut file = load(home)?;
    if !file.repos.contains(&repo) {
        file.repos.push(repo);
        save(home, &file)?;
    }
    Ok(())
}

pub fn remove(home: &Path, repo: &Path) -> anyhow::Result<bool> {
    let repo = std::fs::canonicalize(repo).unwrap_or_else(|_| repo.to_path_buf());
    let mut file = load(home)?;
    let before = file.repos.len();
    file.repos.retain(|r| r != &repo);
    let removed = file.repos.len() != before;
    if removed {
        save(home, &file)?;
    }
    Ok(removed)
}

pub fn list(home: &Path) -> anyhow::Result<Vec<PathBuf>> {
    Ok(load(home)?.repos)
}
