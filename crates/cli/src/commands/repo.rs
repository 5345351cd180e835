// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `repo add|remove|list` (§6).

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::output::OutputFormat;
use crate::repo_registry;

#[derive(Args)]
pub struct RepoArgs {
    #[command(subcommand)]
    pub command: RepoCommand,
}

#[derive(Subcommand)]
pub enum RepoCommand {
    /// Register a repository so other commands can omit --repo
    Add { path: PathBuf },
    /// Forget a previously registered repository
    Remove { path: PathBuf },
    /// List every registered repository
    List,
}

pub fn handle(command: RepoCommand, format: OutputFormat) -> Result<()> {
    let home = crate::home_dir()?;
    match command {
        RepoCommand::Add { path } => {
            repo_registry::add(&home, &path)?;
            println!("added {}", path.display());
            Ok(())
        }
        RepoCommand::Remove { path } => {
            if !repo_registry::remove(&home, &path)? {
                bail!("{} is not a registered repository", path.display());
            }
            println!("removed {}", path.display());
            Ok(())
        }
        RepoCommand::List => {
            let repos = repo_registry::list(&home)?;
            match format {
                OutputFormat::Json => {
                    #[derive(Serialize)]
                    struct Row {
                        path: String,
                    }
                    let rows: Vec<Row> = repos.iter().map(|p| Row { path: p.to_string_lossy().to_string() }).collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
                OutputFormat::Text => {
                    for repo in &repos {
                        println!("{}", repo.display());
                    }
                }
            }
            Ok(())
        }
    }
}
