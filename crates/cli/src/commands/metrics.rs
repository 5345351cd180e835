// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `metrics report --from --to [--repo] [--format table|json]` (§6):
//! reads the monthly NDJSON shards (§4.8) across a date range and renders
//! them as a table or as JSON.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use pf_lifecycle::GlobalPaths;
use pf_storage::metrics::{read_shard, shard_path, MetricsEvent};

use crate::table::{Column, Table};

#[derive(Args)]
pub struct MetricsArgs {
    #[command(subcommand)]
    pub command: MetricsCommand,
}

#[derive(Subcommand)]
pub enum MetricsCommand {
    /// Aggregate metrics events across a month range
    Report {
        /// First month, inclusive, as YYYY-MM
        #[arg(long)]
        from: String,
        /// Last month, inclusive, as YYYY-MM
        #[arg(long)]
        to: String,
        #[arg(long)]
        repo: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = ReportFormat::Table)]
        format: ReportFormat,
    },
}

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum ReportFormat {
    #[default]
    Table,
    Json,
}

pub fn handle(command: MetricsCommand) -> Result<()> {
    match command {
        MetricsCommand::Report { from, to, repo, format } => report(&from, &to, repo.as_deref(), format),
    }
}

fn report(from: &str, to: &str, repo: Option<&Path>, format: ReportFormat) -> Result<()> {
    let home = crate::home_dir()?;
    let global = GlobalPaths::from_env(&home);
    let (from_year, from_month) = parse_year_month(from)?;
    let (to_year, to_month) = parse_year_month(to)?;

    let repo_filter = repo
        .map(|p| std::fs::canonicalize(p).with_context(|| format!("repo path {} not found", p.display())))
        .transpose()?
        .map(|p| p.to_string_lossy().to_string());

    let mut events: Vec<MetricsEvent> = Vec::new();
    for (year, month) in months_between((from_year, from_month), (to_year, to_month)) {
        let shard = shard_path(&global.metrics_root, year, month);
        let mut shard_events = read_shard(&shard)?;
        if let Some(repo_filter) = &repo_filter {
            shard_events.retain(|e| &e.repo_path == repo_filter);
        }
        events.extend(shard_events);
    }

    match format {
        ReportFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        ReportFormat::Table => print_table(&events),
    }
    Ok(())
}

fn print_table(events: &[MetricsEvent]) {
    let mut counts: std::collections::BTreeMap<String, u64> = std::collections::BTreeMap::new();
    for event in events {
        *counts.entry(format!("{:?}", event.event_type)).or_default() += 1;
    }

    let mut table = Table::new(vec![Column::left("EVENT"), Column::right("COUNT")]);
    for (event, count) in counts {
        table.row(vec![event, count.to_string()]);
    }
    let mut buf = Vec::new();
    table.render(&mut buf);
    print!("{}", String::from_utf8_lossy(&buf));
    println!("\n{} total events", events.len());
}

fn parse_year_month(s: &str) -> Result<(u32, u32)> {
    let (year, month) = s.split_once('-').ok_or_else(|| anyhow::anyhow!("expected YYYY-MM, got {s}"))?;
    let year: u32 = year.parse().with_context(|| format!("invalid year in {s}"))?;
    let month: u32 = month.parse().with_context(|| format!("invalid month in {s}"))?;
    if !(1..=12).contains(&month) {
        bail!("invalid month in {s}: must be 01-12");
    }
    Ok((year, month))
}

fn months_between(from: (u32, u32), to: (u32, u32)) -> Vec<(u32, u32)> {
    let mut months = Vec::new();
    let mut current = from;
    while current <= to {
        months.push(current);
        current = if current.1 == 12 { (current.0 + 1, 1) } else { (current.0, current.1 + 1) };
        if months.len() > 1200 {
            break;
        }
    }
    months
}
