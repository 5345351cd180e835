// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::prelude::*;

#[test]
fn report_requires_from_and_to() {
    let project = Project::git();
    project.pairflow().args(&["metrics", "report"]).fails();
}

#[test]
fn report_over_an_empty_range_prints_zero_events() {
    let project = Project::git();
    project
        .pairflow()
        .args(&["metrics", "report", "--from", "2026-01", "--to", "2026-12"])
        .passes()
        .stdout_has("0 total events");
}

#[test]
fn report_json_format_is_an_empty_array_when_nothing_happened() {
    let project = Project::git();
    let out = project
        .pairflow()
        .args(&["metrics", "report", "--from", "2026-01", "--to", "2026-01", "--format", "json"])
        .passes()
        .stdout();
    let events: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(events.as_array().unwrap().len(), 0);
}

#[test]
fn report_rejects_a_malformed_month() {
    let project = Project::git();
    project
        .pairflow()
        .args(&["metrics", "report", "--from", "not-a-month", "--to", "2026-01"])
        .fails()
        .stderr_has("YYYY-MM");
}

#[test]
fn report_rejects_an_out_of_range_month() {
    let project = Project::git();
    project
        .pairflow()
        .args(&["metrics", "report", "--from", "2026-13", "--to", "2026-13"])
        .fails()
        .stderr_has("01-12");
}
