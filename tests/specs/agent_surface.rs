// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::prelude::*;

#[test]
fn pass_requires_as_role_and_summary() {
    let project = Project::git();
    project.pairflow().args(&["agent", "pass"]).fails();
}

#[test]
fn pass_without_id_or_repo_fails_outside_a_bubble_worktree() {
    let project = Project::git();
    project
        .pairflow()
        .args(&["agent", "pass", "--as-role", "implementer", "--summary", "done"])
        .fails()
        .stderr_has("--id");
}

#[test]
fn pass_rejects_an_unknown_role() {
    let project = Project::git();
    project
        .pairflow()
        .args(&["bubble", "create", "role-check", "--repo", ".", "--task", "a"])
        .passes();

    project
        .pairflow()
        .args(&[
            "agent",
            "pass",
            "--id",
            "role-check",
            "--repo",
            ".",
            "--as-role",
            "bystander",
            "--summary",
            "handing off",
        ])
        .fails()
        .stderr_has("--as-role");
}

#[test]
fn pass_rejects_a_malformed_finding() {
    let project = Project::git();
    project
        .pairflow()
        .args(&["bubble", "create", "finding-check", "--repo", ".", "--task", "a"])
        .passes();

    project
        .pairflow()
        .args(&[
            "agent",
            "pass",
            "--id",
            "finding-check",
            "--repo",
            ".",
            "--as-role",
            "implementer",
            "--summary",
            "handing off",
            "--finding",
            "urgent:no severity prefix",
        ])
        .fails();
}

#[test]
fn ask_human_requires_a_question() {
    let project = Project::git();
    project.pairflow().args(&["agent", "ask-human", "--id", "x", "--repo", "."]).fails();
}

#[test]
fn converged_requires_a_summary() {
    let project = Project::git();
    project.pairflow().args(&["agent", "converged", "--id", "x", "--repo", "."]).fails();
}
