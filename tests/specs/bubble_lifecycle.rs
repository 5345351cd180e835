// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::prelude::*;

#[test]
fn create_writes_the_bubble_directory_and_reports_created() {
    let project = Project::git();

    project
        .pairflow()
        .args(&[
            "bubble",
            "create",
            "fix-login-bug",
            "--repo",
            ".",
            "--task",
            "fix the login bug",
        ])
        .passes()
        .stdout_has("fix-login-bug")
        .stdout_has("created")
        .stdout_has("Created");

    assert!(project.path().join(".pairflow/bubbles/fix-login-bug/bubble.toml").exists());
    assert!(project.path().join(".pairflow/bubbles/fix-login-bug/state.json").exists());
    assert!(project.path().join(".pairflow/bubbles/fix-login-bug/artifacts/task.md").exists());

    let task = std::fs::read_to_string(project.path().join(".pairflow/bubbles/fix-login-bug/artifacts/task.md")).unwrap();
    assert_eq!(task, "fix the login bug");
}

#[test]
fn create_rejects_a_duplicate_bubble_id() {
    let project = Project::git();
    project
        .pairflow()
        .args(&["bubble", "create", "dup-bubble", "--repo", ".", "--task", "first"])
        .passes();

    project
        .pairflow()
        .args(&["bubble", "create", "dup-bubble", "--repo", ".", "--task", "second"])
        .fails()
        .stderr_has("dup-bubble");
}

#[test]
fn create_requires_exactly_one_of_task_or_task_file() {
    let project = Project::git();
    project
        .pairflow()
        .args(&["bubble", "create", "no-task", "--repo", "."])
        .fails()
        .stderr_has("--task");
}

#[test]
fn status_reports_the_created_state_for_a_fresh_bubble() {
    let project = Project::git();
    project
        .pairflow()
        .args(&["bubble", "create", "status-check", "--repo", ".", "--task", "do the thing"])
        .passes();

    project
        .pairflow()
        .args(&["bubble", "status", "--repo", ".", "--id", "status-check"])
        .passes()
        .stdout_has("status-check")
        .stdout_has("Created");
}

#[test]
fn status_on_an_unknown_bubble_fails() {
    let project = Project::git();
    project
        .pairflow()
        .args(&["bubble", "status", "--repo", ".", "--id", "never-created"])
        .fails();
}

#[test]
fn list_shows_every_bubble_under_the_repo() {
    let project = Project::git();
    project
        .pairflow()
        .args(&["bubble", "create", "alpha", "--repo", ".", "--task", "a"])
        .passes();
    project
        .pairflow()
        .args(&["bubble", "create", "beta", "--repo", ".", "--task", "b"])
        .passes();

    project
        .pairflow()
        .args(&["bubble", "list", "--repo", "."])
        .passes()
        .stdout_has("alpha")
        .stdout_has("beta");
}

#[test]
fn list_json_output_is_parseable() {
    let project = Project::git();
    project
        .pairflow()
        .args(&["bubble", "create", "json-bubble", "--repo", ".", "--task", "a"])
        .passes();

    let out = project
        .pairflow()
        .args(&["-o", "json", "bubble", "list", "--repo", "."])
        .passes()
        .stdout();

    let rows: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(rows[0]["bubble_id"], "json-bubble");
}

#[test]
fn delete_without_force_succeeds_when_no_worktree_or_session_exists() {
    let project = Project::git();
    project
        .pairflow()
        .args(&["bubble", "create", "throwaway", "--repo", ".", "--task", "a"])
        .passes();

    project
        .pairflow()
        .args(&["bubble", "delete", "--repo", ".", "--id", "throwaway"])
        .passes()
        .stdout_has("deleted");

    assert!(!project.path().join(".pairflow/bubbles/throwaway").exists());
}

#[test]
fn commands_without_repo_or_id_fail_when_cwd_is_not_a_bubble_worktree() {
    let project = Project::git();
    project
        .pairflow()
        .args(&["bubble", "status"])
        .fails()
        .stderr_has("--id");
}
