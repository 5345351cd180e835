// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::prelude::*;

#[test]
fn add_then_list_reports_the_canonicalized_path() {
    let project = Project::git();
    project.pairflow().args(&["repo", "add", "."]).passes();

    let out = project.pairflow().args(&["repo", "list"]).passes().stdout();
    let canonical = std::fs::canonicalize(project.path()).unwrap();
    assert!(out.contains(&canonical.to_string_lossy().to_string()));
}

#[test]
fn adding_the_same_repo_twice_does_not_duplicate_it() {
    let project = Project::git();
    project.pairflow().args(&["repo", "add", "."]).passes();
    project.pairflow().args(&["repo", "add", "."]).passes();

    let out = project
        .pairflow()
        .args(&["-o", "json", "repo", "list"])
        .passes()
        .stdout();
    let rows: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 1);
}

#[test]
fn remove_drops_a_registered_repo() {
    let project = Project::git();
    project.pairflow().args(&["repo", "add", "."]).passes();
    project.pairflow().args(&["repo", "remove", "."]).passes();

    let out = project.pairflow().args(&["repo", "list"]).passes().stdout();
    assert!(out.trim().is_empty());
}

#[test]
fn removing_an_unregistered_repo_fails() {
    let project = Project::git();
    project
        .pairflow()
        .args(&["repo", "remove", "."])
        .fails()
        .stderr_has("not a registered repository");
}

#[test]
fn bubble_list_with_no_explicit_repo_scans_every_registered_repo() {
    let project = Project::git();
    project.pairflow().args(&["repo", "add", "."]).passes();
    project
        .pairflow()
        .args(&["bubble", "create", "via-registry", "--repo", ".", "--task", "a"])
        .passes();

    project
        .pairflow()
        .args(&["bubble", "list"])
        .passes()
        .stdout_has("via-registry");
}
