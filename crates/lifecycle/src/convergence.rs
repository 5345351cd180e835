// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The review-evidence classifier (§4.6): a pure function deciding whether
//! a reviewer pass may skip re-running `test_command`/`typecheck_command`
//! because the transcript already carries trustworthy evidence that they
//! were run and passed.

use std::path::{Path, PathBuf};

use pf_adapters::git::WorktreeFingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceStatus {
    Trusted,
    Untrusted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceDecision {
    SkipFullRerun,
    RunChecks,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceReport {
    pub status: EvidenceStatus,
    pub decision: EvidenceDecision,
    pub reason_code: String,
    pub reason_detail: String,
}

const SUCCESS_MARKERS: &[&str] = &["exit 0", "exit code: 0", "0 failed", "passed", "all tests passed"];
const COMPLETION_MARKERS: &[&str] = &["finished", "completed", "done"];
const FAILURE_MARKERS: &[&str] = &["exit 1", "failed", "error:", "non-zero exit", "traceback"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provenance {
    RefBacked,
    SummaryOnly,
}

struct CommandMatch {
    provenance: Provenance,
    has_success_or_completion: bool,
    has_failure: bool,
}

/// Resolves `raw_ref` against `worktree_root`, rejecting anything that
/// escapes containment (including through a symlink), per §4.6.
fn resolve_contained_ref(worktree_root: &Path, raw_ref: &str) -> Option<PathBuf> {
    let candidate = worktree_root.join(raw_ref);
    let canonical_root = worktree_root.canonicalize().ok()?;
    let canonical_candidate = candidate.canonicalize().ok()?;
    if canonical_candidate.starts_with(&canonical_root) {
        Some(canonical_candidate)
    } else {
        None
    }
}

fn window_around(text: &str, needle: &str, context_lines: usize) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let idx = lines.iter().position(|l| l.contains(needle))?;
    let end = (idx + 1 + context_lines).min(lines.len());
    Some(lines[idx..end].join("\n"))
}

fn classify_window(window: &str) -> (bool, bool) {
    let lower = window.to_lowercase();
    let has_failure = FAILURE_MARKERS.iter().any(|m| lower.contains(m));
    let has_success = SUCCESS_MARKERS
        .iter()
        .chain(COMPLETION_MARKERS)
        .any(|m| lower.contains(m));
    (has_success, has_failure)
}

fn find_command_match(
    command: &str,
    summary: &str,
    ref_texts: &[(String, String)],
) -> Option<CommandMatch> {
    for (_path, text) in ref_texts {
        if let Some(window) = window_around(text, command, 3) {
            let (has_success_or_completion, has_failure) = classify_window(&window);
            return Some(CommandMatch {
                provenance: Provenance::RefBacked,
                has_success_or_completion,
                has_failure,
            });
        }
    }
    if let Some(window) = window_around(summary, command, 3) {
        let (has_success_or_completion, has_failure) = classify_window(&window);
        return Some(CommandMatch {
            provenance: Provenance::SummaryOnly,
            has_success_or_completion,
            has_failure,
        });
    }
    None
}

fn untrusted(reason_code: &str, reason_detail: impl Into<String>) -> EvidenceReport {
    EvidenceReport {
        status: EvidenceStatus::Untrusted,
        decision: EvidenceDecision::RunChecks,
        reason_code: reason_code.to_string(),
        reason_detail: reason_detail.into(),
    }
}

/// Classifies whether `required_commands` are verified by ref-backed
/// evidence in `refs` (read relative to `worktree_root`) or `summary`.
///
/// `cached_fingerprint` is the fingerprint the evidence artifact was
/// trusted against last time (if any); `current_fingerprint` is freshly
/// computed. A mismatch forces a re-run regardless of textual evidence.
pub fn classify_review_evidence(
    summary: &str,
    refs: &[String],
    required_commands: &[String],
    worktree_root: &Path,
    cached_fingerprint: Option<&WorktreeFingerprint>,
    current_fingerprint: &WorktreeFingerprint,
) -> EvidenceReport {
    if let Some(cached) = cached_fingerprint {
        if cached != current_fingerprint {
            return untrusted(
                "stale_fingerprint",
                "worktree changed since the evidence artifact was trusted; re-run required",
            );
        }
    }

    if required_commands.is_empty() {
        return EvidenceReport {
            status: EvidenceStatus::Trusted,
            decision: EvidenceDecision::SkipFullRerun,
            reason_code: "no_required_commands".into(),
            reason_detail: "no test/typecheck command configured".into(),
        };
    }

    let ref_texts: Vec<(String, String)> = refs
        .iter()
        .filter_map(|raw| {
            let resolved = resolve_contained_ref(worktree_root, raw)?;
            let text = std::fs::read_to_string(&resolved).ok()?;
            Some((raw.clone(), text))
        })
        .collect();

    let mut any_ref_invocation = false;
    let mut any_summary_only_verified = false;

    for command in required_commands {
        let Some(m) = find_command_match(command, summary, &ref_texts) else {
            return untrusted(
                "no_evidence",
                format!("no evidence found for required command `{command}`"),
            );
        };

        if m.has_failure {
            return untrusted(
                "failure_marker",
                format!("evidence for `{command}` contains a failure marker"),
            );
        }
        if !m.has_success_or_completion {
            return untrusted(
                "no_completion_marker",
                format!("evidence for `{command}` has neither a success nor completion marker"),
            );
        }

        match m.provenance {
            Provenance::RefBacked => any_ref_invocation = true,
            Provenance::SummaryOnly => any_summary_only_verified = true,
        }
    }

    if any_summary_only_verified {
        return untrusted(
            "mixed_provenance",
            "at least one required command was only verified via summary text, not a ref",
        );
    }
    if !any_ref_invocation {
        return untrusted(
            "no_ref_invocation",
            "no ref contains the actual command invocation",
        );
    }

    EvidenceReport {
        status: EvidenceStatus::Trusted,
        decision: EvidenceDecision::SkipFullRerun,
        reason_code: "ref_backed_success".into(),
        reason_detail: "all required commands verified via ref-backed evidence".into(),
    }
}
