// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Envelope & transcript store (§4.2): an append-only NDJSON log of
//! protocol envelopes, with append-then-fsync writes and corrupt-tail
//! recovery on read.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use pf_core::envelope::{format_envelope_id, Envelope, EnvelopeType, Payload, Recipient};
use pf_core::{BubbleId, PairflowError};
use thiserror::Error;

use crate::lock::{with_lock, LockError, LockOptions};

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("validation: {0}")]
    Validation(String),

    #[error(
        "strict audit: sequence gap or duplicate detected (expected {expected}, found {found})"
    )]
    StrictAuditViolation { expected: u64, found: u64 },
}

impl From<PairflowError> for TranscriptError {
    fn from(value: PairflowError) -> Self {
        TranscriptError::Validation(value.to_string())
    }
}

/// An envelope before its id/ts/sequence are assigned by `append`.
#[derive(Debug, Clone)]
pub struct DraftEnvelope {
    pub bubble_id: BubbleId,
    pub sender: Recipient,
    pub recipient: Recipient,
    pub envelope_type: EnvelopeType,
    pub round: u32,
    pub payload: Payload,
    pub refs: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    pub allow_missing: bool,
    pub tolerate_partial_tail: bool,
    pub strict_audit: bool,
}

fn utc_date_stamp(now_ms: i64) -> String {
    Utc.timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(Utc::now)
        .format("%Y%m%d")
        .to_string()
}

fn utc_iso(now_ms: i64) -> String {
    Utc.timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Returns the fully-parseable envelopes in the file plus whatever
/// corrupt-tail fragment (if any) was found, as raw bytes of the complete
/// lines (for rewriting). A "partial tail" is either a trailing line
/// missing its newline terminator or one that fails to parse as JSON.
fn scan(path: &Path) -> Result<(Vec<Envelope>, bool, Vec<u8>), TranscriptError> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((Vec::new(), false, Vec::new()))
        }
        Err(e) => return Err(e.into()),
    };
    let reader = BufReader::new(file);
    let mut envelopes = Vec::new();
    let mut good_bytes = Vec::new();
    let mut had_corrupt_tail = false;

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => {
                had_corrupt_tail = true;
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Envelope>(&line) {
            Ok(env) => {
                envelopes.push(env);
                good_bytes.extend_from_slice(line.as_bytes());
                good_bytes.push(b'\n');
            }
            Err(_) => {
                // Whether this is a crash-truncated tail or a genuine
                // mid-file corruption, the recipe is the same: rewind to
                // the last fully-parsed envelope and let the caller
                // re-append from there (§4.2).
                had_corrupt_tail = true;
                break;
            }
        }
    }
    Ok((envelopes, had_corrupt_tail, good_bytes))
}

/// Reads the transcript, recovering from a corrupt trailing partial line by
/// rewriting the file down to its last fully-parsed envelope first.
pub fn read(path: &Path, options: ReadOptions) -> Result<Vec<Envelope>, TranscriptError> {
    if !path.exists() {
        if options.allow_missing {
            return Ok(Vec::new());
        }
        return Err(TranscriptError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            path.display().to_string(),
        )));
    }
    let (envelopes, corrupt, good_bytes) = scan(path)?;
    if corrupt {
        if !options.tolerate_partial_tail {
            return Err(TranscriptError::Validation(format!(
                "corrupt trailing partial line in {}",
                path.display()
            )));
        }
        tracing::warn!(path = %path.display(), "corrupt trailing partial line; rewriting to last good envelope");
        atomic_write(path, &good_bytes)?;
    }
    if options.strict_audit {
        for (idx, env) in envelopes.iter().enumerate() {
            let expected_seq = (idx + 1) as u64;
            let found_seq = sequence_of(env);
            if found_seq != expected_seq {
                return Err(TranscriptError::StrictAuditViolation {
                    expected: expected_seq,
                    found: found_seq,
                });
            }
        }
    }
    Ok(envelopes)
}

fn sequence_of(env: &Envelope) -> u64 {
    env.id
        .as_str()
        .rsplit('_')
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0)
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), TranscriptError> {
    let tmp = path.with_extension("ndjson.tmp");
    {
        let mut f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Appends `draft` to the transcript at `transcript_path`, mirroring into
/// `mirror_path` (the inbox) when the envelope type is one of the mirrored
/// types, all serialised by `lock_path`. Returns the fully-formed envelope
/// and its sequence number.
#[allow(clippy::too_many_arguments)]
pub fn append(
    transcript_path: &Path,
    mirror_path: Option<&Path>,
    lock_path: &Path,
    draft: DraftEnvelope,
    now_ms: i64,
    lock_options: LockOptions,
    strict_audit: bool,
) -> Result<(Envelope, u64), TranscriptError> {
    let transcript_path = transcript_path.to_path_buf();
    let mirror_path = mirror_path.map(PathBuf::from);
    let result: Result<Result<(Envelope, u64), TranscriptError>, LockError> =
        with_lock(lock_path, lock_options, now_ms, move || {
            append_locked(&transcript_path, mirror_path.as_deref(), draft, now_ms, strict_audit)
        });
    result?
}

fn append_locked(
    transcript_path: &Path,
    mirror_path: Option<&Path>,
    draft: DraftEnvelope,
    now_ms: i64,
    strict_audit: bool,
) -> Result<(Envelope, u64), TranscriptError> {
    let options = ReadOptions {
        allow_missing: true,
        tolerate_partial_tail: true,
        strict_audit,
    };
    let existing = read(transcript_path, options)?;

    if let Some(first) = existing.first() {
        if existing.iter().any(|e| e.bubble_id != first.bubble_id) {
            return Err(TranscriptError::Validation(
                "all envelopes in a transcript must share the same bubble_id".into(),
            ));
        }
        if draft.bubble_id != first.bubble_id {
            return Err(TranscriptError::Validation(format!(
                "draft bubble_id {} does not match transcript bubble_id {}",
                draft.bubble_id, first.bubble_id
            )));
        }
    }

    let last_seq = existing.last().map(sequence_of).unwrap_or(0);
    let next_seq = last_seq + 1;
    let envelope = Envelope {
        id: format_envelope_id(&utc_date_stamp(now_ms), next_seq),
        ts: utc_iso(now_ms),
        bubble_id: draft.bubble_id,
        sender: draft.sender,
        recipient: draft.recipient,
        envelope_type: draft.envelope_type,
        round: draft.round,
        payload: draft.payload,
        refs: draft.refs,
    };
    envelope.validate()?;

    let mut line = serde_json::to_string(&envelope)?;
    line.push('\n');
    {
        let mut f = OpenOptions::new()
            .append(true)
            .create(true)
            .open(transcript_path)?;
        f.write_all(line.as_bytes())?;
        f.sync_all()?;
    }

    if let Some(mirror) = mirror_path {
        if is_mirrored(envelope.envelope_type) {
            // Best-effort: the transcript write above already succeeded and
            // is canonical; a mirror failure is logged, not propagated.
            if let Err(e) = append_mirror(mirror, &envelope) {
                tracing::warn!(error = %e, "inbox mirror write failed; transcript remains canonical");
            }
        }
    }

    Ok((envelope, next_seq))
}

fn is_mirrored(t: EnvelopeType) -> bool {
    matches!(
        t,
        EnvelopeType::HumanQuestion
            | EnvelopeType::HumanReply
            | EnvelopeType::ApprovalRequest
            | EnvelopeType::ApprovalDecision
    )
}

fn append_mirror(mirror_path: &Path, envelope: &Envelope) -> Result<(), TranscriptError> {
    let mut line = serde_json::to_string(envelope)?;
    line.push('\n');
    let mut f = OpenOptions::new()
        .append(true)
        .create(true)
        .open(mirror_path)?;
    f.write_all(line.as_bytes())?;
    f.sync_all()?;
    Ok(())
}

/// Rebuilds the inbox mirror from scratch by filtering the transcript,
/// usable after a mirror-write failure or for ad hoc repair.
pub fn rebuild_mirror(transcript_path: &Path, mirror_path: &Path) -> Result<(), TranscriptError> {
    let envelopes = read(
        transcript_path,
        ReadOptions {
            allow_missing: true,
            tolerate_partial_tail: true,
            strict_audit: false,
        },
    )?;
    let mut bytes = Vec::new();
    for env in envelopes.iter().filter(|e| is_mirrored(e.envelope_type)) {
        bytes.extend_from_slice(serde_json::to_string(env)?.as_bytes());
        bytes.push(b'\n');
    }
    atomic_write(mirror_path, &bytes)?;
    Ok(())
}

#[cfg(test)]
#[path = "transcript_tests.rs"]
mod tests;
