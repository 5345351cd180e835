use super::*;
use pf_core::envelope::Decision as EnvDecision;
use tempfile::tempdir;

fn draft(bubble_id: &str, envelope_type: EnvelopeType, payload: Payload) -> DraftEnvelope {
    DraftEnvelope {
        bubble_id: BubbleId::new(bubble_id),
        sender: Recipient::Orchestrator,
        recipient: Recipient::Implementer,
        envelope_type,
        round: 0,
        payload,
        refs: vec![],
    }
}

fn task_payload() -> Payload {
    Payload {
        summary: Some("task summary".into()),
        ..Default::default()
    }
}

#[test]
fn append_allocates_sequential_ids() {
    let dir = tempdir().expect("tempdir");
    let transcript = dir.path().join("transcript.ndjson");
    let lock = dir.path().join("b.lock");

    let (env1, seq1) = append(
        &transcript,
        None,
        &lock,
        draft("fix-login-bug", EnvelopeType::Task, task_payload()),
        1_700_000_000_000,
        LockOptions::default(),
        false,
    )
    .expect("append 1");
    assert_eq!(seq1, 1);
    assert!(env1.id.to_string().ends_with("_001"));

    let (env2, seq2) = append(
        &transcript,
        None,
        &lock,
        draft("fix-login-bug", EnvelopeType::Pass, task_payload()),
        1_700_000_000_000,
        LockOptions::default(),
        false,
    )
    .expect("append 2");
    assert_eq!(seq2, 2);
    assert!(env2.id.to_string().ends_with("_002"));
}

#[test]
fn append_rejects_mismatched_bubble_id() {
    let dir = tempdir().expect("tempdir");
    let transcript = dir.path().join("transcript.ndjson");
    let lock = dir.path().join("b.lock");

    append(
        &transcript,
        None,
        &lock,
        draft("fix-login-bug", EnvelopeType::Task, task_payload()),
        0,
        LockOptions::default(),
        false,
    )
    .expect("append 1");

    let err = append(
        &transcript,
        None,
        &lock,
        draft("other-bubble", EnvelopeType::Task, task_payload()),
        0,
        LockOptions::default(),
        false,
    )
    .unwrap_err();
    assert!(matches!(err, TranscriptError::Validation(_)));
}

#[test]
fn corrupt_trailing_partial_line_is_recovered_on_read() {
    let dir = tempdir().expect("tempdir");
    let transcript = dir.path().join("transcript.ndjson");
    let lock = dir.path().join("b.lock");

    append(
        &transcript,
        None,
        &lock,
        draft("fix-login-bug", EnvelopeType::Task, task_payload()),
        0,
        LockOptions::default(),
        false,
    )
    .expect("append 1");

    // Simulate a crash mid-write: a trailing line with no closing brace.
    let mut f = OpenOptions::new().append(true).open(&transcript).expect("open");
    f.write_all(b"{\"id\":\"msg_2026").expect("write garbage");

    let envelopes = read(
        &transcript,
        ReadOptions {
            allow_missing: false,
            tolerate_partial_tail: true,
            strict_audit: false,
        },
    )
    .expect("read recovers");
    assert_eq!(envelopes.len(), 1);

    // A subsequent append continues the sequence contiguously.
    let (_env, seq) = append(
        &transcript,
        None,
        &lock,
        draft("fix-login-bug", EnvelopeType::Pass, task_payload()),
        0,
        LockOptions::default(),
        false,
    )
    .expect("append after recovery");
    assert_eq!(seq, 2);
}

#[test]
fn mirrored_types_land_in_inbox_others_do_not() {
    let dir = tempdir().expect("tempdir");
    let transcript = dir.path().join("transcript.ndjson");
    let inbox = dir.path().join("inbox.ndjson");
    let lock = dir.path().join("b.lock");

    append(
        &transcript,
        Some(&inbox),
        &lock,
        draft("fix-login-bug", EnvelopeType::Task, task_payload()),
        0,
        LockOptions::default(),
        false,
    )
    .expect("task append");

    append(
        &transcript,
        Some(&inbox),
        &lock,
        draft(
            "fix-login-bug",
            EnvelopeType::ApprovalDecision,
            Payload {
                decision: Some(EnvDecision::Approve),
                ..Default::default()
            },
        ),
        0,
        LockOptions::default(),
        false,
    )
    .expect("approval append");

    let inbox_envelopes = read(
        &inbox,
        ReadOptions {
            allow_missing: true,
            tolerate_partial_tail: true,
            strict_audit: false,
        },
    )
    .expect("read inbox");
    assert_eq!(inbox_envelopes.len(), 1);
    assert_eq!(inbox_envelopes[0].envelope_type, EnvelopeType::ApprovalDecision);
}

#[test]
fn strict_audit_detects_sequence_gap() {
    let dir = tempdir().expect("tempdir");
    let transcript = dir.path().join("transcript.ndjson");
    fs::write(
        &transcript,
        "{\"id\":\"msg_20260101_001\",\"ts\":\"2026-01-01T00:00:00Z\",\"bubble_id\":\"b\",\"sender\":\"orchestrator\",\"recipient\":\"implementer\",\"type\":\"TASK\",\"round\":0,\"payload\":{},\"refs\":[]}\n\
         {\"id\":\"msg_20260101_003\",\"ts\":\"2026-01-01T00:00:01Z\",\"bubble_id\":\"b\",\"sender\":\"orchestrator\",\"recipient\":\"implementer\",\"type\":\"TASK\",\"round\":0,\"payload\":{},\"refs\":[]}\n",
    )
    .expect("write");

    let err = read(
        &transcript,
        ReadOptions {
            allow_missing: false,
            tolerate_partial_tail: false,
            strict_audit: true,
        },
    )
    .unwrap_err();
    assert!(matches!(err, TranscriptError::StrictAuditViolation { .. }));
}
