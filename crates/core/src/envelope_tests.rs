use super::*;

fn base(envelope_type: EnvelopeType, payload: Payload) -> Envelope {
    Envelope {
        id: format_envelope_id("20260101", 1),
        ts: "2026-01-01T00:00:00Z".into(),
        bubble_id: BubbleId::new("fix-login-bug"),
        sender: Recipient::Implementer,
        recipient: Recipient::Reviewer,
        envelope_type,
        round: 1,
        payload,
        refs: vec![],
    }
}

#[test]
fn envelope_id_zero_pads_to_three_digits() {
    assert_eq!(format_envelope_id("20260101", 1).to_string(), "msg_20260101_001");
    assert_eq!(format_envelope_id("20260101", 42).to_string(), "msg_20260101_042");
}

#[test]
fn envelope_id_widens_without_truncation_past_1000() {
    assert_eq!(format_envelope_id("20260101", 1000).to_string(), "msg_20260101_1000");
}

#[test]
fn pass_requires_non_empty_summary() {
    let env = base(EnvelopeType::Pass, Payload::default());
    assert!(env.validate().is_err());

    let env = base(
        EnvelopeType::Pass,
        Payload {
            summary: Some("did the thing".into()),
            ..Default::default()
        },
    );
    assert!(env.validate().is_ok());
}

#[test]
fn human_question_requires_question_text() {
    let env = base(EnvelopeType::HumanQuestion, Payload::default());
    assert!(env.validate().is_err());
}

#[test]
fn approval_decision_requires_decision() {
    let env = base(EnvelopeType::ApprovalDecision, Payload::default());
    assert!(env.validate().is_err());

    let env = base(
        EnvelopeType::ApprovalDecision,
        Payload {
            decision: Some(Decision::Approve),
            ..Default::default()
        },
    );
    assert!(env.validate().is_ok());
}

#[test]
fn empty_refs_entries_are_rejected() {
    let mut env = base(
        EnvelopeType::Task,
        Payload::default(),
    );
    env.refs = vec!["".into()];
    assert!(env.validate().is_err());
}

#[test]
fn serialize_then_parse_round_trips() {
    let env = base(
        EnvelopeType::Pass,
        Payload {
            summary: Some("impl pass 1".into()),
            findings: vec![Finding {
                severity: Severity::P2,
                title: "minor nit".into(),
                detail: None,
                code: None,
                refs: vec![],
            }],
            ..Default::default()
        },
    );
    let json = serde_json::to_string(&env).expect("serialize");
    let back: Envelope = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back.id, env.id);
    assert_eq!(back.payload.summary, env.payload.summary);
    assert_eq!(back.payload.findings.len(), 1);
}

#[test]
fn unknown_payload_keys_are_rejected() {
    let raw = r#"{"summary":"x","bogus_field":true}"#;
    let parsed: Result<Payload, _> = serde_json::from_str(raw);
    assert!(parsed.is_err());
}
