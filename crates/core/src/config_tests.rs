use super::*;
use yare::parameterized;

#[parameterized(
    plain = { "fix-login-bug", true },
    too_short = { "fx", false },
    starts_with_digit = { "1fix", false },
    uppercase = { "Fix-Bug", false },
    underscore_ok = { "fix_login", true },
)]
fn id_validation(id: &str, expected_ok: bool) {
    assert_eq!(BubbleConfig::validate_id(id).is_ok(), expected_ok);
}

#[test]
fn infers_code_for_implementation_tasks() {
    let t = BubbleConfig::infer_review_artifact_type("Implement fn parse() for the new endpoint");
    assert_eq!(t, ReviewArtifactType::Code);
}

#[test]
fn infers_document_for_writeup_tasks() {
    let t = BubbleConfig::infer_review_artifact_type("Write up the README and a migration doc page");
    assert_eq!(t, ReviewArtifactType::Document);
}

#[test]
fn ties_resolve_to_auto() {
    let t = BubbleConfig::infer_review_artifact_type("Look into this");
    assert_eq!(t, ReviewArtifactType::Auto);
}

fn sample_config() -> BubbleConfig {
    BubbleConfig {
        schema_version: 1,
        id: BubbleId::new("fix-login-bug"),
        bubble_instance_id: None,
        repo_path: PathBuf::from("/repo"),
        base_branch: "main".into(),
        bubble_branch: "pairflow/fix-login-bug".into(),
        implementer: "claude-impl".into(),
        reviewer: "claude-rev".into(),
        test_command: "cargo test".into(),
        typecheck_command: "cargo check".into(),
        watchdog_timeout_minutes: 30,
        max_rounds: 10,
        commit_requires_approval: true,
        quality_mode: QualityMode::Strict,
        review_artifact_type: ReviewArtifactType::Auto,
        local_overlay_policy: LocalOverlayPolicy::Deny,
        notifications_policy: NotificationsPolicy::All,
    }
}

#[test]
fn validate_rejects_same_agent_for_both_roles() {
    let mut cfg = sample_config();
    cfg.reviewer = cfg.implementer.clone();
    assert!(cfg.validate().is_err());
}

#[test]
fn validate_accepts_well_formed_config() {
    assert!(sample_config().validate().is_ok());
}
