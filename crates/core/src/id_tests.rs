use super::*;

#[test]
fn display_round_trips_through_string() {
    let id = BubbleId::new("fix-login-bug");
    assert_eq!(id.to_string(), "fix-login-bug");
    assert_eq!(id.as_str(), "fix-login-bug");
}

#[test]
fn distinct_id_types_do_not_compare_equal_by_accident() {
    let a = BubbleId::new("abc");
    let b = BubbleId::from("abc");
    assert_eq!(a, b);
}

#[test]
fn serializes_as_bare_string() {
    let id = IntentId::new("intent-1");
    let json = serde_json::to_string(&id).expect("serialize");
    assert_eq!(json, "\"intent-1\"");
    let back: IntentId = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, id);
}
