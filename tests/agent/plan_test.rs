//! Tests for plan detection, confirmation matching, and the pending store.

use fretcoach::agent::plan::{
    detect_plan, is_confirmation, MemoryPendingPlans, PendingPlan, PendingPlans, PlanBody,
};
use serde_json::json;

fn sample_body() -> PlanBody {
    PlanBody {
        focus_area: "Pitch Accuracy".to_owned(),
        current_score: 58.4,
        suggested_scale: "C minor".to_owned(),
        suggested_scale_type: "natural minor".to_owned(),
        session_target: "15-20 minutes".to_owned(),
        exercises: vec!["slow chromatic runs".to_owned(), "interval drills".to_owned()],
    }
}

fn confirmation_words() -> Vec<String> {
    fretcoach::config::PlansConfig::default().confirmation_words
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[test]
fn detects_plan_embedded_in_prose() {
    let plan_json = serde_json::to_string_pretty(&sample_body()).expect("encode");
    let text = format!(
        "Based on your sessions, here is what I recommend:\n\n{plan_json}\n\nStick with it!"
    );
    let detected = detect_plan(&text).expect("plan should be found");
    assert_eq!(detected, sample_body());
}

#[test]
fn detection_requires_every_mandatory_field() {
    // "exercises" present but "focus_area" missing: not a plan.
    let text = json!({
        "current_score": 60.0,
        "suggested_scale": "G major",
        "suggested_scale_type": "major",
        "session_target": "10 minutes",
        "exercises": ["x"]
    })
    .to_string();
    assert!(detect_plan(&text).is_none());
}

#[test]
fn detection_tolerates_unknown_extra_fields() {
    let mut value = serde_json::to_value(sample_body()).expect("encode");
    value["extra_note"] = json!("ignore me");
    assert_eq!(detect_plan(&value.to_string()), Some(sample_body()));
}

#[test]
fn malformed_json_is_no_plan_not_a_crash() {
    assert!(detect_plan("{ \"exercises\": [unclosed").is_none());
    assert!(detect_plan("no braces here at all").is_none());
}

#[test]
fn braces_inside_strings_do_not_unbalance_the_scan() {
    let mut body = sample_body();
    body.session_target = "about {15} minutes".to_owned();
    let text = format!(
        "note the odd target:\n{}",
        serde_json::to_string(&body).expect("encode")
    );
    assert_eq!(detect_plan(&text), Some(body));
}

#[test]
fn first_parsable_object_wins() {
    let first = sample_body();
    let mut second = sample_body();
    second.focus_area = "Timing Stability".to_owned();
    let text = format!(
        "{}\n---\n{}",
        serde_json::to_string(&first).expect("encode"),
        serde_json::to_string(&second).expect("encode"),
    );
    assert_eq!(detect_plan(&text), Some(first));
}

// ---------------------------------------------------------------------------
// Confirmation matching
// ---------------------------------------------------------------------------

#[test]
fn affirmative_messages_confirm() {
    let words = confirmation_words();
    assert!(is_confirmation("yes please save it", &words));
    assert!(is_confirmation("OKAY", &words));
    assert!(is_confirmation("Sure, go ahead", &words));
}

#[test]
fn unrelated_messages_do_not_confirm() {
    let words = confirmation_words();
    assert!(!is_confirmation("what about my timing?", &words));
    assert!(!is_confirmation("not now", &words));
}

// ---------------------------------------------------------------------------
// Pending store
// ---------------------------------------------------------------------------

#[test]
fn at_most_one_pending_plan_per_conversation() {
    let store = MemoryPendingPlans::new();
    let first = PendingPlan::new("conv-1".to_owned(), "u1".to_owned(), sample_body());
    let first_id = first.plan_id.clone();
    store.put(first);

    let mut replacement_body = sample_body();
    replacement_body.focus_area = "Timing Stability".to_owned();
    let second = PendingPlan::new("conv-1".to_owned(), "u1".to_owned(), replacement_body.clone());
    let second_id = second.plan_id.clone();
    store.put(second);

    let held = store.get("conv-1").expect("entry present");
    assert_eq!(held.plan_id, second_id);
    assert_eq!(held.body, replacement_body);
    // The replaced entry is gone entirely, including by-id lookup.
    assert!(store.find_by_plan_id(&first_id).is_none());
}

#[test]
fn plan_ids_are_unique_across_entries() {
    let a = PendingPlan::new("c1".to_owned(), "u1".to_owned(), sample_body());
    let b = PendingPlan::new("c1".to_owned(), "u1".to_owned(), sample_body());
    assert_ne!(a.plan_id, b.plan_id);
}

#[test]
fn lookup_and_removal_by_plan_id() {
    let store = MemoryPendingPlans::new();
    let plan = PendingPlan::new("conv-9".to_owned(), "u2".to_owned(), sample_body());
    let plan_id = plan.plan_id.clone();
    store.put(plan);

    let found = store.find_by_plan_id(&plan_id).expect("found by id");
    assert_eq!(found.conversation_key, "conv-9");

    let removed = store.remove_by_plan_id(&plan_id).expect("removed");
    assert_eq!(removed.plan_id, plan_id);

    // Second removal by the same id finds nothing (idempotent commits).
    assert!(store.remove_by_plan_id(&plan_id).is_none());
    assert!(store.get("conv-9").is_none());
}

#[test]
fn removal_by_conversation_key() {
    let store = MemoryPendingPlans::new();
    store.put(PendingPlan::new(
        "conv-1".to_owned(),
        "u1".to_owned(),
        sample_body(),
    ));
    assert!(store.remove("conv-1").is_some());
    assert!(store.remove("conv-1").is_none());
}
