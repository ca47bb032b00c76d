//! End-to-end turn handler tests: plan lifecycle across turns, fallback on
//! rate limiting, degraded outcomes, and the chart collaborator contract.

use std::sync::Arc;

use fretcoach::agent::plan::{MemoryPendingPlans, PendingPlans, PlanBody, PlanCommitError};
use fretcoach::agent::turn::detect_intent;
use fretcoach::agent::{PlanStatus, QueryIntent, TurnHandler, TurnMessage, TurnRequest};
use fretcoach::config::Config;
use fretcoach::providers::gateway::ModelGateway;
use fretcoach::providers::Role;
use fretcoach::store::Store;
use serde_json::json;
use sqlx::SqlitePool;

use crate::mock_provider::{MockProvider, MockReply};

struct Harness {
    handler: TurnHandler,
    store: Store,
    pending: Arc<MemoryPendingPlans>,
    primary: Arc<MockProvider>,
    fallback: Arc<MockProvider>,
}

async fn harness(primary_replies: Vec<MockReply>, fallback_replies: Vec<MockReply>) -> Harness {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    let store = Store::new(pool);
    store.migrate().await.expect("migration");

    let primary = MockProvider::new("gemini/mock-primary", primary_replies);
    let fallback = MockProvider::new("anthropic/mock-fallback", fallback_replies);
    let gateway = ModelGateway::for_testing(primary.clone(), fallback.clone());

    let pending = Arc::new(MemoryPendingPlans::new());
    let handler = TurnHandler::new(
        gateway,
        store.clone(),
        pending.clone(),
        Arc::new(Config::default()),
        None,
    );

    Harness {
        handler,
        store,
        pending,
        primary,
        fallback,
    }
}

fn user_turn(content: &str) -> TurnRequest {
    TurnRequest {
        messages: vec![TurnMessage {
            role: "user".to_owned(),
            content: content.to_owned(),
        }],
        user_id: "u1".to_owned(),
        conversation_id: Some("conv-1".to_owned()),
    }
}

fn sample_plan_json() -> String {
    json!({
        "focus_area": "Pitch Accuracy",
        "current_score": 58.4,
        "suggested_scale": "C minor",
        "suggested_scale_type": "natural minor",
        "session_target": "15-20 minutes",
        "exercises": ["slow chromatic runs", "interval drills"]
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Plan lifecycle across turns (Scenario C)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn detected_plan_becomes_pending_then_saved_on_confirmation() {
    let answer = format!("Here is your plan:\n{}", sample_plan_json());
    let h = harness(
        vec![
            MockReply::Text(answer),
            MockReply::Text("Great, glad you like it!".to_owned()),
        ],
        vec![],
    )
    .await;

    // Turn 1: a plan is embedded in the final answer.
    let outcome = h.handler.handle_turn(user_turn("make me a plan")).await;
    assert_eq!(outcome.plan_status, PlanStatus::Pending);
    let plan_id = outcome.pending_plan_id.clone().expect("pending id");
    assert!(h.pending.get("conv-1").is_some());
    assert!(outcome.final_answer.contains("say \"save\" to keep it"));

    // Turn 2: affirmative message commits the pending plan before the loop.
    let outcome = h
        .handler
        .handle_turn(user_turn("yes please save it"))
        .await;
    assert_eq!(outcome.plan_status, PlanStatus::Saved);
    assert!(h.pending.get("conv-1").is_none());

    // Round-trip: the durable body equals the originally detected body.
    let rows = h
        .store
        .run_query(&format!(
            "SELECT practice_plan FROM practice_plans WHERE practice_id = '{plan_id}'"
        ))
        .await
        .expect("query");
    assert_eq!(rows.len(), 1);
    let stored: PlanBody =
        serde_json::from_str(rows[0]["practice_plan"].as_str().expect("body text"))
            .expect("stored body parses");
    let expected: PlanBody = serde_json::from_str(&sample_plan_json()).expect("sample parses");
    assert_eq!(stored, expected);
}

#[tokio::test]
async fn confirmation_without_pending_plan_is_a_plain_turn() {
    let h = harness(
        vec![MockReply::Text("nothing pending here".to_owned())],
        vec![],
    )
    .await;
    let outcome = h.handler.handle_turn(user_turn("yes")).await;
    assert_eq!(outcome.plan_status, PlanStatus::None);
    assert!(outcome.success);
}

#[tokio::test]
async fn new_detection_replaces_prior_pending_entry() {
    let first = format!("plan A:\n{}", sample_plan_json());
    let second_body = json!({
        "focus_area": "Timing Stability",
        "current_score": 61.0,
        "suggested_scale": "G major",
        "suggested_scale_type": "major",
        "session_target": "25 minutes",
        "exercises": ["metronome work"]
    });
    let second = format!("plan B:\n{second_body}");

    let h = harness(
        vec![MockReply::Text(first), MockReply::Text(second)],
        vec![],
    )
    .await;

    let one = h.handler.handle_turn(user_turn("plan?")).await;
    // "another" avoids the confirmation word set, so turn 2 re-detects.
    let two = h.handler.handle_turn(user_turn("another idea, different focus")).await;

    assert_ne!(one.pending_plan_id, two.pending_plan_id);
    let held = h.pending.get("conv-1").expect("entry present");
    assert_eq!(Some(held.plan_id), two.pending_plan_id);
    assert_eq!(held.body.focus_area, "Timing Stability");
}

#[tokio::test]
async fn tool_driven_save_reports_saved_without_pending_entry() {
    let h = harness(
        vec![
            MockReply::ToolCalls(vec![(
                "save_practice_plan".to_owned(),
                json!({"user_id": "u1", "plan": {"focus_area": "Timing"}}),
            )]),
            MockReply::Text("Saved it for you.".to_owned()),
        ],
        vec![],
    )
    .await;

    let outcome = h.handler.handle_turn(user_turn("save a plan for me")).await;
    assert_eq!(outcome.plan_status, PlanStatus::Saved);
    assert!(outcome.pending_plan_id.is_none());
    assert!(h.pending.get("conv-1").is_none());
}

// ---------------------------------------------------------------------------
// Direct save path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn commit_by_plan_id_is_idempotent() {
    let answer = format!("plan:\n{}", sample_plan_json());
    let h = harness(vec![MockReply::Text(answer)], vec![]).await;

    let outcome = h.handler.handle_turn(user_turn("make me a plan")).await;
    let plan_id = outcome.pending_plan_id.expect("pending id");

    h.handler
        .commit_pending_plan(&plan_id)
        .await
        .expect("first commit succeeds");
    assert!(h.store.plan_exists(&plan_id).await.expect("exists"));
    assert!(h.pending.get("conv-1").is_none());

    // Second commit by the same id: entry is gone, no duplicate record.
    let err = h
        .handler
        .commit_pending_plan(&plan_id)
        .await
        .expect_err("second commit finds nothing");
    assert!(matches!(err, PlanCommitError::NotFound));
}

#[tokio::test]
async fn commit_unknown_plan_id_is_not_found() {
    let h = harness(vec![], vec![]).await;
    let err = h
        .handler
        .commit_pending_plan("no-such-plan")
        .await
        .expect_err("unknown id");
    assert!(matches!(err, PlanCommitError::NotFound));
}

// ---------------------------------------------------------------------------
// Fallback on rate limiting (Scenario D)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rate_limited_primary_retries_whole_turn_on_fallback() {
    let h = harness(
        vec![MockReply::RateLimited],
        vec![MockReply::Text("fallback answer".to_owned())],
    )
    .await;

    let outcome = h.handler.handle_turn(user_turn("hello")).await;
    assert!(outcome.success);
    assert_eq!(outcome.final_answer, "fallback answer");
    assert_eq!(outcome.model_used, "anthropic/mock-fallback");
    assert_eq!(h.primary.requests().len(), 1);
    assert_eq!(h.fallback.requests().len(), 1);
}

#[tokio::test]
async fn fallback_restarts_without_partial_tool_results() {
    // Primary completes a tool round, then rate-limits mid-turn. The
    // fallback must see the original input only — no tool history.
    let h = harness(
        vec![
            MockReply::ToolCalls(vec![("get_database_schema".to_owned(), json!({}))]),
            MockReply::RateLimited,
        ],
        vec![MockReply::Text("fresh start".to_owned())],
    )
    .await;

    let outcome = h.handler.handle_turn(user_turn("analyze me")).await;
    assert!(outcome.success);
    assert_eq!(outcome.final_answer, "fresh start");
    // Discarded partial tool results do not surface in the outcome.
    assert!(outcome.tool_results.is_empty());

    let fallback_requests = h.fallback.requests();
    assert_eq!(fallback_requests.len(), 1);
    let messages = &fallback_requests[0].messages;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
}

#[tokio::test]
async fn non_rate_limit_failure_degrades_without_fallback() {
    let h = harness(vec![MockReply::Error], vec![]).await;
    let outcome = h.handler.handle_turn(user_turn("hello")).await;
    assert!(!outcome.success);
    assert!(outcome.final_answer.contains("I apologize"));
    assert!(h.fallback.requests().is_empty());
}

#[tokio::test]
async fn rate_limited_fallback_degrades_gracefully() {
    let h = harness(vec![MockReply::RateLimited], vec![MockReply::RateLimited]).await;
    let outcome = h.handler.handle_turn(user_turn("hello")).await;
    assert!(!outcome.success);
    assert!(outcome.final_answer.contains("I apologize"));
}

// ---------------------------------------------------------------------------
// Prompt sizing across turns (Scenario B)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn detailed_instructions_only_on_first_turn() {
    let h = harness(
        vec![
            MockReply::Text("first answer".to_owned()),
            MockReply::Text("second answer".to_owned()),
        ],
        vec![],
    )
    .await;

    h.handler.handle_turn(user_turn("turn one")).await;
    h.handler.handle_turn(user_turn("turn two, unrelated")).await;

    let requests = h.primary.requests();
    assert_eq!(requests.len(), 2);
    let first_system = requests[0].system.as_deref().expect("system prompt");
    let second_system = requests[1].system.as_deref().expect("system prompt");
    assert!(first_system.contains("DETAILED INSTRUCTIONS"));
    assert!(!second_system.contains("DETAILED INSTRUCTIONS"));
    assert!(second_system.contains("AI guitar practice coach"));
}

#[tokio::test]
async fn checkpoint_drives_replay_so_history_is_not_doubled() {
    let h = harness(
        vec![
            MockReply::Text("answer one".to_owned()),
            MockReply::Text("answer two".to_owned()),
        ],
        vec![],
    )
    .await;

    // Caller resends full history each turn, like the original front end.
    h.handler.handle_turn(user_turn("first question")).await;
    h.handler
        .handle_turn(TurnRequest {
            messages: vec![
                TurnMessage {
                    role: "user".to_owned(),
                    content: "first question".to_owned(),
                },
                TurnMessage {
                    role: "assistant".to_owned(),
                    content: "answer one".to_owned(),
                },
                TurnMessage {
                    role: "user".to_owned(),
                    content: "second question".to_owned(),
                },
            ],
            user_id: "u1".to_owned(),
            conversation_id: Some("conv-1".to_owned()),
        })
        .await;

    let requests = h.primary.requests();
    // Turn 2 sees checkpointed turn 1 plus ONLY the newest caller message.
    let second_turn_messages = &requests[1].messages;
    assert_eq!(second_turn_messages.len(), 3);
    assert_eq!(
        second_turn_messages[2].content.text(),
        "second question"
    );
}

// ---------------------------------------------------------------------------
// Chart collaborator contract
// ---------------------------------------------------------------------------

#[tokio::test]
async fn query_rows_and_intent_ride_on_the_outcome() {
    let h = harness(
        vec![
            MockReply::ToolCalls(vec![(
                "execute_sql_query".to_owned(),
                json!({"query": "SELECT pitch_accuracy FROM sessions WHERE user_id = 'u1'"}),
            )]),
            MockReply::Text("your accuracy is trending up".to_owned()),
        ],
        vec![],
    )
    .await;

    sqlx::query(
        "INSERT INTO sessions (session_id, user_id, pitch_accuracy) VALUES ('s1', 'u1', 72.5)",
    )
    .execute(h.store.pool())
    .await
    .expect("seed");

    let outcome = h
        .handler
        .handle_turn(user_turn("show my progress over time"))
        .await;
    assert_eq!(outcome.intent, Some(QueryIntent::Trend));
    assert_eq!(outcome.query_rows.len(), 1);
    assert_eq!(outcome.query_rows[0]["pitch_accuracy"], 72.5);
    assert_eq!(outcome.tool_results.len(), 1);
    assert_eq!(outcome.tool_results[0].tool_name, "execute_sql_query");
}

#[test]
fn intent_detection_matches_keyword_sets() {
    assert_eq!(detect_intent("show my progress"), Some(QueryIntent::Trend));
    assert_eq!(
        detect_intent("compare my latest session"),
        Some(QueryIntent::Comparison)
    );
    assert_eq!(detect_intent("what scale should I learn?"), None);
}
