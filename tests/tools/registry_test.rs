//! Tests for closed-union tool dispatch and argument validation.

use fretcoach::store::Store;
use fretcoach::tools::{tool_definitions, ToolName, ToolRegistry};
use serde_json::json;
use sqlx::SqlitePool;

async fn registry() -> ToolRegistry {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    let store = Store::new(pool);
    store.migrate().await.expect("migration");
    ToolRegistry::new(store)
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_tool_is_a_typed_error() {
    let registry = registry().await;
    let result = registry.execute("launch_missiles", &json!({})).await;
    assert!(result.is_error);
    assert_eq!(result.content, "unknown tool: launch_missiles");
}

#[test]
fn tool_name_parse_covers_the_closed_set() {
    assert_eq!(
        ToolName::parse("get_database_schema").expect("known"),
        ToolName::GetSchema
    );
    assert_eq!(
        ToolName::parse("execute_sql_query").expect("known"),
        ToolName::ExecuteQuery
    );
    assert_eq!(
        ToolName::parse("save_practice_plan").expect("known"),
        ToolName::SavePlan
    );
    assert!(ToolName::parse("anything_else").is_err());
}

#[test]
fn definitions_match_the_closed_set() {
    let defs = tool_definitions();
    let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "get_database_schema",
            "execute_sql_query",
            "save_practice_plan"
        ]
    );
}

// ---------------------------------------------------------------------------
// get_database_schema
// ---------------------------------------------------------------------------

#[tokio::test]
async fn schema_tool_returns_both_tables() {
    let registry = registry().await;
    let result = registry.execute("get_database_schema", &json!({})).await;
    assert!(!result.is_error);
    assert!(result.content.contains("Table: sessions"));
    assert!(result.content.contains("Table: practice_plans"));
    assert!(result.content.contains("pitch_accuracy"));
}

// ---------------------------------------------------------------------------
// execute_sql_query
// ---------------------------------------------------------------------------

#[tokio::test]
async fn query_tool_requires_query_argument() {
    let registry = registry().await;
    let result = registry.execute("execute_sql_query", &json!({})).await;
    assert!(result.is_error);
    assert!(result.content.contains("missing required field: query"));
}

#[tokio::test]
async fn empty_result_set_is_success_with_zero_rows() {
    let registry = registry().await;
    let result = registry
        .execute(
            "execute_sql_query",
            &json!({"query": "SELECT * FROM sessions WHERE user_id = 'nobody'"}),
        )
        .await;
    assert!(!result.is_error);
    let parsed: serde_json::Value = serde_json::from_str(&result.content).expect("json result");
    assert_eq!(parsed["success"], true);
    assert_eq!(parsed["row_count"], 0);
    assert_eq!(parsed["data"], json!([]));
}

#[tokio::test]
async fn query_tool_returns_normalized_rows() {
    let registry = registry().await;
    let store = registry.store().clone();
    sqlx::query(
        "INSERT INTO sessions (session_id, user_id, start_timestamp, pitch_accuracy) \
         VALUES ('s1', 'u1', '2026-02-01 08:00:00', 55.0)",
    )
    .execute(store.pool())
    .await
    .expect("seed");

    let result = registry
        .execute(
            "execute_sql_query",
            &json!({"query": "SELECT start_timestamp, pitch_accuracy FROM sessions \
                              WHERE user_id = 'u1'"}),
        )
        .await;
    assert!(!result.is_error);
    let parsed: serde_json::Value = serde_json::from_str(&result.content).expect("json result");
    assert_eq!(parsed["row_count"], 1);
    assert_eq!(parsed["data"][0]["start_timestamp"], "2026-02-01T08:00:00");
    assert_eq!(parsed["data"][0]["pitch_accuracy"], 55.0);
}

// ---------------------------------------------------------------------------
// save_practice_plan
// ---------------------------------------------------------------------------

#[tokio::test]
async fn save_plan_tool_mints_id_and_persists() {
    let registry = registry().await;
    let plan = json!({
        "focus_area": "Timing Stability",
        "current_score": 62.0,
        "suggested_scale": "A minor",
        "suggested_scale_type": "natural minor",
        "session_target": "20 minutes",
        "exercises": ["metronome at 60bpm", "quarter-note runs"]
    });

    let result = registry
        .execute(
            "save_practice_plan",
            &json!({"user_id": "u1", "plan": plan}),
        )
        .await;
    assert!(!result.is_error);
    let parsed: serde_json::Value = serde_json::from_str(&result.content).expect("json result");
    assert_eq!(parsed["success"], true);
    let plan_id = parsed["plan_id"].as_str().expect("plan id");

    let check = registry
        .execute(
            "execute_sql_query",
            &json!({"query": format!(
                "SELECT user_id FROM practice_plans WHERE practice_id = '{plan_id}'"
            )}),
        )
        .await;
    let rows: serde_json::Value = serde_json::from_str(&check.content).expect("json result");
    assert_eq!(rows["row_count"], 1);
    assert_eq!(rows["data"][0]["user_id"], "u1");
}

#[tokio::test]
async fn save_plan_tool_validates_arguments() {
    let registry = registry().await;
    let result = registry
        .execute("save_practice_plan", &json!({"plan": {}}))
        .await;
    assert!(result.is_error);
    assert!(result.content.contains("missing required field: user_id"));

    let result = registry
        .execute("save_practice_plan", &json!({"user_id": "u1"}))
        .await;
    assert!(result.is_error);
    assert!(result.content.contains("missing required field: plan"));
}

/// Each distinct generated id means two saves never collide.
#[tokio::test]
async fn save_plan_generates_fresh_ids_per_call() {
    let registry = registry().await;
    let args = json!({"user_id": "u1", "plan": {"note": "minimal"}});

    let first = registry.execute("save_practice_plan", &args).await;
    let second = registry.execute("save_practice_plan", &args).await;
    assert!(!first.is_error);
    assert!(!second.is_error);

    let id_of = |content: &str| -> String {
        serde_json::from_str::<serde_json::Value>(content).expect("json")["plan_id"]
            .as_str()
            .expect("id")
            .to_owned()
    };
    assert_ne!(id_of(&first.content), id_of(&second.content));
}
