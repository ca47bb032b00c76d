//! Tests for Gemini wire mapping.

use fretcoach::providers::gemini::{build_request, parse_response};
use fretcoach::providers::{
    CompletionRequest, ContentPart, Message, MessageContent, Role, StopReason, ToolDefinition,
};
use serde_json::json;

fn request_with(messages: Vec<Message>) -> CompletionRequest {
    CompletionRequest {
        messages,
        system: Some("be helpful".to_owned()),
        tools: vec![ToolDefinition {
            name: "execute_sql_query".to_owned(),
            description: "run a query".to_owned(),
            input_schema: json!({"type": "object"}),
        }],
        max_tokens: Some(512),
    }
}

#[test]
fn maps_roles_to_gemini_turns() {
    let request = request_with(vec![
        Message {
            role: Role::User,
            content: MessageContent::Text("hi".to_owned()),
        },
        Message {
            role: Role::Assistant,
            content: MessageContent::Text("hello".to_owned()),
        },
    ]);
    let wire = build_request(&request);
    assert_eq!(wire.contents[0].role.as_deref(), Some("user"));
    assert_eq!(wire.contents[1].role.as_deref(), Some("model"));
}

#[test]
fn system_prompt_becomes_system_instruction() {
    let request = request_with(vec![Message {
        role: Role::User,
        content: MessageContent::Text("hi".to_owned()),
    }]);
    let wire = build_request(&request);
    let system = wire.system_instruction.expect("system instruction");
    assert_eq!(system.parts[0]["text"], "be helpful");
}

#[test]
fn tools_become_function_declarations() {
    let request = request_with(vec![Message {
        role: Role::User,
        content: MessageContent::Text("hi".to_owned()),
    }]);
    let wire = build_request(&request);
    assert_eq!(wire.tools.len(), 1);
    assert_eq!(
        wire.tools[0].function_declarations[0].name,
        "execute_sql_query"
    );
}

#[test]
fn tool_result_part_becomes_function_response_by_name() {
    let request = request_with(vec![Message {
        role: Role::Tool,
        content: MessageContent::Parts(vec![ContentPart::ToolResult {
            tool_use_id: "call-1".to_owned(),
            tool_name: "execute_sql_query".to_owned(),
            content: "{\"rows\":[]}".to_owned(),
            is_error: false,
        }]),
    }]);
    let wire = build_request(&request);
    let part = &wire.contents[0].parts[0];
    assert_eq!(part["functionResponse"]["name"], "execute_sql_query");
    assert_eq!(part["functionResponse"]["response"]["result"], "{\"rows\":[]}");
}

#[test]
fn error_tool_result_uses_error_key() {
    let request = request_with(vec![Message {
        role: Role::Tool,
        content: MessageContent::Parts(vec![ContentPart::ToolResult {
            tool_use_id: "call-1".to_owned(),
            tool_name: "execute_sql_query".to_owned(),
            content: "only SELECT queries are allowed".to_owned(),
            is_error: true,
        }]),
    }]);
    let wire = build_request(&request);
    let part = &wire.contents[0].parts[0];
    assert_eq!(
        part["functionResponse"]["response"]["error"],
        "only SELECT queries are allowed"
    );
}

#[test]
fn parses_text_candidate() {
    let body = json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": "all good"}]},
            "finishReason": "STOP"
        }],
        "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 5},
        "modelVersion": "gemini-3-flash-preview"
    })
    .to_string();

    let resp = parse_response(&body, "fallback-model").expect("should parse");
    assert_eq!(resp.text(), "all good");
    assert_eq!(resp.stop_reason, StopReason::EndTurn);
    assert_eq!(resp.usage.input_tokens, 12);
    assert_eq!(resp.usage.output_tokens, 5);
    assert_eq!(resp.model, "gemini-3-flash-preview");
}

#[test]
fn parses_function_call_with_synthesized_id() {
    let body = json!({
        "candidates": [{
            "content": {
                "role": "model",
                "parts": [
                    {"functionCall": {"name": "get_database_schema", "args": {}}}
                ]
            },
            "finishReason": "STOP"
        }]
    })
    .to_string();

    let resp = parse_response(&body, "fallback-model").expect("should parse");
    assert_eq!(resp.stop_reason, StopReason::ToolUse);
    match &resp.content[0] {
        ContentPart::ToolUse { id, name, .. } => {
            assert!(id.starts_with("call-"));
            assert_eq!(name, "get_database_schema");
        }
        other => panic!("expected tool use, got {other:?}"),
    }
}

#[test]
fn missing_candidates_is_parse_error() {
    let body = json!({"candidates": []}).to_string();
    let err = parse_response(&body, "m").expect_err("must fail");
    assert!(err.to_string().contains("no candidates"));
}

#[test]
fn model_falls_back_when_version_absent() {
    let body = json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": "hi"}]},
            "finishReason": "STOP"
        }]
    })
    .to_string();
    let resp = parse_response(&body, "configured-model").expect("should parse");
    assert_eq!(resp.model, "configured-model");
}
