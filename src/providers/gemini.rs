//! Gemini provider implementation using the `generateContent` REST API.
//!
//! Tool calls arrive as `functionCall` parts and results go back as
//! `functionResponse` parts addressed by function name. The wire format
//! carries no call identifier, so the parser synthesizes one per call.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{
    check_http_response, CompletionRequest, CompletionResponse, ContentPart, LlmProvider,
    MessageContent, ProviderError, Role, StopReason, UsageStats,
};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Gemini `generateContent` request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    /// Conversation turns.
    pub contents: Vec<GeminiContent>,
    /// System instruction, injected separately from the turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GeminiContent>,
    /// Tool declarations.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<GeminiToolDecl>,
    /// Generation parameters.
    pub generation_config: GeminiGenerationConfig,
}

/// A single content entry (one conversation turn).
#[doc(hidden)]
#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiContent {
    /// Turn role: "user" or "model". Absent on system instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts.
    pub parts: Vec<Value>,
}

/// Wrapper for function declarations.
#[doc(hidden)]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiToolDecl {
    /// Declared callable functions.
    pub function_declarations: Vec<GeminiFunctionDecl>,
}

/// One declared function.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct GeminiFunctionDecl {
    /// Function name.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema for the parameters.
    pub parameters: Value,
}

/// Generation parameters.
#[doc(hidden)]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerationConfig {
    /// Maximum tokens to generate.
    pub max_output_tokens: u32,
}

/// Gemini `generateContent` response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    /// Response candidates (the first is used).
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    /// Token accounting.
    pub usage_metadata: Option<GeminiUsage>,
    /// Model version that served the response.
    pub model_version: Option<String>,
}

/// A response candidate.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    /// Candidate content.
    pub content: Option<GeminiContent>,
    /// Why generation stopped.
    pub finish_reason: Option<String>,
}

/// Token usage accounting.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiUsage {
    /// Prompt tokens consumed.
    #[serde(default)]
    pub prompt_token_count: u32,
    /// Candidate tokens generated.
    #[serde(default)]
    pub candidates_token_count: u32,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Google Gemini provider.
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    model_spec: String,
    model_name: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Create a new Gemini provider with a per-request timeout.
    pub fn new(model_spec: String, model_name: String, api_key: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            model_spec,
            model_name,
            api_key,
            client,
        }
    }
}

// ---------------------------------------------------------------------------
// Request / Response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build a Gemini API request from a completion request.
#[doc(hidden)]
pub fn build_request(request: &CompletionRequest) -> GeminiRequest {
    let contents: Vec<GeminiContent> = request
        .messages
        .iter()
        .map(|msg| {
            let role = match msg.role {
                Role::Assistant => "model",
                Role::System | Role::User | Role::Tool => "user",
            };
            let parts = match &msg.content {
                MessageContent::Text(t) => vec![json!({"text": t})],
                MessageContent::Parts(parts) => parts.iter().map(content_part_to_value).collect(),
            };
            GeminiContent {
                role: Some(role.to_owned()),
                parts,
            }
        })
        .collect();

    let system_instruction = request.system.as_ref().map(|s| GeminiContent {
        role: None,
        parts: vec![json!({"text": s})],
    });

    let tools = if request.tools.is_empty() {
        Vec::new()
    } else {
        vec![GeminiToolDecl {
            function_declarations: request
                .tools
                .iter()
                .map(|t| GeminiFunctionDecl {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                })
                .collect(),
        }]
    };

    GeminiRequest {
        contents,
        system_instruction,
        tools,
        generation_config: GeminiGenerationConfig {
            max_output_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        },
    }
}

/// Parse a Gemini API response into a completion response.
///
/// Call identifiers are synthesized since the wire format has none.
///
/// # Errors
///
/// Returns `ProviderError::Parse` if the body cannot be deserialized or
/// contains no candidates.
#[doc(hidden)]
pub fn parse_response(body: &str, fallback_model: &str) -> Result<CompletionResponse, ProviderError> {
    let resp: GeminiResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    let candidate = resp
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Parse("response contains no candidates".to_owned()))?;

    let mut content: Vec<ContentPart> = Vec::new();
    let mut saw_function_call = false;

    if let Some(cand_content) = candidate.content {
        for part in cand_content.parts {
            if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                content.push(ContentPart::Text {
                    text: text.to_owned(),
                });
            } else if let Some(call) = part.get("functionCall") {
                let name = call
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ProviderError::Parse("functionCall missing name".to_owned()))?;
                let input = call.get("args").cloned().unwrap_or(Value::Null);
                saw_function_call = true;
                content.push(ContentPart::ToolUse {
                    id: format!("call-{}", uuid::Uuid::new_v4()),
                    name: name.to_owned(),
                    input,
                });
            }
        }
    }

    let stop_reason = if saw_function_call {
        StopReason::ToolUse
    } else {
        match candidate.finish_reason.as_deref() {
            Some("STOP") | None => StopReason::EndTurn,
            Some("MAX_TOKENS") => StopReason::MaxTokens,
            Some(other) => StopReason::Other(other.to_owned()),
        }
    };

    let usage = resp
        .usage_metadata
        .map(|u| UsageStats {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
        })
        .unwrap_or_default();

    Ok(CompletionResponse {
        content,
        stop_reason,
        usage,
        model: resp.model_version.unwrap_or_else(|| fallback_model.to_owned()),
    })
}

fn content_part_to_value(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({"text": text}),
        ContentPart::ToolUse { name, input, .. } => {
            json!({"functionCall": {"name": name, "args": input}})
        }
        ContentPart::ToolResult {
            tool_name,
            content,
            is_error,
            ..
        } => {
            let key = if *is_error { "error" } else { "result" };
            json!({
                "functionResponse": {
                    "name": tool_name,
                    "response": { key: content },
                }
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Trait impl
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl LlmProvider for GeminiProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let api_request = build_request(&request);
        let url = format!("{GEMINI_API_BASE}/{}:generateContent", self.model_name);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await?;

        let payload = check_http_response(response).await?;
        parse_response(&payload, &self.model_name)
    }

    fn model_id(&self) -> &str {
        &self.model_spec
    }
}
