//! Model provider abstraction layer.
//!
//! Defines the [`LlmProvider`] trait and the shared request/response types
//! used by both provider implementations.
//!
//! Two providers are implemented:
//! - [`gemini::GeminiProvider`] — Google `generateContent` API (primary)
//! - [`anthropic::AnthropicProvider`] — Anthropic-compatible `/v1/messages`
//!   API (fallback; also fronts MiniMax via a base-URL override)
//!
//! The [`gateway::ModelGateway`] resolves a provider per call from an
//! explicit [`gateway::ModelSelection`] — there is no implicit failover
//! here; retrying a rate-limited turn against the fallback is the turn
//! handler's job.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod anthropic;
pub mod gateway;
pub mod gemini;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Conversation participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message.
    System,
    /// Human user message.
    User,
    /// Assistant (model) message.
    Assistant,
    /// Tool result (used after a tool call).
    Tool,
}

/// A message in a conversation with a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message author.
    pub role: Role,
    /// Message content — may be text or structured (tool calls/results).
    pub content: MessageContent,
}

/// The content of a message — text or structured parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// Structured content blocks (text, tool calls, tool results).
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Extract plain text from the content, joining all text parts.
    pub fn text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// A single structured content part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// Tool use request from the assistant.
    ToolUse {
        /// Unique call identifier.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input as JSON.
        input: serde_json::Value,
    },
    /// Result of a tool call.
    ///
    /// Carries both the call id and the tool name: the Anthropic wire format
    /// addresses results by id, the Gemini format by function name.
    ToolResult {
        /// Matching call identifier.
        tool_use_id: String,
        /// Name of the tool that produced this result.
        tool_name: String,
        /// Result content.
        content: String,
        /// Whether the tool reported an error.
        is_error: bool,
    },
}

/// JSON Schema definition for a tool the model can call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (must match a registry capability).
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema object for the tool's parameters.
    pub input_schema: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// A request to a model provider for a completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Conversation history including the latest user message.
    pub messages: Vec<Message>,
    /// System prompt (injected before messages).
    pub system: Option<String>,
    /// Tools available to the model for this call.
    pub tools: Vec<ToolDefinition>,
    /// Maximum tokens in the response.
    pub max_tokens: Option<u32>,
}

/// The reason a completion stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Normal end of turn.
    EndTurn,
    /// The model wants to call one or more tools.
    ToolUse,
    /// Max token limit reached.
    MaxTokens,
    /// Provider-specific other reason.
    Other(String),
}

/// Token usage statistics for a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageStats {
    /// Tokens used in the prompt/input.
    pub input_tokens: u32,
    /// Tokens generated in the response.
    pub output_tokens: u32,
}

/// The response from a model provider.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Response content (text and/or tool calls).
    pub content: Vec<ContentPart>,
    /// Why the model stopped.
    pub stop_reason: StopReason,
    /// Token usage.
    pub usage: UsageStats,
    /// The model identifier that served this response.
    pub model: String,
}

impl CompletionResponse {
    /// Plain text of the response, joining all text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Whether the response carries at least one tool-use request.
    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|p| matches!(p, ContentPart::ToolUse { .. }))
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by model providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure (includes client-side timeouts).
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match the expected schema.
    #[error("provider response parse error: {0}")]
    Parse(String),
    /// Upstream provider responded with an error status.
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
}

impl ProviderError {
    /// Whether this error is a rate-limit/quota signal.
    ///
    /// Identified by HTTP 429 or by quota markers in the error body
    /// (`RESOURCE_EXHAUSTED`, a rate or quota phrase). Timeouts and other
    /// transport failures are deliberately NOT rate limits.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            Self::HttpStatus { status, body } => {
                if *status == 429 {
                    return true;
                }
                let upper = body.to_uppercase();
                upper.contains("RESOURCE_EXHAUSTED")
                    || upper.contains("RATE LIMIT")
                    || upper.contains("RATE_LIMIT")
                    || upper.contains("QUOTA")
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers (shared by both providers)
// ---------------------------------------------------------------------------

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `ProviderError::Request` on transport failure,
/// `ProviderError::HttpStatus` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    // Strip anything that looks like an API key before it reaches logs.
    let mut sanitized = collapsed;
    for pattern in [r"sk-ant-[A-Za-z0-9_\-]{10,}", r"AIza[A-Za-z0-9_\-]{30,}"] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 512;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Core model provider interface.
///
/// Implementations must be `Send + Sync` to cross async task boundaries in
/// the agent loop.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Request a completion from the model.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API, network, or parse failure.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;

    /// The model identifier string this provider is instantiated for.
    fn model_id(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

/// Parse a model spec like `"gemini/gemini-3-flash-preview"` into components.
///
/// Returns `(provider_name, model_name)`.
///
/// # Errors
///
/// Returns an error if the string does not contain exactly one `/` separator
/// with non-empty halves.
pub fn parse_model_spec(s: &str) -> anyhow::Result<(&str, &str)> {
    let (provider, model) = s.split_once('/').ok_or_else(|| {
        anyhow::anyhow!("invalid model spec: {s:?}, expected format 'provider/model'")
    })?;
    if provider.is_empty() || model.is_empty() {
        anyhow::bail!("invalid model spec: {s:?}, both provider and model must be non-empty");
    }
    Ok((provider, model))
}
