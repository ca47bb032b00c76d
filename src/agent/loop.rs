//! The agent reasoning loop: the turn-scoped state machine.
//!
//! States: `AwaitingModel` → (tool calls present) → `AwaitingToolResults` →
//! `AwaitingModel` → … → `Done`. Each round invokes the model; when the
//! response requests tools, every request is resolved through the registry
//! (each call is argument-pure, so resolution order cannot affect
//! correctness), one tool-result message is appended per invocation in the
//! order the model requested them, and the loop returns to the model with
//! the extended history. A response with no tool requests ends the turn.
//!
//! A configurable round cap bounds the loop: a model that persistently
//! requests tools terminates with a degraded "unable to complete" answer
//! instead of spinning forever.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::providers::{
    CompletionRequest, ContentPart, LlmProvider, Message, MessageContent, ProviderError, Role,
};
use crate::tools::{tool_definitions, ToolRegistry, ToolResult};

/// One resolved tool call.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Call identifier assigned by the model (or synthesized by the parser).
    pub id: String,
    /// Wire name of the requested tool.
    pub name: String,
    /// Arguments as the model supplied them.
    pub arguments: serde_json::Value,
    /// The resolved result; immutable once set.
    pub result: ToolResult,
}

/// The result of running the loop to completion.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// Final answer text (degraded message when `completed` is false).
    pub final_text: String,
    /// Every tool invocation of the turn, in request order.
    pub invocations: Vec<ToolInvocation>,
    /// Model identifier reported by the provider.
    pub model: String,
    /// False when the round cap forced termination.
    pub completed: bool,
}

/// Degraded answer used when the round cap forces termination.
const ROUND_CAP_ANSWER: &str =
    "I wasn't able to complete this request within the allowed number of steps. \
     Please try asking again, perhaps with a narrower question.";

/// Run the reasoning loop for one turn.
///
/// `conversation` is the composed replay history ending with the newest user
/// message; it grows with assistant and tool-result messages as rounds
/// proceed. Tool failures are surfaced to the model as error-flagged results
/// and never abort the loop.
///
/// # Errors
///
/// Returns [`ProviderError`] when a model invocation fails. The caller
/// decides whether a rate-limited failure warrants re-issuing the turn
/// against the fallback configuration; partial tool results from this
/// attempt are discarded with the returned error.
pub async fn run_loop(
    provider: Arc<dyn LlmProvider>,
    registry: &ToolRegistry,
    system_prompt: &str,
    mut conversation: Vec<Message>,
    max_rounds: u32,
    max_response_tokens: u32,
) -> Result<LoopOutcome, ProviderError> {
    let tools = tool_definitions();
    let mut invocations: Vec<ToolInvocation> = Vec::new();
    let mut rounds: u32 = 0;

    loop {
        if rounds >= max_rounds {
            warn!(rounds, "round cap reached, terminating turn degraded");
            return Ok(LoopOutcome {
                final_text: ROUND_CAP_ANSWER.to_owned(),
                invocations,
                model: provider.model_id().to_owned(),
                completed: false,
            });
        }
        rounds = rounds.saturating_add(1);

        let request = CompletionRequest {
            messages: conversation.clone(),
            system: Some(system_prompt.to_owned()),
            tools: tools.clone(),
            max_tokens: Some(max_response_tokens),
        };

        let response = provider.complete(request).await?;
        debug!(
            round = rounds,
            tool_calls = response.has_tool_calls(),
            "model round completed"
        );

        if !response.has_tool_calls() {
            return Ok(LoopOutcome {
                final_text: response.text(),
                invocations,
                model: response.model,
                completed: true,
            });
        }

        // Record the assistant message, then resolve every requested tool in
        // the order the model emitted them.
        conversation.push(Message {
            role: Role::Assistant,
            content: MessageContent::Parts(response.content.clone()),
        });

        let mut result_parts: Vec<ContentPart> = Vec::new();
        for part in &response.content {
            let ContentPart::ToolUse { id, name, input } = part else {
                continue;
            };

            let result = registry.execute(name, input).await;
            result_parts.push(ContentPart::ToolResult {
                tool_use_id: id.clone(),
                tool_name: name.clone(),
                content: result.content.clone(),
                is_error: result.is_error,
            });
            invocations.push(ToolInvocation {
                id: id.clone(),
                name: name.clone(),
                arguments: input.clone(),
                result,
            });
        }

        conversation.push(Message {
            role: Role::Tool,
            content: MessageContent::Parts(result_parts),
        });
    }
}
