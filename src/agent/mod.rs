//! Agent orchestration: prompt composition, the reasoning loop, plan
//! lifecycle tracking, and the per-turn handler.
//!
//! One inbound turn flows through [`turn::TurnHandler::handle_turn`]:
//! history policy selects the replay set, the composer builds instructions,
//! the loop alternates model and tool rounds, and the plan lifecycle
//! manager inspects the result.

use serde::{Deserialize, Serialize};

pub mod context;
pub mod plan;
pub mod r#loop;
pub mod turn;

pub use turn::TurnHandler;

// ---------------------------------------------------------------------------
// Turn request / outcome
// ---------------------------------------------------------------------------

/// One caller-supplied chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMessage {
    /// Message role: `user` or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

/// An inbound conversation turn from the transport layer.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    /// Ordered chat history as supplied by the caller.
    pub messages: Vec<TurnMessage>,
    /// User identifier; assumed already authenticated by the caller.
    pub user_id: String,
    /// Conversation identifier; absent means a fresh conversation keyed by
    /// a default derived from the user id.
    pub conversation_id: Option<String>,
}

impl TurnRequest {
    /// The conversation key this turn's state is tracked under.
    pub fn conversation_key(&self) -> String {
        self.conversation_id
            .clone()
            .unwrap_or_else(|| format!("chat-{}", self.user_id))
    }

    /// Text of the newest user message, if any.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
    }
}

/// Lifecycle state of a practice plan after a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    /// No plan was produced this turn.
    None,
    /// A plan was detected and is awaiting confirmation.
    Pending,
    /// A plan was committed to durable storage.
    Saved,
}

/// Detected visualization intent of the user message, consumed by the
/// chart-building collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryIntent {
    /// Progress over time.
    Trend,
    /// Latest-versus-average style comparison.
    Comparison,
}

/// Record of one resolved tool call, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Wire name of the tool.
    pub tool_name: String,
    /// Result content handed back to the model.
    pub result: String,
}

/// The outcome of one turn, handed back to the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    /// The assistant's final answer text.
    pub final_answer: String,
    /// Resolved tool calls in the order the model requested them.
    pub tool_results: Vec<ToolCallRecord>,
    /// Plan lifecycle state after this turn.
    pub plan_status: PlanStatus,
    /// Identifier of the pending plan, when `plan_status` is `pending`.
    pub pending_plan_id: Option<String>,
    /// Model spec that served the turn.
    pub model_used: String,
    /// False when the turn degraded to an apology answer.
    pub success: bool,
    /// Raw query result rows for the chart-building collaborator.
    pub query_rows: Vec<crate::store::QueryRow>,
    /// Detected visualization intent, if any.
    pub intent: Option<QueryIntent>,
}
