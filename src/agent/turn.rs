//! The per-turn orchestrator.
//!
//! Drives one inbound turn end to end: pending-plan confirmation, history
//! replay policy, prompt composition, the reasoning loop (primary model,
//! with a full-turn fallback retry on rate limiting), plan lifecycle
//! detection, checkpoint append, and outcome assembly. Every failure is
//! turn-scoped; the caller always receives an outcome, never an error.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::providers::gateway::{ModelGateway, ModelSelection};
use crate::providers::{Message, MessageContent, Role};
use crate::store::{QueryRow, Store};
use crate::tools::{ToolName, ToolRegistry};
use crate::trace::{TraceSink, TurnTrace};

use super::context::{compose_system_prompt, select_replay};
use super::plan::{
    detect_plan, is_confirmation, PendingPlan, PendingPlans, PlanCommitError,
};
use super::r#loop::{run_loop, LoopOutcome, ToolInvocation};
use super::{PlanStatus, QueryIntent, ToolCallRecord, TurnOutcome, TurnRequest};

/// Apology answer for an unrecoverable turn failure. Never a stack trace.
const APOLOGY_ANSWER: &str =
    "I apologize, but I encountered an issue processing your request. Please try again.";

/// Orchestrates conversation turns.
pub struct TurnHandler {
    gateway: ModelGateway,
    registry: ToolRegistry,
    store: Store,
    pending: Arc<dyn PendingPlans>,
    config: Arc<Config>,
    trace: Option<Arc<dyn TraceSink>>,
}

impl std::fmt::Debug for TurnHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnHandler")
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}

impl TurnHandler {
    /// Create a handler over the shared collaborators.
    pub fn new(
        gateway: ModelGateway,
        store: Store,
        pending: Arc<dyn PendingPlans>,
        config: Arc<Config>,
        trace: Option<Arc<dyn TraceSink>>,
    ) -> Self {
        Self {
            gateway,
            registry: ToolRegistry::new(store.clone()),
            store,
            pending,
            config,
            trace,
        }
    }

    /// Handle one conversation turn.
    ///
    /// Never fails: provider and storage errors degrade to an apology
    /// outcome with `success = false`.
    pub async fn handle_turn(&self, request: TurnRequest) -> TurnOutcome {
        let conversation_key = request.conversation_key();
        debug!(conversation_key = %conversation_key, user_id = %request.user_id, "turn started");

        // Confirmation of a pending plan happens before the loop runs, and
        // independently of whatever the model produces this turn.
        let mut plan_saved = false;
        if let Some(last_user) = request.last_user_text() {
            if self.pending.get(&conversation_key).is_some()
                && is_confirmation(last_user, &self.config.plans.confirmation_words)
            {
                match self.commit_for_conversation(&conversation_key).await {
                    Ok(()) => plan_saved = true,
                    Err(e) => warn!(error = %e, "pending plan commit failed, entry retained"),
                }
            }
        }

        // History policy + first-turn detection, both off the durable
        // checkpoint rather than the request shape.
        let (checkpoint, first_turn) = match self.store.load_checkpoint(&conversation_key).await {
            Ok(entries) => {
                let first = entries.is_empty();
                (entries, first)
            }
            Err(e) => {
                warn!(error = %e, "checkpoint load failed, treating conversation as fresh");
                (Vec::new(), true)
            }
        };
        let replay = select_replay(&request.messages, !checkpoint.is_empty());

        let mut conversation: Vec<Message> = Vec::new();
        for entry in &checkpoint {
            conversation.push(Message {
                role: if entry.role == "assistant" {
                    Role::Assistant
                } else {
                    Role::User
                },
                content: MessageContent::Text(entry.content.clone()),
            });
        }
        for msg in replay {
            conversation.push(Message {
                role: if msg.role == "assistant" {
                    Role::Assistant
                } else {
                    Role::User
                },
                content: MessageContent::Text(msg.content.clone()),
            });
        }

        let system_prompt = compose_system_prompt(&request.user_id, first_turn);

        // Primary attempt; on a rate-limit signal the ENTIRE turn is
        // re-issued against the fallback from scratch — partial tool results
        // from the failed attempt are discarded with it.
        let (outcome, selection) = match self
            .run_selection(ModelSelection::Primary, &system_prompt, conversation.clone())
            .await
        {
            Ok(o) => (o, ModelSelection::Primary),
            Err(e) if e.is_rate_limit() => {
                info!("primary rate-limited, re-issuing turn on fallback");
                match self
                    .run_selection(ModelSelection::Fallback, &system_prompt, conversation)
                    .await
                {
                    Ok(o) => (o, ModelSelection::Fallback),
                    Err(e) => {
                        error!(error = %e, "fallback model failed");
                        return self.degraded_outcome(ModelSelection::Fallback);
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "primary model failed");
                return self.degraded_outcome(ModelSelection::Primary);
            }
        };

        let mut final_answer = outcome.final_text.clone();
        let mut plan_status = if plan_saved {
            PlanStatus::Saved
        } else {
            PlanStatus::None
        };
        let mut pending_plan_id = None;

        // Plan lifecycle detection: a successful tool-driven save wins;
        // otherwise try to find a plan embedded in the final answer.
        if tool_saved_plan(&outcome.invocations) {
            plan_status = PlanStatus::Saved;
        } else if plan_status != PlanStatus::Saved {
            if let Some(body) = detect_plan(&final_answer) {
                let pending = PendingPlan::new(
                    conversation_key.clone(),
                    request.user_id.clone(),
                    body,
                );
                pending_plan_id = Some(pending.plan_id.clone());
                self.pending.put(pending);
                plan_status = PlanStatus::Pending;
                final_answer
                    .push_str("\n\nI've drafted a practice plan for you - say \"save\" to keep it.");
            }
        }
        if plan_status == PlanStatus::Saved && plan_saved {
            final_answer.push_str("\n\nYour practice plan has been saved.");
        }

        // Collaborator contract: raw rows from this turn's queries plus the
        // detected visualization intent.
        let query_rows = extract_query_rows(&outcome.invocations);
        let intent = request.last_user_text().and_then(detect_intent);

        self.append_turn_to_checkpoint(&conversation_key, replay, &final_answer)
            .await;

        let model_used = self.gateway.model_id(selection);
        self.record_trace(&request, &conversation_key, &model_used, plan_status);

        TurnOutcome {
            final_answer,
            tool_results: outcome
                .invocations
                .iter()
                .map(|inv| ToolCallRecord {
                    tool_name: inv.name.clone(),
                    result: inv.result.content.clone(),
                })
                .collect(),
            plan_status,
            pending_plan_id,
            model_used,
            success: outcome.completed,
            query_rows,
            intent,
        }
    }

    /// Commit a specific pending plan by id (direct save path, e.g. an
    /// explicit user action outside the chat turn).
    ///
    /// Searches all pending entries for the id and performs the same
    /// commit-and-remove sequence as chat confirmation. Idempotent per plan
    /// id: a second commit finds nothing and reports not-found.
    ///
    /// # Errors
    ///
    /// Returns [`PlanCommitError::NotFound`] for an unknown (or already
    /// committed) id, or [`PlanCommitError::Storage`] when persistence
    /// fails — in which case the pending entry is retained for retry.
    pub async fn commit_pending_plan(&self, plan_id: &str) -> Result<(), PlanCommitError> {
        let pending = self
            .pending
            .find_by_plan_id(plan_id)
            .ok_or(PlanCommitError::NotFound)?;
        self.commit(&pending).await?;
        self.pending.remove_by_plan_id(plan_id);
        Ok(())
    }

    async fn commit_for_conversation(&self, conversation_key: &str) -> Result<(), PlanCommitError> {
        let pending = self
            .pending
            .get(conversation_key)
            .ok_or(PlanCommitError::NotFound)?;
        self.commit(&pending).await?;
        self.pending.remove(conversation_key);
        Ok(())
    }

    /// Persist a pending plan through the same contract as the save tool.
    /// The pending entry is only removed by callers AFTER this succeeds, so
    /// a storage failure leaves it available for retry.
    async fn commit(&self, pending: &PendingPlan) -> Result<(), PlanCommitError> {
        let body = serde_json::to_string(&pending.body)
            .map_err(|e| PlanCommitError::Encode(e.to_string()))?;
        self.store
            .save_plan(&pending.plan_id, &pending.owner_user_id, &body, None)
            .await?;
        info!(plan_id = %pending.plan_id, "pending plan committed");
        Ok(())
    }

    async fn run_selection(
        &self,
        selection: ModelSelection,
        system_prompt: &str,
        conversation: Vec<Message>,
    ) -> Result<LoopOutcome, crate::providers::ProviderError> {
        run_loop(
            self.gateway.resolve(selection),
            &self.registry,
            system_prompt,
            conversation,
            self.config.agent.max_rounds,
            self.config.agent.max_response_tokens,
        )
        .await
    }

    fn degraded_outcome(&self, selection: ModelSelection) -> TurnOutcome {
        TurnOutcome {
            final_answer: APOLOGY_ANSWER.to_owned(),
            tool_results: Vec::new(),
            plan_status: PlanStatus::None,
            pending_plan_id: None,
            model_used: self.gateway.model_id(selection),
            success: false,
            query_rows: Vec::new(),
            intent: None,
        }
    }

    /// Append the turn's durable subset (new user messages and the final
    /// answer) to the conversation checkpoint. Checkpoint failures are
    /// logged, not surfaced — the answer is already computed.
    async fn append_turn_to_checkpoint(
        &self,
        conversation_key: &str,
        replay: &[super::TurnMessage],
        final_answer: &str,
    ) {
        for msg in replay {
            if let Err(e) = self
                .store
                .append_checkpoint(conversation_key, &msg.role, &msg.content)
                .await
            {
                warn!(error = %e, "failed to checkpoint caller message");
            }
        }
        if let Err(e) = self
            .store
            .append_checkpoint(conversation_key, "assistant", final_answer)
            .await
        {
            warn!(error = %e, "failed to checkpoint final answer");
        }
    }

    fn record_trace(
        &self,
        request: &TurnRequest,
        conversation_key: &str,
        model_used: &str,
        plan_status: PlanStatus,
    ) {
        let Some(sink) = &self.trace else {
            return;
        };
        let trace = TurnTrace {
            tags: vec![
                "fretcoach".to_owned(),
                "coach-chat".to_owned(),
                model_used.to_owned(),
            ],
            metadata: json!({
                "user_id": request.user_id,
                "conversation_key": conversation_key,
                "model": model_used,
                "plan_status": plan_status,
            }),
        };
        sink.record(&trace);
    }
}

// ---------------------------------------------------------------------------
// Turn inspection helpers
// ---------------------------------------------------------------------------

/// Whether the turn's invocations include a successful plan save.
fn tool_saved_plan(invocations: &[ToolInvocation]) -> bool {
    invocations.iter().any(|inv| {
        inv.name == ToolName::SavePlan.as_str()
            && !inv.result.is_error
            && serde_json::from_str::<serde_json::Value>(&inv.result.content)
                .ok()
                .and_then(|v| v.get("success").and_then(serde_json::Value::as_bool))
                .unwrap_or(false)
    })
}

/// Collect raw rows from every successful query invocation, in turn order.
pub fn extract_query_rows(invocations: &[ToolInvocation]) -> Vec<QueryRow> {
    let mut rows = Vec::new();
    for inv in invocations {
        if inv.name != ToolName::ExecuteQuery.as_str() || inv.result.is_error {
            continue;
        }
        let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&inv.result.content) else {
            continue;
        };
        if parsed.get("success").and_then(serde_json::Value::as_bool) != Some(true) {
            continue;
        }
        if let Some(data) = parsed.get("data").and_then(serde_json::Value::as_array) {
            rows.extend(
                data.iter()
                    .filter_map(|v| v.as_object().cloned()),
            );
        }
    }
    rows
}

/// Detect the visualization intent of a user message.
pub fn detect_intent(message: &str) -> Option<QueryIntent> {
    let lowered = message.to_lowercase();
    const TREND_WORDS: [&str; 7] = [
        "progress", "trend", "over time", "chart", "graph", "visualize", "plot",
    ];
    const COMPARISON_WORDS: [&str; 5] = ["compare", "comparison", "versus", "vs", "latest"];

    if TREND_WORDS.iter().any(|w| lowered.contains(w)) {
        return Some(QueryIntent::Trend);
    }
    if COMPARISON_WORDS.iter().any(|w| lowered.contains(w)) {
        return Some(QueryIntent::Comparison);
    }
    None
}
