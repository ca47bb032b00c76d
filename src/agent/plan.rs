//! Practice-plan lifecycle: detection, the pending store, and confirmation.
//!
//! A plan found in a turn's output but not yet persisted is held as a
//! [`PendingPlan`] keyed by conversation, with at most one entry per
//! conversation (a newer detection replaces the prior one). Confirmation
//! commits the pending entry through the same persistence contract as the
//! direct `save_practice_plan` tool.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

// ---------------------------------------------------------------------------
// Plan body
// ---------------------------------------------------------------------------

/// The mandatory practice-plan schema.
///
/// Field names are exact; a candidate JSON object missing any of them is not
/// a plan. Unknown extra fields are tolerated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanBody {
    /// What the plan focuses on (e.g. "Timing Stability").
    pub focus_area: String,
    /// The user's current score in the focus area (0-100).
    pub current_score: f64,
    /// Scale to practice (e.g. "C minor").
    pub suggested_scale: String,
    /// Scale type (e.g. "natural minor").
    pub suggested_scale_type: String,
    /// Target session length (e.g. "15-20 minutes").
    pub session_target: String,
    /// Ordered exercise descriptions.
    pub exercises: Vec<String>,
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Find a practice plan embedded in free text.
///
/// Scans for balanced JSON objects and strictly parses each candidate
/// against [`PlanBody`]. Tolerant of surrounding prose; parse failure means
/// "no plan found", never an error.
pub fn detect_plan(text: &str) -> Option<PlanBody> {
    for (start, ch) in text.char_indices() {
        if ch != '{' {
            continue;
        }
        let Some(candidate) = balanced_object(text, start) else {
            continue;
        };
        // Cheap pre-filter before attempting a full parse.
        if !candidate.contains("\"exercises\"") {
            continue;
        }
        if let Ok(plan) = serde_json::from_str::<PlanBody>(candidate) {
            return Some(plan);
        }
    }
    None
}

/// Extract the balanced `{...}` object starting at `start`, honoring JSON
/// string literals so braces inside strings don't unbalance the scan.
fn balanced_object(text: &str, start: usize) -> Option<&str> {
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in text.as_bytes().iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth = depth.saturating_add(1),
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=offset]);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Confirmation
// ---------------------------------------------------------------------------

/// Whether a user message confirms a pending plan.
///
/// Case-insensitive substring match against the fixed confirmation word set.
pub fn is_confirmation(message: &str, confirmation_words: &[String]) -> bool {
    let lowered = message.to_lowercase();
    confirmation_words
        .iter()
        .any(|word| lowered.contains(word.to_lowercase().as_str()))
}

// ---------------------------------------------------------------------------
// Pending store
// ---------------------------------------------------------------------------

/// A detected-but-unconfirmed practice plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPlan {
    /// Globally unique plan identifier; the sole handle for commit/discard.
    pub plan_id: String,
    /// Conversation the plan was detected in.
    pub conversation_key: String,
    /// User the plan belongs to.
    pub owner_user_id: String,
    /// The plan body as detected.
    pub body: PlanBody,
    /// Detection time.
    pub created_at: DateTime<Utc>,
}

impl PendingPlan {
    /// Create a pending plan with a freshly minted id.
    pub fn new(conversation_key: String, owner_user_id: String, body: PlanBody) -> Self {
        Self {
            plan_id: uuid::Uuid::new_v4().to_string(),
            conversation_key,
            owner_user_id,
            body,
            created_at: Utc::now(),
        }
    }
}

/// Store of pending plans, keyed by conversation with lookup by plan id.
///
/// Injected so tests can substitute a deterministic implementation and so an
/// expiry policy can be introduced without touching callers.
pub trait PendingPlans: Send + Sync {
    /// Insert a pending plan, replacing any prior entry for the same
    /// conversation.
    fn put(&self, plan: PendingPlan);

    /// The pending plan for a conversation, if any.
    fn get(&self, conversation_key: &str) -> Option<PendingPlan>;

    /// Remove and return the pending plan for a conversation.
    fn remove(&self, conversation_key: &str) -> Option<PendingPlan>;

    /// Find a pending plan by its id across all conversations.
    fn find_by_plan_id(&self, plan_id: &str) -> Option<PendingPlan>;

    /// Remove and return a pending plan by its id across all conversations.
    fn remove_by_plan_id(&self, plan_id: &str) -> Option<PendingPlan>;
}

/// In-memory pending-plan store.
///
/// Entries never expire (matching the reference behavior); a conversation's
/// entry lives until it is committed or replaced. Races between two turns of
/// the same conversation resolve last-writer-wins.
#[derive(Debug, Default)]
pub struct MemoryPendingPlans {
    entries: RwLock<HashMap<String, PendingPlan>>,
}

impl MemoryPendingPlans {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PendingPlans for MemoryPendingPlans {
    fn put(&self, plan: PendingPlan) {
        let mut map = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        map.insert(plan.conversation_key.clone(), plan);
    }

    fn get(&self, conversation_key: &str) -> Option<PendingPlan> {
        let map = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        map.get(conversation_key).cloned()
    }

    fn remove(&self, conversation_key: &str) -> Option<PendingPlan> {
        let mut map = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        map.remove(conversation_key)
    }

    fn find_by_plan_id(&self, plan_id: &str) -> Option<PendingPlan> {
        let map = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        map.values().find(|p| p.plan_id == plan_id).cloned()
    }

    fn remove_by_plan_id(&self, plan_id: &str) -> Option<PendingPlan> {
        let mut map = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let key = map
            .iter()
            .find(|(_, p)| p.plan_id == plan_id)
            .map(|(k, _)| k.clone())?;
        map.remove(&key)
    }
}

// ---------------------------------------------------------------------------
// Commit errors
// ---------------------------------------------------------------------------

/// Errors from committing a pending plan.
#[derive(Debug, thiserror::Error)]
pub enum PlanCommitError {
    /// No pending plan with the given id exists (possibly already
    /// committed — commits are idempotent per plan id).
    #[error("pending plan not found")]
    NotFound,
    /// The plan body could not be encoded for storage.
    #[error("failed to encode plan body: {0}")]
    Encode(String),
    /// Persistence failed; the pending entry is retained for retry.
    #[error(transparent)]
    Storage(#[from] StoreError),
}
