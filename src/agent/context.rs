//! System prompt composition and conversation replay policy.
//!
//! Two instruction bodies: a minimal core prompt sent on every turn, and a
//! detailed reference body appended only on the first turn of a
//! conversation. Long conversations pay the detailed cost exactly once.
//!
//! First-turn detection is an explicit property of the durable checkpoint
//! (empty checkpoint = first turn), not an inference from the request
//! payload shape — callers that resend full history and callers that send
//! only the newest message both compose the same prompt.

use super::TurnMessage;

/// Core instructions included on every turn.
fn core_prompt(user_id: &str) -> String {
    format!(
        "You are an AI guitar practice coach for FretCoach. Analyze practice data, \
provide insights, and generate personalized practice plans.

Tools available: get_database_schema, execute_sql_query, save_practice_plan

Key rules:
- User ID is {user_id} - always filter queries by this user_id
- Query data using SQL tools, provide data-driven insights
- Charts appear automatically when you query session metrics
- When generating practice plans, output JSON with: focus_area, current_score, \
suggested_scale, suggested_scale_type, session_target, exercises (array of strings)
- Remember user information shared in conversation"
    )
}

/// Detailed reference body, appended only on the first turn.
fn detailed_reference(user_id: &str) -> String {
    format!(
        "DETAILED INSTRUCTIONS (Reference):

Database Schema:
- sessions: Practice session data (pitch_accuracy, scale_conformity, timing_stability, \
scale_chosen, start_timestamp, etc.)
- practice_plans: Generated practice plans (JSON format)

Tool Usage:
- get_database_schema: View available tables and columns
- execute_sql_query: Run SELECT queries (read-only, always filtered by user_id)
- save_practice_plan: Persist a finished plan the user has asked to keep

Practice Plan Generation:
- Generate practice plans as JSON in your response with this exact format:
  {{
    \"focus_area\": \"string (e.g., 'Pitch Accuracy', 'Timing Stability')\",
    \"current_score\": number (0-100),
    \"suggested_scale\": \"string (e.g., 'C minor', 'G major')\",
    \"suggested_scale_type\": \"string (e.g., 'natural minor', 'major')\",
    \"session_target\": \"string (e.g., '15-20 minutes')\",
    \"exercises\": [\"string\", \"string\", ...] (array of exercise descriptions)
  }}
- The user confirms saving in a follow-up message

Workflow for Progress/Trends Requests:
1. Use execute_sql_query to fetch recent session data with metrics
2. Analyze trends and provide specific insights with numbers
3. Charts auto-generate below your response - just describe the insights

Example Queries:
- Progress: SELECT start_timestamp, pitch_accuracy, scale_conformity, timing_stability \
FROM sessions WHERE user_id = '{user_id}' ORDER BY start_timestamp DESC LIMIT 20
- Averages: SELECT AVG(pitch_accuracy), AVG(timing_stability) FROM sessions \
WHERE user_id = '{user_id}'
- Scales practiced: SELECT DISTINCT scale_chosen FROM sessions WHERE user_id = '{user_id}'

Response Style:
- Conversational and encouraging
- Data-driven with specific numbers
- Actionable recommendations
- Remember the user's name and preferences from conversation"
    )
}

/// Compose the system prompt for a turn.
///
/// The detailed reference rides along only when `first_turn` is set, which
/// guarantees it has been shown before the first tool call can plausibly be
/// needed.
pub fn compose_system_prompt(user_id: &str, first_turn: bool) -> String {
    if first_turn {
        format!("{}\n\n{}", core_prompt(user_id), detailed_reference(user_id))
    } else {
        core_prompt(user_id)
    }
}

/// Select which caller-supplied messages to replay to the model.
///
/// When a checkpoint already holds this conversation and the caller resent
/// more than one message, only the newest is replayed — the rest is already
/// persisted and replaying it would double-append history. Otherwise the
/// full caller list is replayed.
pub fn select_replay(messages: &[TurnMessage], checkpoint_exists: bool) -> &[TurnMessage] {
    if checkpoint_exists && messages.len() > 1 {
        let last = messages.len().saturating_sub(1);
        &messages[last..]
    } else {
        messages
    }
}
