//! Tool capabilities exposed to the model.
//!
//! The tool set is a closed union ([`ToolName`]) with a compile-time-checked
//! dispatch table in [`ToolRegistry::execute`]; unknown names produce a typed
//! error rather than a silent no-op. Each capability is an async function
//! taking typed dependencies plus JSON input, returning a formatted string on
//! success or a [`ToolError`] — errors are folded into error-flagged
//! [`ToolResult`]s so the model can observe and correct them.

use serde_json::json;
use tracing::debug;

use crate::providers::ToolDefinition;
use crate::store::Store;

pub mod guard;

use self::guard::QueryRejection;

// ---------------------------------------------------------------------------
// Schema reference
// ---------------------------------------------------------------------------

/// Schema description handed to the model by `get_database_schema`.
pub const DATABASE_SCHEMA: &str = "\
Table: sessions
Columns:
  - session_id (TEXT, PRIMARY KEY): Unique session identifier
  - user_id (TEXT, PRIMARY KEY): User identifier
  - start_timestamp (TEXT): When session started (ISO-8601)
  - end_timestamp (TEXT): When session ended (ISO-8601)
  - pitch_accuracy (REAL): Pitch accuracy score (0-100)
  - scale_conformity (REAL): Scale conformity score (0-100)
  - timing_stability (REAL): Timing stability score (0-100)
  - scale_chosen (TEXT): Name of the scale practiced
  - scale_type (TEXT): Type of scale (e.g. 'diatonic', 'pentatonic')
  - sensitivity (REAL): Sensor sensitivity setting
  - strictness (REAL): Scoring strictness setting
  - total_notes_played (INTEGER): Total notes played in session
  - correct_notes_played (INTEGER): Correct notes played
  - bad_notes_played (INTEGER): Incorrect notes played
  - total_inscale_notes (INTEGER): Total in-scale notes
  - duration_seconds (REAL): Session duration in seconds
  - ambient_light_option (BOOLEAN): Whether ambient light was enabled
  - created_at (TEXT): Record creation timestamp

Table: practice_plans
Columns:
  - practice_id (TEXT, PRIMARY KEY): Unique plan identifier
  - user_id (TEXT): User identifier
  - generated_at (TEXT): When plan was generated
  - practice_plan (TEXT): The practice plan content (JSON format)
  - executed_session_id (TEXT): Session ID if plan was executed
  - created_at (TEXT): Record creation timestamp
";

// ---------------------------------------------------------------------------
// Names, results, errors
// ---------------------------------------------------------------------------

/// The closed set of tool capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    /// Schema introspection; no side effects, always succeeds.
    GetSchema,
    /// Guarded read-only query execution.
    ExecuteQuery,
    /// Direct plan persistence.
    SavePlan,
}

impl ToolName {
    /// Wire name of the capability.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetSchema => "get_database_schema",
            Self::ExecuteQuery => "execute_sql_query",
            Self::SavePlan => "save_practice_plan",
        }
    }

    /// Resolve a wire name to a capability.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownTool`] for any name outside the closed set.
    pub fn parse(name: &str) -> Result<Self, ToolError> {
        match name {
            "get_database_schema" => Ok(Self::GetSchema),
            "execute_sql_query" => Ok(Self::ExecuteQuery),
            "save_practice_plan" => Ok(Self::SavePlan),
            other => Err(ToolError::UnknownTool {
                name: other.to_owned(),
            }),
        }
    }
}

/// Outcome of one tool invocation, fed back to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    /// Result content (or error description).
    pub content: String,
    /// Whether the tool reported an error.
    pub is_error: bool,
}

impl ToolResult {
    /// A successful result.
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    /// An error result.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Errors raised by tool dispatch and argument validation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The requested name is not in the closed capability set.
    #[error("unknown tool: {name}")]
    UnknownTool {
        /// The unrecognized name.
        name: String,
    },
    /// A required argument is missing or has the wrong shape.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The query was refused by the guard or failed during execution.
    #[error(transparent)]
    Query(#[from] QueryRejection),
    /// Plan persistence failed.
    #[error("storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Dispatches tool invocations to their implementations.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    store: Store,
}

impl ToolRegistry {
    /// Create a registry over the given store.
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// The underlying store (for test seeding).
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Execute a tool by wire name, folding every failure into an
    /// error-flagged [`ToolResult`] the model can observe.
    pub async fn execute(&self, name: &str, input: &serde_json::Value) -> ToolResult {
        let outcome = match ToolName::parse(name) {
            Ok(ToolName::GetSchema) => Ok(get_schema()),
            Ok(ToolName::ExecuteQuery) => execute_query(&self.store, input).await,
            Ok(ToolName::SavePlan) => save_plan(&self.store, input).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(content) => ToolResult::success(content),
            Err(e) => {
                debug!(tool = name, error = %e, "tool invocation failed");
                ToolResult::error(e.to_string())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// get_database_schema
// ---------------------------------------------------------------------------

/// Return the static schema description.
pub fn get_schema() -> String {
    DATABASE_SCHEMA.to_owned()
}

// ---------------------------------------------------------------------------
// execute_sql_query
// ---------------------------------------------------------------------------

/// Validate and execute a read-only query.
///
/// Validation happens before the statement can reach the store; execution
/// failures on validated statements are reported as a distinct rejection
/// kind. Zero rows is a success with an empty data array.
///
/// # Errors
///
/// Returns [`ToolError::InvalidInput`] if `query` is missing, or
/// [`ToolError::Query`] on rejection or execution failure.
pub async fn execute_query(
    store: &Store,
    input: &serde_json::Value,
) -> Result<String, ToolError> {
    let query = input
        .get("query")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidInput("missing required field: query".to_owned()))?;

    guard::validate(query)?;

    debug!(query, "executing validated query");

    let rows = store
        .run_query(query)
        .await
        .map_err(|e| QueryRejection::Execution(e.to_string()))?;

    let payload = json!({
        "success": true,
        "row_count": rows.len(),
        "data": rows,
    });
    serde_json::to_string_pretty(&payload)
        .map_err(|e| ToolError::Storage(format!("failed to encode query result: {e}")))
}

// ---------------------------------------------------------------------------
// save_practice_plan
// ---------------------------------------------------------------------------

/// Persist a practice plan directly, minting a fresh plan id.
///
/// Accepts the plan as either a JSON object or a pre-encoded string.
///
/// # Errors
///
/// Returns [`ToolError::InvalidInput`] if required fields are missing, or
/// [`ToolError::Storage`] on persistence failure.
pub async fn save_plan(store: &Store, input: &serde_json::Value) -> Result<String, ToolError> {
    let user_id = input
        .get("user_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidInput("missing required field: user_id".to_owned()))?;

    let plan = input
        .get("plan")
        .ok_or_else(|| ToolError::InvalidInput("missing required field: plan".to_owned()))?;

    let plan_body = match plan {
        serde_json::Value::String(s) => s.clone(),
        other => serde_json::to_string(other)
            .map_err(|e| ToolError::InvalidInput(format!("unencodable plan: {e}")))?,
    };

    let executed_session_id = input.get("executed_session_id").and_then(|v| v.as_str());

    let plan_id = uuid::Uuid::new_v4().to_string();
    store
        .save_plan(&plan_id, user_id, &plan_body, executed_session_id)
        .await
        .map_err(|e| ToolError::Storage(e.to_string()))?;

    let payload = json!({
        "success": true,
        "plan_id": plan_id,
        "message": "Practice plan saved",
    });
    serde_json::to_string(&payload)
        .map_err(|e| ToolError::Storage(format!("failed to encode save result: {e}")))
}

// ---------------------------------------------------------------------------
// Tool definitions
// ---------------------------------------------------------------------------

/// Return definitions for all three capabilities.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: ToolName::GetSchema.as_str().to_owned(),
            description: "Get the database schema for the practice tables. \
                          Use this to understand what data is available before writing SQL."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolDefinition {
            name: ToolName::ExecuteQuery.as_str().to_owned(),
            description: "Execute a SQL SELECT query against the practice database. \
                          Only SELECT queries are allowed; always filter by user_id."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "A complete SQL SELECT query to execute."
                    }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: ToolName::SavePlan.as_str().to_owned(),
            description: "Save a generated practice plan for the user.".to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "user_id": {
                        "type": "string",
                        "description": "User identifier the plan belongs to."
                    },
                    "plan": {
                        "type": "object",
                        "description": "The practice plan body (JSON object)."
                    },
                    "executed_session_id": {
                        "type": "string",
                        "description": "Optional session ID this plan is linked to."
                    }
                },
                "required": ["user_id", "plan"]
            }),
        },
    ]
}
