//! SQLite persistence for practice data, plans, and conversation checkpoints.
//!
//! The [`Store`] is the sole gateway to the database. Reads and writes go
//! through one [`SqlitePool`]; connections are scoped per call and released
//! back to the pool automatically. Three relations:
//!
//! - `sessions` — practice session metrics, written by the recording
//!   pipeline, read here only through validated queries
//! - `practice_plans` — committed practice plans (JSON body)
//! - `conversations` — append-only checkpoint of user/assistant messages
//!   keyed by conversation

use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use tracing::debug;

/// A decoded query row: ordered column-name → JSON value mapping.
pub type QueryRow = serde_json::Map<String, Value>;

/// One durable checkpoint entry (the user/assistant subset of a turn).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEntry {
    /// Message role: `user` or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Central store over the practice database.
#[derive(Clone)]
pub struct Store {
    db: SqlitePool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Create a store backed by the given pool.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create the schema if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if any DDL statement fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                start_timestamp TEXT,
                end_timestamp TEXT,
                pitch_accuracy REAL,
                scale_conformity REAL,
                timing_stability REAL,
                scale_chosen TEXT,
                scale_type TEXT,
                sensitivity REAL,
                strictness REAL,
                total_notes_played INTEGER,
                correct_notes_played INTEGER,
                bad_notes_played INTEGER,
                total_inscale_notes INTEGER,
                duration_seconds REAL,
                ambient_light_option BOOLEAN,
                created_at TEXT DEFAULT (datetime('now')),
                PRIMARY KEY (session_id, user_id)
            )",
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS practice_plans (
                practice_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                generated_at TEXT DEFAULT (datetime('now')),
                practice_plan TEXT NOT NULL,
                executed_session_id TEXT,
                created_at TEXT DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_key TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_key
             ON conversations (conversation_key, id)",
        )
        .execute(&self.db)
        .await?;

        debug!("store schema ready");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Query execution
    // -----------------------------------------------------------------------

    /// Execute an already-validated read statement and decode every row into
    /// a column-name → JSON mapping.
    ///
    /// Callers MUST pass the statement through the read-only guard first;
    /// this method does not re-validate. Timestamp-shaped text values are
    /// normalized to ISO-8601. Zero matching rows is a success with an empty
    /// vector.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on execution failure (malformed SQL,
    /// missing relation, decode failure).
    pub async fn run_query(&self, sql: &str) -> Result<Vec<QueryRow>, StoreError> {
        let rows = sqlx::query(sql).fetch_all(&self.db).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut map = QueryRow::new();
            for (idx, column) in row.columns().iter().enumerate() {
                map.insert(column.name().to_owned(), decode_column(&row, idx)?);
            }
            out.push(map);
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Practice plans
    // -----------------------------------------------------------------------

    /// Insert a committed practice plan.
    ///
    /// Both commit paths (the `save_plan` tool and pending-plan
    /// confirmation) converge here.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails (including a
    /// duplicate plan id).
    pub async fn save_plan(
        &self,
        plan_id: &str,
        user_id: &str,
        plan_body: &str,
        executed_session_id: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO practice_plans (practice_id, user_id, practice_plan, executed_session_id) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(plan_id)
        .bind(user_id)
        .bind(plan_body)
        .bind(executed_session_id)
        .execute(&self.db)
        .await?;

        debug!(plan_id, user_id, "practice plan saved");
        Ok(())
    }

    /// Whether a plan id already exists in durable storage.
    pub async fn plan_exists(&self, plan_id: &str) -> Result<bool, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM practice_plans WHERE practice_id = ?1")
                .bind(plan_id)
                .fetch_optional(&self.db)
                .await?;
        Ok(row.is_some())
    }

    // -----------------------------------------------------------------------
    // Conversation checkpoint
    // -----------------------------------------------------------------------

    /// Number of checkpointed messages for a conversation.
    pub async fn checkpoint_len(&self, conversation_key: &str) -> Result<u64, StoreError> {
        let row: (i64,) =
            sqlx::query_as("SELECT count(*) FROM conversations WHERE conversation_key = ?1")
                .bind(conversation_key)
                .fetch_one(&self.db)
                .await?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }

    /// Load the full checkpoint for a conversation, oldest first.
    pub async fn load_checkpoint(
        &self,
        conversation_key: &str,
    ) -> Result<Vec<CheckpointEntry>, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT role, content FROM conversations \
             WHERE conversation_key = ?1 ORDER BY id ASC",
        )
        .bind(conversation_key)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(role, content)| CheckpointEntry { role, content })
            .collect())
    }

    /// Append one message to a conversation's checkpoint.
    ///
    /// The checkpoint is append-only; entries are never mutated in place.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    pub async fn append_checkpoint(
        &self,
        conversation_key: &str,
        role: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO conversations (conversation_key, role, content) VALUES (?1, ?2, ?3)",
        )
        .bind(conversation_key)
        .bind(role)
        .bind(content)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Returns a reference to the underlying pool (for ad-hoc test setup).
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn decode_column(row: &SqliteRow, idx: usize) -> Result<Value, StoreError> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_uppercase();

    let value = if type_name.contains("BOOL") {
        let v: bool = row.try_get(idx)?;
        Value::Bool(v)
    } else if type_name.contains("INT") {
        let v: i64 = row.try_get(idx)?;
        Value::from(v)
    } else if type_name.contains("REAL")
        || type_name.contains("FLOA")
        || type_name.contains("DOUB")
        || type_name.contains("NUMERIC")
    {
        let v: f64 = row.try_get(idx)?;
        Value::from(v)
    } else if type_name.contains("BLOB") {
        let v: Vec<u8> = row.try_get(idx)?;
        Value::String(format!("<{} bytes>", v.len()))
    } else {
        let v: String = row.try_get(idx)?;
        Value::String(normalize_timestamp(&v))
    };
    Ok(value)
}

/// Normalize timestamp-shaped text to ISO-8601; other text passes through.
///
/// SQLite's `datetime('now')` produces `YYYY-MM-DD HH:MM:SS`, which becomes
/// `YYYY-MM-DDTHH:MM:SS` so every caller sees one canonical form.
pub fn normalize_timestamp(text: &str) -> String {
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(parsed) = chrono::NaiveDateTime::parse_from_str(text, format) {
            return parsed.format("%Y-%m-%dT%H:%M:%S").to_string();
        }
    }
    text.to_owned()
}
