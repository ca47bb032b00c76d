//! Optional per-turn trace emission.
//!
//! A [`TraceSink`] is invoked once per completed turn with tags and
//! metadata. The sink is optional and infallible from the turn handler's
//! perspective — its absence never affects the turn outcome.

use serde_json::Value;

/// One turn's trace record.
#[derive(Debug, Clone)]
pub struct TurnTrace {
    /// Classification tags (project, feature, model).
    pub tags: Vec<String>,
    /// Free-form metadata (user id, model, plan status).
    pub metadata: Value,
}

/// Sink for per-turn trace records.
pub trait TraceSink: Send + Sync {
    /// Record one turn.
    fn record(&self, trace: &TurnTrace);
}

/// Sink that emits trace records through the `tracing` pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTraceSink;

impl TraceSink for LogTraceSink {
    fn record(&self, trace: &TurnTrace) {
        tracing::info!(
            tags = ?trace.tags,
            metadata = %trace.metadata,
            "turn trace"
        );
    }
}
