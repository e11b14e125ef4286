//! Seam to the external extraction collaborator (a language model).
//!
//! The collaborator receives a transcript window plus the owner's existing
//! memories and proposes candidate facts as JSON. The payload is parsed
//! defensively, candidate by candidate: one malformed entry never sinks the
//! rest.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use pult_core::{ChatTurn, MemorySettings};
use pult_db::MemoryEntry;

use crate::errors::MemoryResult;

/// Context handed to the extraction collaborator.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub owner_id: String,
    pub conversation_id: String,
    /// Rendered transcript of the last few turns.
    pub transcript: String,
    /// Rendered existing memories so the collaborator avoids proposing
    /// near-duplicates.
    pub memory_context: String,
}

/// External extraction collaborator. Returns the raw JSON payload; the
/// curator owns validation and persistence.
#[async_trait]
pub trait MemoryExtractor: Send + Sync {
    async fn propose(&self, request: &ExtractionRequest) -> MemoryResult<serde_json::Value>;
}

/// One proposed fact, still unvalidated. Category stays a free string here;
/// the curator's validation gate decides whether it is persisted.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCandidate {
    #[serde(default)]
    pub scope: Option<String>,
    pub category: String,
    pub key: String,
    pub value: String,
    #[serde(default = "default_importance")]
    pub importance: f64,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub scope_ref: Option<String>,
    #[serde(default)]
    pub decay_days: Option<i64>,
}

fn default_importance() -> f64 {
    0.5
}

/// Parsed collaborator output.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    pub candidates: Vec<RawCandidate>,
    pub session_summary: Option<String>,
}

/// Pick apart the collaborator's JSON without trusting its shape.
pub fn parse_extraction_payload(payload: &serde_json::Value) -> ExtractionOutcome {
    let mut outcome = ExtractionOutcome::default();

    if let Some(items) = payload.get("memories").and_then(|v| v.as_array()) {
        for item in items {
            match serde_json::from_value::<RawCandidate>(item.clone()) {
                Ok(candidate) => outcome.candidates.push(candidate),
                Err(e) => warn!("dropping malformed memory candidate: {e}"),
            }
        }
    }

    outcome.session_summary = payload
        .get("session_summary")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);

    outcome
}

/// Render the last `window` turns as a plain transcript.
pub fn build_transcript(turns: &[ChatTurn], window: usize) -> String {
    let start = turns.len().saturating_sub(window);
    turns[start..]
        .iter()
        .map(|turn| format!("{}: {}", turn.role, turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render existing memories for the collaborator's dedup context.
pub fn render_memory_context(memories: &[MemoryEntry]) -> String {
    memories
        .iter()
        .map(|entry| {
            format!(
                "- [{}/{}] {}: {} (Wichtigkeit {:.2})",
                entry.scope,
                entry.category,
                entry.key,
                entry.value,
                entry.importance
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the full request from settings, conversation state and the
/// owner's ranked memories.
pub fn build_extraction_request(
    settings: &MemorySettings,
    owner_id: &str,
    conversation_id: &str,
    turns: &[ChatTurn],
    existing: &[MemoryEntry],
) -> ExtractionRequest {
    ExtractionRequest {
        owner_id: owner_id.to_string(),
        conversation_id: conversation_id.to_string(),
        transcript: build_transcript(turns, settings.extraction_window_turns),
        memory_context: render_memory_context(existing),
    }
}
