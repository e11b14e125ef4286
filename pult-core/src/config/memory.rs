//! Memory subsystem configuration types.

use serde::{Deserialize, Serialize};

/// Resolved memory extraction and consolidation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    /// Conversation turns handed to the extraction collaborator.
    #[serde(default = "default_extraction_window_turns")]
    pub extraction_window_turns: usize,
    /// Existing memories (ranked by importance, then recency) handed to the
    /// extraction collaborator as dedup context.
    #[serde(default = "default_extraction_context_memories")]
    pub extraction_context_memories: usize,
    /// Messages at or below this length only trigger capture on every n-th
    /// turn.
    #[serde(default = "default_capture_min_chars")]
    pub capture_min_chars: usize,
    #[serde(default = "default_capture_every_nth_turn")]
    pub capture_every_nth_turn: u32,
    /// Minimum pause between consolidation passes for the same owner.
    #[serde(default = "default_consolidation_cooldown_seconds")]
    pub consolidation_cooldown_seconds: u64,
    /// Entries below `archive_min_importance` untouched for this many days
    /// are removed by consolidation.
    #[serde(default = "default_archive_after_days")]
    pub archive_after_days: i64,
    #[serde(default = "default_archive_min_importance")]
    pub archive_min_importance: f64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            extraction_window_turns: default_extraction_window_turns(),
            extraction_context_memories: default_extraction_context_memories(),
            capture_min_chars: default_capture_min_chars(),
            capture_every_nth_turn: default_capture_every_nth_turn(),
            consolidation_cooldown_seconds: default_consolidation_cooldown_seconds(),
            archive_after_days: default_archive_after_days(),
            archive_min_importance: default_archive_min_importance(),
        }
    }
}

fn default_extraction_window_turns() -> usize {
    6
}

fn default_extraction_context_memories() -> usize {
    30
}

fn default_capture_min_chars() -> usize {
    50
}

fn default_capture_every_nth_turn() -> u32 {
    3
}

fn default_consolidation_cooldown_seconds() -> u64 {
    600
}

fn default_archive_after_days() -> i64 {
    90
}

fn default_archive_min_importance() -> f64 {
    0.5
}
