//! Knowledge engine configuration types.
//!
//! These are the resolved (non-optional) settings used by `pult-knowledge`.
//! Every field carries a serde default so partial TOML files work.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Resolved knowledge engine settings (all values filled with defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSettings {
    /// Base URL of the embedding service (OpenAI-compatible).
    #[serde(default = "default_embedding_url")]
    pub embedding_url: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Expected embedding dimensionality. When unset, the dimension of the
    /// first embedding response is recorded and enforced from then on.
    #[serde(default)]
    pub embedding_dim: Option<usize>,
    /// Texts per embedding request. The client never sends more than 100
    /// regardless of this value.
    #[serde(default = "default_embedding_batch")]
    pub embedding_batch: usize,
    /// API key for the embedding service, usually injected from the
    /// environment rather than the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_api_key: Option<String>,
    /// Override the curriculum database path. Primarily for testing.
    #[serde(default)]
    pub db_path_override: Option<PathBuf>,
    #[serde(default = "default_outline_max_entries")]
    pub outline_max_entries: usize,
    #[serde(default)]
    pub segmenter: SegmenterDefaults,
    #[serde(default)]
    pub search: SearchDefaults,
}

impl Default for KnowledgeSettings {
    fn default() -> Self {
        Self {
            embedding_url: default_embedding_url(),
            embedding_model: default_embedding_model(),
            embedding_dim: None,
            embedding_batch: default_embedding_batch(),
            embedding_api_key: None,
            db_path_override: None,
            outline_max_entries: default_outline_max_entries(),
            segmenter: SegmenterDefaults::default(),
            search: SearchDefaults::default(),
        }
    }
}

/// Text segmenter tuning (character counts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterDefaults {
    #[serde(default = "default_target_size")]
    pub target_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for SegmenterDefaults {
    fn default() -> Self {
        Self {
            target_size: default_target_size(),
            overlap: default_overlap(),
        }
    }
}

/// Retrieval tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDefaults {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minimum cosine similarity a chunk must exceed to be returned.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Nearest-neighbour candidates fetched before owner filtering and
    /// thresholding. Larger than `top_k` so post-filtering does not starve
    /// the result list.
    #[serde(default = "default_knn_limit")]
    pub knn_limit: usize,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
            knn_limit: default_knn_limit(),
        }
    }
}

fn default_embedding_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_batch() -> usize {
    100
}

fn default_outline_max_entries() -> usize {
    30
}

fn default_target_size() -> usize {
    1500
}

fn default_overlap() -> usize {
    200
}

fn default_top_k() -> usize {
    5
}

fn default_similarity_threshold() -> f32 {
    0.25
}

fn default_knn_limit() -> usize {
    40
}
