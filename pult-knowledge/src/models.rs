//! Data model of the curriculum knowledge base.

use serde::{Deserialize, Serialize};

use crate::errors::KnowledgeError;

/// Lifecycle of an uploaded curriculum document. A document only becomes
/// `Active` once all of its chunks are committed; anything else leaves it
/// `Processing` (detectable and retryable by callers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Processing,
    Active,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Active => "active",
        }
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(DocumentStatus::Processing),
            "active" => Ok(DocumentStatus::Active),
            _ => Err(KnowledgeError::InvalidStatus(s.to_string())),
        }
    }
}

/// An uploaded curriculum document, owned by exactly one teacher and keyed
/// by (owner, subject, grade band).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurriculumDocument {
    pub id: String,
    pub owner_id: String,
    pub subject: String,
    pub grade_band: String,
    pub region: String,
    pub status: DocumentStatus,
    /// Leading excerpt of the extracted text.
    pub excerpt: String,
    /// Heuristic topic outline (no model call involved).
    pub outline: Vec<String>,
    pub source_filename: String,
    pub content_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Insert shape for a chunk. Subject/grade/region are denormalized from the
/// owning document for filtering.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub start_char: i64,
    pub end_char: i64,
    pub subject: String,
    pub grade_band: String,
    pub region: String,
}

/// A stored chunk as read back from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CurriculumChunk {
    pub id: i64,
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub start_char: i64,
    pub end_char: i64,
    pub subject: String,
    pub grade_band: String,
    pub region: String,
}

/// Result of one ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSummary {
    pub document_id: String,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    pub outline: Vec<String>,
    /// True when the uploaded text was byte-identical to the already active
    /// document and re-embedding was skipped.
    pub skipped_unchanged: bool,
}

/// One retrieval hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurriculumMatch {
    pub document_id: String,
    pub subject: String,
    pub grade_band: String,
    pub region: String,
    /// Chunk text (primary path) or a window around the keyword hit
    /// (fallback path).
    pub excerpt: String,
    /// Cosine similarity on the primary path; absent on the fallback path.
    pub score: Option<f32>,
    pub label: String,
}

/// Ranked retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub matches: Vec<CurriculumMatch>,
    /// One shared attribution line across the returned matches.
    pub attribution: Option<String>,
    /// Set instead of an error when the owner has nothing to search.
    pub guidance: Option<String>,
}

impl SearchOutcome {
    pub fn empty() -> Self {
        Self {
            matches: Vec::new(),
            attribution: None,
            guidance: None,
        }
    }

    pub fn guidance(message: impl Into<String>) -> Self {
        Self {
            matches: Vec::new(),
            attribution: None,
            guidance: Some(message.into()),
        }
    }
}
