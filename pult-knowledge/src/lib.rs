//! Curriculum knowledge engine: ingestion, storage and retrieval of
//! uploaded curriculum documents.

pub mod embeddings;
pub mod engine;
pub mod errors;
pub mod extract;
pub mod ingest;
pub mod models;
pub mod outline;
pub mod search;
pub mod segmenter;
pub mod storage;

pub use pult_core::{KnowledgeSettings, SearchDefaults, SegmenterDefaults};

pub use embeddings::{EMBEDDING_BATCH_MAX, EmbeddingProvider, HttpEmbeddingClient};
pub use engine::CurriculumEngine;
pub use errors::{KnowledgeError, KnowledgeResult};
pub use extract::{PlainTextExtractor, TextExtractor};
pub use ingest::IngestRequest;
pub use models::{
    ChunkRecord, CurriculumChunk, CurriculumDocument, CurriculumMatch, DocumentStatus,
    IngestSummary, SearchOutcome,
};
pub use segmenter::{Segment, rejoin_segments, segment_text};
