//! Curriculum ingestion pipeline.
//!
//! Extract text, segment it, derive an outline, embed the chunks and
//! replace the stored chunk set. The owning document only flips to `active`
//! after the replacement transaction verified the persisted chunk count;
//! any earlier failure leaves it `processing` (retryable).

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::{debug, info};

use pult_core::KnowledgeSettings;

use crate::embeddings::EmbeddingProvider;
use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::extract::TextExtractor;
use crate::models::{ChunkRecord, DocumentStatus, IngestSummary};
use crate::outline::derive_outline;
use crate::segmenter::segment_text;
use crate::storage::{
    NewDocument, count_chunks, ensure_vec_table_dim, get_document_by_key, replace_document_chunks,
    set_document_status, upsert_document,
};

const EXCERPT_CHARS: usize = 500;

/// One upload to ingest.
#[derive(Debug, Clone)]
pub struct IngestRequest<'a> {
    pub owner_id: &'a str,
    pub subject: &'a str,
    pub grade_band: &'a str,
    pub region: &'a str,
    pub bytes: &'a [u8],
    pub filename: &'a str,
}

pub async fn ingest(
    pool: &SqlitePool,
    extractor: &dyn TextExtractor,
    embedder: &dyn EmbeddingProvider,
    settings: &KnowledgeSettings,
    request: IngestRequest<'_>,
) -> KnowledgeResult<IngestSummary> {
    let text = extractor.extract(request.bytes, request.filename).await?;
    if text.trim().is_empty() {
        return Err(KnowledgeError::EmptyDocument);
    }

    let segments = segment_text(
        &text,
        settings.segmenter.target_size,
        settings.segmenter.overlap,
    );
    if segments.is_empty() {
        return Err(KnowledgeError::EmptyDocument);
    }

    let outline = derive_outline(&text, settings.outline_max_entries);
    let content_hash = compute_hash(&text);

    if let Some(existing) =
        get_document_by_key(pool, request.owner_id, request.subject, request.grade_band).await?
        && existing.content_hash == content_hash
        && existing.status == DocumentStatus::Active
    {
        debug!(
            document_id = %existing.id,
            "document content unchanged, skipping re-ingestion"
        );
        return Ok(IngestSummary {
            chunk_count: count_chunks(pool, &existing.id).await?,
            document_id: existing.id,
            status: DocumentStatus::Active,
            outline: existing.outline,
            skipped_unchanged: true,
        });
    }

    let document = upsert_document(
        pool,
        &NewDocument {
            owner_id: request.owner_id.to_string(),
            subject: request.subject.to_string(),
            grade_band: request.grade_band.to_string(),
            region: request.region.to_string(),
            excerpt: text.chars().take(EXCERPT_CHARS).collect(),
            outline: outline.clone(),
            source_filename: request.filename.to_string(),
            content_hash,
        },
    )
    .await?;

    let inputs: Vec<String> = segments.iter().map(|segment| segment.text.clone()).collect();
    let embeddings = embedder.embed_batch(&inputs).await?;
    if embeddings.len() != segments.len() {
        return Err(KnowledgeError::Embedding(format!(
            "embedding service returned {} vectors for {} chunks",
            embeddings.len(),
            segments.len()
        )));
    }

    let dim = embeddings
        .first()
        .map(|vector| vector.len())
        .ok_or(KnowledgeError::EmptyDocument)?;
    if let Some(expected) = settings.embedding_dim
        && expected != dim
    {
        return Err(KnowledgeError::EmbeddingDimMismatch {
            expected,
            actual: dim,
        });
    }
    if embeddings.iter().any(|vector| vector.len() != dim) {
        return Err(KnowledgeError::Embedding(
            "embedding response vectors have mixed dimensions".to_string(),
        ));
    }
    ensure_vec_table_dim(pool, dim).await?;

    let chunks: Vec<ChunkRecord> = segments
        .iter()
        .map(|segment| ChunkRecord {
            document_id: document.id.clone(),
            chunk_index: segment.index as i64,
            content: segment.text.clone(),
            start_char: segment.start_char as i64,
            end_char: segment.end_char as i64,
            subject: document.subject.clone(),
            grade_band: document.grade_band.clone(),
            region: document.region.clone(),
        })
        .collect();

    let persisted = replace_document_chunks(pool, &document.id, &chunks, &embeddings).await?;

    // only after the verified replace does the document become visible
    set_document_status(pool, &document.id, DocumentStatus::Active).await?;

    info!(
        document_id = %document.id,
        chunks = persisted,
        subject = %document.subject,
        "curriculum document ingested"
    );

    Ok(IngestSummary {
        document_id: document.id,
        status: DocumentStatus::Active,
        chunk_count: persisted,
        outline,
        skipped_unchanged: false,
    })
}

fn compute_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}
