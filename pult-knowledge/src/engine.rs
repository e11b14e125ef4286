//! Facade over the curriculum store, ingestion pipeline and retrieval
//! service.

use std::sync::Arc;

use pult_core::KnowledgeSettings;

use crate::embeddings::{EmbeddingProvider, HttpEmbeddingClient};
use crate::errors::KnowledgeResult;
use crate::extract::{PlainTextExtractor, TextExtractor};
use crate::ingest::{IngestRequest, ingest};
use crate::models::{CurriculumDocument, IngestSummary, SearchOutcome};
use crate::search::{search, search_with};
use crate::storage::{CurriculumStore, curriculum_db_path, get_document, list_documents};

#[derive(Clone)]
pub struct CurriculumEngine {
    settings: KnowledgeSettings,
    store: CurriculumStore,
    embedder: Arc<dyn EmbeddingProvider>,
    extractor: Arc<dyn TextExtractor>,
}

impl CurriculumEngine {
    /// Open the engine with the default HTTP embedding client and
    /// plain-text extractor.
    pub async fn open(settings: KnowledgeSettings) -> KnowledgeResult<Self> {
        let embedder = Arc::new(HttpEmbeddingClient::new(&settings));
        let extractor = Arc::new(PlainTextExtractor);
        Self::with_collaborators(settings, embedder, extractor).await
    }

    /// Open the engine with injected collaborators (tests, other transports).
    pub async fn with_collaborators(
        settings: KnowledgeSettings,
        embedder: Arc<dyn EmbeddingProvider>,
        extractor: Arc<dyn TextExtractor>,
    ) -> KnowledgeResult<Self> {
        let db_path = curriculum_db_path(&settings)?;
        let store = CurriculumStore::open(&db_path, settings.embedding_dim).await?;
        Ok(Self {
            settings,
            store,
            embedder,
            extractor,
        })
    }

    pub fn store(&self) -> &CurriculumStore {
        &self.store
    }

    /// Ingest one uploaded document for an owner: extract, segment,
    /// outline, embed, replace chunks, activate.
    pub async fn ingest(&self, request: IngestRequest<'_>) -> KnowledgeResult<IngestSummary> {
        ingest(
            self.store.pool(),
            self.extractor.as_ref(),
            self.embedder.as_ref(),
            &self.settings,
            request,
        )
        .await
    }

    /// Semantic retrieval over the owner's documents with keyword fallback.
    pub async fn search(&self, owner_id: &str, query: &str) -> KnowledgeResult<SearchOutcome> {
        search(
            self.store.pool(),
            self.embedder.as_ref(),
            &self.settings,
            owner_id,
            query,
        )
        .await
    }

    /// Retrieval with explicit ranking parameters.
    pub async fn search_with(
        &self,
        owner_id: &str,
        query: &str,
        top_k: usize,
        similarity_threshold: f32,
    ) -> KnowledgeResult<SearchOutcome> {
        search_with(
            self.store.pool(),
            self.embedder.as_ref(),
            &self.settings,
            owner_id,
            query,
            top_k,
            similarity_threshold,
        )
        .await
    }

    pub async fn list_documents(&self, owner_id: &str) -> KnowledgeResult<Vec<CurriculumDocument>> {
        list_documents(self.store.pool(), owner_id).await
    }

    pub async fn get_document(
        &self,
        owner_id: &str,
        id: &str,
    ) -> KnowledgeResult<Option<CurriculumDocument>> {
        get_document(self.store.pool(), owner_id, id).await
    }
}
