use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use pult_knowledge::errors::{KnowledgeError, KnowledgeResult};
use pult_knowledge::storage::count_chunks;
use pult_knowledge::{
    CurriculumEngine, DocumentStatus, EmbeddingProvider, IngestRequest, KnowledgeSettings,
    PlainTextExtractor,
};

/// Deterministic bag-of-keywords embedder: one dimension per topic keyword
/// plus a constant bias dimension so no vector is ever zero.
struct MockEmbedder;

const TOPIC_KEYWORDS: [&str; 8] = [
    "brüche",
    "geometrie",
    "prozent",
    "algebra",
    "zahlen",
    "messen",
    "daten",
    "funktion",
];

fn keyword_embedding(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut vector: Vec<f32> = TOPIC_KEYWORDS
        .iter()
        .map(|kw| if lower.contains(kw) { 1.0 } else { 0.0 })
        .collect();
    vector.push(1.0);
    vector
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed_batch(&self, inputs: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|text| keyword_embedding(text)).collect())
    }
}

fn test_settings(tmp: &TempDir) -> KnowledgeSettings {
    let mut settings = KnowledgeSettings::default();
    settings.db_path_override = Some(tmp.path().join("curriculum.sqlite3"));
    settings.embedding_dim = Some(9);
    settings.segmenter.target_size = 400;
    settings.segmenter.overlap = 60;
    settings
}

async fn open_engine(tmp: &TempDir) -> CurriculumEngine {
    CurriculumEngine::with_collaborators(
        test_settings(tmp),
        Arc::new(MockEmbedder),
        Arc::new(PlainTextExtractor),
    )
    .await
    .expect("open engine")
}

fn curriculum_text() -> String {
    let sections = [
        "1. Zahlen und Operationen\nDie Schülerinnen und Schüler vertiefen das Rechnen mit natürlichen Zahlen und lernen Brüche kennen, vergleichen und ordnen sie.",
        "2. Brüche und Dezimalzahlen\nBrüche werden erweitert und gekürzt. Dezimalzahlen werden auf der Zahlengeraden verortet und in Alltagssituationen angewendet.",
        "3. Geometrie\nFlächeninhalt und Umfang von Rechtecken werden berechnet. Symmetrien werden erkannt und einfache Körper aus Netzen gebaut.",
        "4. Prozentrechnung\nProzent als Anteil von Hundert. Die Lernenden berechnen Prozentwerte in Sachaufgaben rund um Einkauf und Zinsen.",
        "5. Daten und Zufall\nDaten werden in Diagrammen dargestellt und interpretiert. Einfache Zufallsexperimente werden durchgeführt und ausgewertet.",
    ];

    let mut text = String::new();
    for section in sections {
        text.push_str(section);
        // pad each section so the document comfortably exceeds 5,000 characters
        for _ in 0..8 {
            text.push_str("\n\nDie Unterrichtseinheit umfasst Übungen, Differenzierungsmaterial und eine kurze Lernstandserhebung am Ende der Woche.");
        }
        text.push_str("\n\n");
    }
    text
}

fn request<'a>(owner: &'a str, bytes: &'a [u8]) -> IngestRequest<'a> {
    IngestRequest {
        owner_id: owner,
        subject: "Mathematik",
        grade_band: "5-6",
        region: "Bayern",
        bytes,
        filename: "lehrplan-mathe.txt",
    }
}

#[tokio::test]
async fn test_ingest_activates_document_with_chunks() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp).await;
    let text = curriculum_text();
    assert!(text.chars().count() >= 5000);

    let summary = engine
        .ingest(request("teacher-1", text.as_bytes()))
        .await
        .unwrap();

    assert_eq!(summary.status, DocumentStatus::Active);
    assert!(summary.chunk_count >= 3, "got {}", summary.chunk_count);
    assert!(!summary.skipped_unchanged);
    assert!(!summary.outline.is_empty());

    let documents = engine.list_documents("teacher-1").await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].status, DocumentStatus::Active);
    assert_eq!(documents[0].subject, "Mathematik");

    let persisted = count_chunks(engine.store().pool(), &documents[0].id)
        .await
        .unwrap();
    assert_eq!(persisted, summary.chunk_count);
}

#[tokio::test]
async fn test_reingest_unchanged_content_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp).await;
    let text = curriculum_text();

    let first = engine
        .ingest(request("teacher-1", text.as_bytes()))
        .await
        .unwrap();
    let second = engine
        .ingest(request("teacher-1", text.as_bytes()))
        .await
        .unwrap();

    assert!(second.skipped_unchanged);
    assert_eq!(second.document_id, first.document_id);
    assert_eq!(second.chunk_count, first.chunk_count);
}

#[tokio::test]
async fn test_reingest_replaces_chunks_without_leftovers() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp).await;

    let long = curriculum_text();
    let first = engine
        .ingest(request("teacher-1", long.as_bytes()))
        .await
        .unwrap();

    let short = "1. Geometrie\n\nNur noch ein einziger kurzer Abschnitt über Geometrie.";
    let second = engine
        .ingest(request("teacher-1", short.as_bytes()))
        .await
        .unwrap();

    // same document identity, fully replaced chunk set
    assert_eq!(second.document_id, first.document_id);
    assert!(second.chunk_count < first.chunk_count);

    let persisted = count_chunks(engine.store().pool(), &second.document_id)
        .await
        .unwrap();
    assert_eq!(persisted, second.chunk_count);
}

#[tokio::test]
async fn test_semantic_search_ranks_relevant_chunk_first() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp).await;
    engine
        .ingest(request("teacher-1", curriculum_text().as_bytes()))
        .await
        .unwrap();

    let outcome = engine
        .search("teacher-1", "Wie führe ich Brüche ein?")
        .await
        .unwrap();

    assert!(outcome.guidance.is_none());
    assert!(!outcome.matches.is_empty());
    let top = &outcome.matches[0];
    assert!(top.excerpt.to_lowercase().contains("brüche"));
    let score = top.score.expect("semantic path carries a score");
    assert!(score > 0.25);
    assert_eq!(top.label, "Mathematik · Bayern");

    let attribution = outcome.attribution.unwrap();
    assert!(attribution.starts_with("Quelle"));
    assert!(attribution.contains("Mathematik"));
}

/// Embedding service outage on every call.
struct OutageEmbedder;

#[async_trait]
impl EmbeddingProvider for OutageEmbedder {
    async fn embed_batch(&self, _inputs: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        Err(KnowledgeError::Embedding("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_failed_ingest_leaves_document_processing_and_retryable() {
    let tmp = TempDir::new().unwrap();
    let text = curriculum_text();

    let broken_engine = CurriculumEngine::with_collaborators(
        test_settings(&tmp),
        Arc::new(OutageEmbedder),
        Arc::new(PlainTextExtractor),
    )
    .await
    .unwrap();

    let result = broken_engine
        .ingest(request("teacher-1", text.as_bytes()))
        .await;
    assert!(result.is_err());

    // the document is visible as processing, never silently active
    let documents = broken_engine.list_documents("teacher-1").await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].status, DocumentStatus::Processing);

    // a retry against a healthy embedding service completes the upload
    let engine = open_engine(&tmp).await;
    let summary = engine
        .ingest(request("teacher-1", text.as_bytes()))
        .await
        .unwrap();
    assert_eq!(summary.status, DocumentStatus::Active);
    assert!(!summary.skipped_unchanged);
}

#[tokio::test]
async fn test_empty_document_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp).await;

    let result = engine.ingest(request("teacher-1", b"   \n\n   ")).await;
    assert!(matches!(result, Err(KnowledgeError::EmptyDocument)));

    // nothing half-ingested is left behind
    assert!(engine.list_documents("teacher-1").await.unwrap().is_empty());
}
