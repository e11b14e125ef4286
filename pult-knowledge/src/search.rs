//! Curriculum retrieval: semantic ranking with a keyword fallback.
//!
//! The primary path embeds the query and ranks the owner's chunks by cosine
//! similarity. Whenever the embedding call fails — outage, bad key,
//! timeout — the query degrades to a case-insensitive keyword scan over the
//! owner's own chunks. Both paths produce the same attribution-line format,
//! and neither ever returns a chunk from a document the caller does not own.

use sqlx::SqlitePool;
use tracing::warn;

use pult_core::KnowledgeSettings;

use crate::embeddings::EmbeddingProvider;
use crate::errors::KnowledgeResult;
use crate::models::{CurriculumChunk, CurriculumMatch, SearchOutcome};
use crate::storage::{list_documents, list_owner_chunks, vec_table_exists};

/// Keyword fallback tuning. Fixed by design, not configuration.
const FALLBACK_MAX_WORDS: usize = 3;
const FALLBACK_MIN_WORD_CHARS: usize = 2;
const FALLBACK_MATCHES_PER_WORD_PER_DOC: usize = 3;
const FALLBACK_WINDOW_CHARS: usize = 400;
const FALLBACK_HEAD_CHARS: usize = 800;
const FALLBACK_DEDUP_PREFIX_CHARS: usize = 200;
const FALLBACK_MAX_RESULTS: usize = 5;

const NO_CURRICULUM_GUIDANCE: &str = "Es sind noch keine Lehrplandokumente hinterlegt. Lade zuerst einen Lehrplan hoch, damit ich daraus zitieren kann.";

pub async fn search(
    pool: &SqlitePool,
    embedder: &dyn EmbeddingProvider,
    settings: &KnowledgeSettings,
    owner_id: &str,
    query: &str,
) -> KnowledgeResult<SearchOutcome> {
    search_with(
        pool,
        embedder,
        settings,
        owner_id,
        query,
        settings.search.top_k,
        settings.search.similarity_threshold,
    )
    .await
}

pub async fn search_with(
    pool: &SqlitePool,
    embedder: &dyn EmbeddingProvider,
    settings: &KnowledgeSettings,
    owner_id: &str,
    query: &str,
    top_k: usize,
    similarity_threshold: f32,
) -> KnowledgeResult<SearchOutcome> {
    let documents = list_documents(pool, owner_id).await?;
    if documents.is_empty() {
        return Ok(SearchOutcome::guidance(NO_CURRICULUM_GUIDANCE));
    }

    if !vec_table_exists(pool).await? {
        // nothing was ever embedded; only the keyword path can serve
        return keyword_fallback(pool, owner_id, query).await;
    }

    let query_vector = match embedder.embed_batch(&[query.to_string()]).await {
        Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
        Ok(_) => {
            warn!("embedding service returned no vector, using keyword fallback");
            return keyword_fallback(pool, owner_id, query).await;
        }
        Err(e) => {
            warn!("embedding unavailable, using keyword fallback: {e}");
            return keyword_fallback(pool, owner_id, query).await;
        }
    };

    let matches =
        semantic_matches(pool, settings, owner_id, &query_vector, top_k, similarity_threshold)
            .await?;
    let attribution = attribution_line(&matches);

    Ok(SearchOutcome {
        matches,
        attribution,
        guidance: None,
    })
}

async fn semantic_matches(
    pool: &SqlitePool,
    settings: &KnowledgeSettings,
    owner_id: &str,
    query_vector: &[f32],
    top_k: usize,
    similarity_threshold: f32,
) -> KnowledgeResult<Vec<CurriculumMatch>> {
    let payload = serde_json::to_string(query_vector).map_err(|e| {
        crate::errors::KnowledgeError::Embedding(format!("embedding serialize failed: {e}"))
    })?;

    let knn_limit = settings.search.knn_limit.max(top_k.max(1));
    let rows = sqlx::query_as::<_, (String, String, String, String, String, f32)>(
        r#"SELECT c.document_id, c.content, c.subject, c.grade_band, c.region, v.distance
           FROM chunk_vec v
           JOIN chunks c ON c.id = v.rowid
           JOIN documents d ON d.id = c.document_id
           WHERE v.embedding MATCH ? AND d.owner_id = ? AND d.status = 'active'
           ORDER BY v.distance ASC
           LIMIT ?"#,
    )
    .bind(payload)
    .bind(owner_id)
    .bind(knn_limit as i64)
    .fetch_all(pool)
    .await?;

    let mut matches = Vec::new();
    for (document_id, content, subject, grade_band, region, distance) in rows {
        let similarity = 1.0 - distance;
        if similarity <= similarity_threshold {
            continue;
        }
        matches.push(CurriculumMatch {
            label: result_label(&subject, &region),
            document_id,
            subject,
            grade_band,
            region,
            excerpt: content,
            score: Some(similarity),
        });
        if matches.len() >= top_k {
            break;
        }
    }

    Ok(matches)
}

async fn keyword_fallback(
    pool: &SqlitePool,
    owner_id: &str,
    query: &str,
) -> KnowledgeResult<SearchOutcome> {
    let chunks = list_owner_chunks(pool, owner_id).await?;
    let matches = keyword_scan(&chunks, query);
    let attribution = attribution_line(&matches);

    Ok(SearchOutcome {
        matches,
        attribution,
        guidance: None,
    })
}

/// Pure keyword scan over the owner's chunks: the first three query words
/// longer than two characters, matched case-insensitively, at most three
/// hits per word per document, a ±400-character window per hit, deduplicated
/// on the first 200 window characters, capped at five results.
fn keyword_scan(chunks: &[CurriculumChunk], query: &str) -> Vec<CurriculumMatch> {
    let words = fallback_words(query);
    if words.is_empty() {
        return Vec::new();
    }

    let mut matches: Vec<CurriculumMatch> = Vec::new();
    let mut seen_prefixes: Vec<String> = Vec::new();

    'words: for word in &words {
        let mut per_doc: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();

        for chunk in chunks {
            let doc_hits = per_doc.entry(chunk.document_id.as_str()).or_insert(0);
            if *doc_hits >= FALLBACK_MATCHES_PER_WORD_PER_DOC {
                continue;
            }

            let lowered = chunk.content.to_lowercase();
            let Some(byte_pos) = lowered.find(word.as_str()) else {
                continue;
            };
            *doc_hits += 1;

            let window = excerpt_window(&chunk.content, &lowered, byte_pos);
            let prefix: String = window.chars().take(FALLBACK_DEDUP_PREFIX_CHARS).collect();
            if seen_prefixes.contains(&prefix) {
                continue;
            }
            seen_prefixes.push(prefix);

            matches.push(CurriculumMatch {
                label: result_label(&chunk.subject, &chunk.region),
                document_id: chunk.document_id.clone(),
                subject: chunk.subject.clone(),
                grade_band: chunk.grade_band.clone(),
                region: chunk.region.clone(),
                excerpt: window,
                score: None,
            });
            if matches.len() >= FALLBACK_MAX_RESULTS {
                break 'words;
            }
        }
    }

    matches
}

fn fallback_words(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|word| word.chars().count() > FALLBACK_MIN_WORD_CHARS)
        .take(FALLBACK_MAX_WORDS)
        .map(|word| word.to_lowercase())
        .collect()
}

/// ±400 characters around the first occurrence, or the first 800 characters
/// when the match position cannot be mapped back onto the original text.
fn excerpt_window(content: &str, lowered: &str, byte_pos: usize) -> String {
    let char_pos = lowered[..byte_pos].chars().count();
    let total_chars = content.chars().count();

    if char_pos >= total_chars {
        return content.chars().take(FALLBACK_HEAD_CHARS).collect();
    }

    let start = char_pos.saturating_sub(FALLBACK_WINDOW_CHARS);
    let end = (char_pos + FALLBACK_WINDOW_CHARS).min(total_chars);
    content.chars().skip(start).take(end - start).collect()
}

fn result_label(subject: &str, region: &str) -> String {
    format!("{subject} · {region}")
}

/// One shared attribution line listing the distinct (subject, grade band,
/// region) combinations across the returned matches.
fn attribution_line(matches: &[CurriculumMatch]) -> Option<String> {
    if matches.is_empty() {
        return None;
    }

    let mut sources: Vec<String> = Vec::new();
    for result in matches {
        let entry = format!(
            "{} (Jahrgangsstufe {}, {})",
            result.subject, result.grade_band, result.region
        );
        if !sources.contains(&entry) {
            sources.push(entry);
        }
    }

    let prefix = if sources.len() == 1 { "Quelle" } else { "Quellen" };
    Some(format!("{prefix}: {}", sources.join("; ")))
}
