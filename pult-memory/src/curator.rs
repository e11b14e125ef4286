//! Post-response memory curation.
//!
//! Runs after the visible chat reply has been produced: asks the extraction
//! collaborator for candidate facts, validates them against the fixed
//! category taxonomy and upserts the survivors by their identity. Invalid
//! categories are dropped and logged, never persisted.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{debug, warn};

use pult_core::{ChatTurn, MemorySettings};
use pult_db::{
    MemoryCategory, MemoryDraft, MemoryRepository, MemoryScope, MemorySource,
    SessionSummaryRepository,
};

use crate::errors::MemoryResult;
use crate::extractor::{
    MemoryExtractor, RawCandidate, build_extraction_request, parse_extraction_payload,
};

/// What one capture run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub stored: usize,
    pub dropped_invalid: usize,
    pub summary_updated: bool,
}

/// Cost throttle, not a correctness gate: capture runs for substantial
/// messages, and otherwise on every n-th teacher turn.
pub fn should_capture(message: &str, teacher_turn_count: u32, settings: &MemorySettings) -> bool {
    if message.chars().count() > settings.capture_min_chars {
        return true;
    }
    settings.capture_every_nth_turn > 0
        && teacher_turn_count > 0
        && teacher_turn_count % settings.capture_every_nth_turn == 0
}

pub struct MemoryCurator {
    pool: SqlitePool,
    extractor: Arc<dyn MemoryExtractor>,
    settings: MemorySettings,
}

impl MemoryCurator {
    pub fn new(
        pool: SqlitePool,
        extractor: Arc<dyn MemoryExtractor>,
        settings: MemorySettings,
    ) -> Self {
        Self {
            pool,
            extractor,
            settings,
        }
    }

    /// Run one capture pass over the conversation.
    pub async fn capture(
        &self,
        owner_id: &str,
        conversation_id: &str,
        turns: &[ChatTurn],
    ) -> MemoryResult<CaptureReport> {
        let existing = MemoryRepository::list_ranked(
            &self.pool,
            owner_id,
            self.settings.extraction_context_memories,
        )
        .await?;

        let request = build_extraction_request(
            &self.settings,
            owner_id,
            conversation_id,
            turns,
            &existing,
        );
        let payload = self.extractor.propose(&request).await?;
        let outcome = parse_extraction_payload(&payload);

        let mut report = CaptureReport::default();

        for candidate in outcome.candidates {
            match validate_candidate(&candidate) {
                Some(draft) => {
                    MemoryRepository::upsert(&self.pool, owner_id, &draft).await?;
                    report.stored += 1;
                }
                None => report.dropped_invalid += 1,
            }
        }

        if let Some(summary) = outcome.session_summary {
            SessionSummaryRepository::upsert(&self.pool, owner_id, conversation_id, &summary)
                .await?;
            report.summary_updated = true;
        }

        debug!(
            owner = owner_id,
            stored = report.stored,
            dropped = report.dropped_invalid,
            "memory capture finished"
        );

        Ok(report)
    }
}

/// The validation gate. A candidate outside the fixed 8-tag taxonomy, or
/// without a usable key/value, is dropped here and never persisted.
fn validate_candidate(candidate: &RawCandidate) -> Option<MemoryDraft> {
    let category: MemoryCategory = match candidate.category.parse() {
        Ok(category) => category,
        Err(_) => {
            warn!(
                category = %candidate.category,
                key = %candidate.key,
                "dropping candidate with category outside the taxonomy"
            );
            return None;
        }
    };

    let key = candidate.key.trim();
    let value = candidate.value.trim();
    if key.is_empty() || value.is_empty() {
        warn!("dropping candidate with empty key or value");
        return None;
    }

    let scope = match candidate.scope.as_deref() {
        None => MemoryScope::Own,
        Some(raw) => match raw.parse() {
            Ok(scope) => scope,
            Err(_) => {
                warn!(scope = raw, "dropping candidate with unknown scope");
                return None;
            }
        },
    };

    let source = candidate
        .source
        .as_deref()
        .and_then(|raw| raw.parse::<MemorySource>().ok())
        .unwrap_or(MemorySource::Inferred);

    let mut draft = MemoryDraft::new(scope, category, key, value)
        .with_importance(candidate.importance)
        .with_source(source);
    draft.scope_ref = candidate.scope_ref.clone();
    draft.decay_days = candidate.decay_days;

    Some(draft)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pult_db::test_helpers::create_test_pool;

    use crate::extractor::ExtractionRequest;

    /// Extraction collaborator stub returning a canned payload.
    struct CannedExtractor {
        payload: serde_json::Value,
    }

    #[async_trait]
    impl MemoryExtractor for CannedExtractor {
        async fn propose(&self, _request: &ExtractionRequest) -> MemoryResult<serde_json::Value> {
            Ok(self.payload.clone())
        }
    }

    fn turns() -> Vec<ChatTurn> {
        vec![
            ChatTurn::teacher("Mein Lieblingsfach ist eigentlich Physik."),
            ChatTurn::assistant("Gut zu wissen!"),
        ]
    }

    async fn run_capture(
        pool: &sqlx::SqlitePool,
        payload: serde_json::Value,
    ) -> CaptureReport {
        let curator = MemoryCurator::new(
            pool.clone(),
            Arc::new(CannedExtractor { payload }),
            MemorySettings::default(),
        );
        curator.capture("teacher-1", "conv-1", &turns()).await.unwrap()
    }

    #[tokio::test]
    async fn test_valid_candidates_are_persisted() {
        let db = create_test_pool().await.unwrap();
        let report = run_capture(
            db.pool(),
            serde_json::json!({
                "memories": [
                    {"scope": "self", "category": "faecher_und_themen", "key": "Lieblingsfach", "value": "Physik", "importance": 0.8, "source": "explicit"},
                    {"scope": "class", "category": "klassen_und_schueler", "key": "Klasse 7b", "value": "28 Kinder", "scope_ref": "class-7b"},
                ],
                "session_summary": "Lieblingsfach und Klassengröße festgehalten."
            }),
        )
        .await;

        assert_eq!(report.stored, 2);
        assert_eq!(report.dropped_invalid, 0);
        assert!(report.summary_updated);

        let entries = MemoryRepository::list_for_owner(db.pool(), "teacher-1")
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);

        let summary = SessionSummaryRepository::get(db.pool(), "teacher-1", "conv-1")
            .await
            .unwrap()
            .unwrap();
        assert!(summary.summary.contains("Lieblingsfach"));
    }

    #[tokio::test]
    async fn test_invalid_category_is_dropped_not_persisted() {
        let db = create_test_pool().await.unwrap();
        let report = run_capture(
            db.pool(),
            serde_json::json!({
                "memories": [
                    {"scope": "self", "category": "hobbys_und_freizeit", "key": "Hobby", "value": "Klettern"},
                    {"scope": "self", "category": "persoenliches", "key": "Kaffee", "value": "schwarz"},
                ]
            }),
        )
        .await;

        assert_eq!(report.stored, 1);
        assert_eq!(report.dropped_invalid, 1);

        let entries = MemoryRepository::list_for_owner(db.pool(), "teacher-1")
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "Kaffee");
    }

    #[tokio::test]
    async fn test_repeated_proposals_overwrite_by_identity() {
        let db = create_test_pool().await.unwrap();

        run_capture(
            db.pool(),
            serde_json::json!({
                "memories": [
                    {"scope": "self", "category": "faecher_und_themen", "key": "Lieblingsfach", "value": "Physik"}
                ]
            }),
        )
        .await;
        run_capture(
            db.pool(),
            serde_json::json!({
                "memories": [
                    {"scope": "self", "category": "faecher_und_themen", "key": "Lieblingsfach", "value": "Mathe"}
                ]
            }),
        )
        .await;

        let entries = MemoryRepository::list_for_owner(db.pool(), "teacher-1")
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, "Mathe");
    }

    #[tokio::test]
    async fn test_importance_is_clamped() {
        let db = create_test_pool().await.unwrap();
        run_capture(
            db.pool(),
            serde_json::json!({
                "memories": [
                    {"scope": "self", "category": "persoenliches", "key": "Motivation", "value": "hoch", "importance": 7.5}
                ]
            }),
        )
        .await;

        let entries = MemoryRepository::list_for_owner(db.pool(), "teacher-1")
            .await
            .unwrap();
        assert!((entries[0].importance - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_should_capture_throttle() {
        let settings = MemorySettings::default();

        let long = "Dieses Schuljahr unterrichte ich zum ersten Mal eine fünfte Klasse in Mathematik.";
        assert!(long.chars().count() > 50);
        assert!(should_capture(long, 1, &settings));

        assert!(!should_capture("Danke!", 1, &settings));
        assert!(!should_capture("Danke!", 2, &settings));
        assert!(should_capture("Danke!", 3, &settings));
        assert!(should_capture("Danke!", 6, &settings));
    }
}
