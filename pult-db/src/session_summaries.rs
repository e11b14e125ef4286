//! Per-conversation synopses, upserted by conversation identity.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{DbError, DbResult};

/// One free-text synopsis per conversation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionSummary {
    pub id: String,
    pub owner_id: String,
    pub conversation_id: String,
    pub summary: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Session summary repository for database operations
pub struct SessionSummaryRepository;

impl SessionSummaryRepository {
    /// Insert or replace the synopsis for a conversation.
    pub async fn upsert(
        pool: &SqlitePool,
        owner_id: &str,
        conversation_id: &str,
        summary: &str,
    ) -> DbResult<SessionSummary> {
        let id = format!("sum_{}", Uuid::new_v4());
        let now = Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO session_summaries (id, owner_id, conversation_id, summary, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(conversation_id) DO UPDATE SET
                 summary = excluded.summary,
                 updated_at = excluded.updated_at",
        )
        .bind(&id)
        .bind(owner_id)
        .bind(conversation_id)
        .bind(summary)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Self::get(pool, owner_id, conversation_id)
            .await?
            .ok_or_else(|| DbError::MemoryNotFound(conversation_id.to_string()))
    }

    /// Get the synopsis for a conversation, restricted to the owner.
    pub async fn get(
        pool: &SqlitePool,
        owner_id: &str,
        conversation_id: &str,
    ) -> DbResult<Option<SessionSummary>> {
        Ok(sqlx::query_as::<_, SessionSummary>(
            "SELECT id, owner_id, conversation_id, summary, created_at, updated_at
             FROM session_summaries
             WHERE conversation_id = ? AND owner_id = ?",
        )
        .bind(conversation_id)
        .bind(owner_id)
        .fetch_optional(pool)
        .await?)
    }

    /// Most recently updated synopses for an owner.
    pub async fn list_recent(
        pool: &SqlitePool,
        owner_id: &str,
        limit: usize,
    ) -> DbResult<Vec<SessionSummary>> {
        Ok(sqlx::query_as::<_, SessionSummary>(
            "SELECT id, owner_id, conversation_id, summary, created_at, updated_at
             FROM session_summaries
             WHERE owner_id = ?
             ORDER BY updated_at DESC
             LIMIT ?",
        )
        .bind(owner_id)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?)
    }
}
