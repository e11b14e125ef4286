//! Long-term memory store: typed facts about the teacher, their classes,
//! students and school.
//!
//! The semantic identity of a fact is `(owner_id, scope, category, key)` —
//! enforced by a unique index. Writing an existing identity overwrites
//! value/importance/source, it never creates a second row.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};

/// Breadth of a memory fact: about the teacher themself, their school, one
/// of their classes, or a single student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    #[serde(rename = "self")]
    Own,
    School,
    Class,
    Student,
}

impl MemoryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryScope::Own => "self",
            MemoryScope::School => "school",
            MemoryScope::Class => "class",
            MemoryScope::Student => "student",
        }
    }
}

impl std::fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryScope {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "self" => Ok(MemoryScope::Own),
            "school" => Ok(MemoryScope::School),
            "class" => Ok(MemoryScope::Class),
            "student" => Ok(MemoryScope::Student),
            _ => Err(DbError::InvalidScope(s.to_string())),
        }
    }
}

/// The fixed, closed category taxonomy. Every persisted memory carries
/// exactly one of these tags; anything else is rejected at the validation
/// gate or remapped by consolidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    FaecherUndThemen,
    KlassenUndSchueler,
    Paedagogik,
    Bewertung,
    Materialien,
    Persoenliches,
    Feedback,
    Lehrplanbezuege,
}

impl MemoryCategory {
    pub const ALL: [MemoryCategory; 8] = [
        MemoryCategory::FaecherUndThemen,
        MemoryCategory::KlassenUndSchueler,
        MemoryCategory::Paedagogik,
        MemoryCategory::Bewertung,
        MemoryCategory::Materialien,
        MemoryCategory::Persoenliches,
        MemoryCategory::Feedback,
        MemoryCategory::Lehrplanbezuege,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::FaecherUndThemen => "faecher_und_themen",
            MemoryCategory::KlassenUndSchueler => "klassen_und_schueler",
            MemoryCategory::Paedagogik => "paedagogik",
            MemoryCategory::Bewertung => "bewertung",
            MemoryCategory::Materialien => "materialien",
            MemoryCategory::Persoenliches => "persoenliches",
            MemoryCategory::Feedback => "feedback",
            MemoryCategory::Lehrplanbezuege => "lehrplanbezuege",
        }
    }
}

impl std::fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryCategory {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MemoryCategory::ALL
            .iter()
            .find(|category| category.as_str() == s)
            .copied()
            .ok_or_else(|| DbError::InvalidCategory(s.to_string()))
    }
}

/// How a fact entered the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    Explicit,
    Inferred,
}

impl MemorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySource::Explicit => "explicit",
            MemorySource::Inferred => "inferred",
        }
    }
}

impl std::str::FromStr for MemorySource {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "explicit" => Ok(MemorySource::Explicit),
            "inferred" => Ok(MemorySource::Inferred),
            _ => Err(DbError::InvalidSource(s.to_string())),
        }
    }
}

/// The identity of a fact within one owner's store. Used as the upsert
/// conflict target and as the consolidation group key, so the tuple is
/// never re-derived with a different field order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryIdentity {
    pub scope: MemoryScope,
    pub category: MemoryCategory,
    pub key: String,
}

impl MemoryIdentity {
    pub fn new(scope: MemoryScope, category: MemoryCategory, key: impl Into<String>) -> Self {
        Self {
            scope,
            category,
            key: key.into(),
        }
    }
}

/// A fully typed memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub owner_id: String,
    pub scope: MemoryScope,
    /// Reference to the class or student the fact is about, when scoped.
    pub scope_ref: Option<String>,
    pub category: MemoryCategory,
    pub key: String,
    pub value: String,
    pub importance: f64,
    pub source: MemorySource,
    pub decay_days: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MemoryEntry {
    pub fn identity(&self) -> MemoryIdentity {
        MemoryIdentity::new(self.scope, self.category, self.key.clone())
    }
}

/// Input for an upsert. Importance is clamped to [0, 1] on construction.
#[derive(Debug, Clone)]
pub struct MemoryDraft {
    pub scope: MemoryScope,
    pub scope_ref: Option<String>,
    pub category: MemoryCategory,
    pub key: String,
    pub value: String,
    pub importance: f64,
    pub source: MemorySource,
    pub decay_days: Option<i64>,
}

impl MemoryDraft {
    pub fn new(
        scope: MemoryScope,
        category: MemoryCategory,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            scope,
            scope_ref: None,
            category,
            key: key.into(),
            value: value.into(),
            importance: 0.5,
            source: MemorySource::Inferred,
            decay_days: None,
        }
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_source(mut self, source: MemorySource) -> Self {
        self.source = source;
        self
    }

    pub fn with_scope_ref(mut self, scope_ref: impl Into<String>) -> Self {
        self.scope_ref = Some(scope_ref.into());
        self
    }

    pub fn identity(&self) -> MemoryIdentity {
        MemoryIdentity::new(self.scope, self.category, self.key.clone())
    }
}

/// Raw row as stored. `scope`/`category`/`source` stay unparsed strings so
/// legacy rows (pre-taxonomy data) remain readable for consolidation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MemoryRow {
    pub id: String,
    pub owner_id: String,
    pub scope: String,
    pub scope_ref: Option<String>,
    pub category: String,
    pub key: String,
    pub value: String,
    pub importance: f64,
    pub source: String,
    pub decay_days: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MemoryRow {
    /// Timestamp of the last write to this row.
    pub fn last_touch(&self) -> i64 {
        self.updated_at.max(self.created_at)
    }
}

impl TryFrom<MemoryRow> for MemoryEntry {
    type Error = DbError;

    fn try_from(row: MemoryRow) -> Result<Self, Self::Error> {
        Ok(MemoryEntry {
            scope: row.scope.parse()?,
            category: row.category.parse()?,
            source: row.source.parse()?,
            id: row.id,
            owner_id: row.owner_id,
            scope_ref: row.scope_ref,
            key: row.key,
            value: row.value,
            importance: row.importance,
            decay_days: row.decay_days,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_COLUMNS: &str = "id, owner_id, scope, scope_ref, category, key, value, importance, source, decay_days, created_at, updated_at";

/// Memory repository for database operations
pub struct MemoryRepository;

impl MemoryRepository {
    /// Insert or overwrite the fact with the draft's identity. The row id
    /// and created_at of an existing fact survive; value, importance,
    /// source, scope_ref and decay window are replaced (last write wins).
    pub async fn upsert(
        pool: &SqlitePool,
        owner_id: &str,
        draft: &MemoryDraft,
    ) -> DbResult<MemoryEntry> {
        let id = format!("mem_{}", Uuid::new_v4());
        let now = Utc::now().timestamp();
        let importance = draft.importance.clamp(0.0, 1.0);

        sqlx::query(
            "INSERT INTO memories (id, owner_id, scope, scope_ref, category, key, value, importance, source, decay_days, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(owner_id, scope, category, key) DO UPDATE SET
                 value = excluded.value,
                 importance = excluded.importance,
                 source = excluded.source,
                 scope_ref = excluded.scope_ref,
                 decay_days = excluded.decay_days,
                 updated_at = excluded.updated_at",
        )
        .bind(&id)
        .bind(owner_id)
        .bind(draft.scope.as_str())
        .bind(&draft.scope_ref)
        .bind(draft.category.as_str())
        .bind(&draft.key)
        .bind(&draft.value)
        .bind(importance)
        .bind(draft.source.as_str())
        .bind(draft.decay_days)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Self::get_by_identity(pool, owner_id, &draft.identity())
            .await?
            .ok_or_else(|| DbError::MemoryNotFound(draft.key.clone()))
    }

    /// Get an entry by id, restricted to the owner.
    pub async fn get(pool: &SqlitePool, owner_id: &str, id: &str) -> DbResult<Option<MemoryEntry>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM memories WHERE id = ? AND owner_id = ?");
        let row = sqlx::query_as::<_, MemoryRow>(&sql)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(pool)
            .await?;

        row.map(MemoryEntry::try_from).transpose()
    }

    /// Get an entry by its semantic identity.
    pub async fn get_by_identity(
        pool: &SqlitePool,
        owner_id: &str,
        identity: &MemoryIdentity,
    ) -> DbResult<Option<MemoryEntry>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM memories
             WHERE owner_id = ? AND scope = ? AND category = ? AND key = ?"
        );
        let row = sqlx::query_as::<_, MemoryRow>(&sql)
            .bind(owner_id)
            .bind(identity.scope.as_str())
            .bind(identity.category.as_str())
            .bind(&identity.key)
            .fetch_optional(pool)
            .await?;

        row.map(MemoryEntry::try_from).transpose()
    }

    /// List all entries for an owner. Rows with categories outside the
    /// taxonomy (legacy data awaiting consolidation) are skipped.
    pub async fn list_for_owner(pool: &SqlitePool, owner_id: &str) -> DbResult<Vec<MemoryEntry>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM memories
             WHERE owner_id = ?
             ORDER BY category, key"
        );
        let rows = sqlx::query_as::<_, MemoryRow>(&sql)
            .bind(owner_id)
            .fetch_all(pool)
            .await?;

        Ok(Self::parse_skipping_legacy(rows))
    }

    /// List an owner's entries in one category.
    pub async fn list_by_category(
        pool: &SqlitePool,
        owner_id: &str,
        category: MemoryCategory,
    ) -> DbResult<Vec<MemoryEntry>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM memories
             WHERE owner_id = ? AND category = ?
             ORDER BY key"
        );
        let rows = sqlx::query_as::<_, MemoryRow>(&sql)
            .bind(owner_id)
            .bind(category.as_str())
            .fetch_all(pool)
            .await?;

        Ok(Self::parse_skipping_legacy(rows))
    }

    /// List the owner's entries ranked by importance desc, then recency
    /// desc — the ordering handed to the extraction collaborator.
    pub async fn list_ranked(
        pool: &SqlitePool,
        owner_id: &str,
        limit: usize,
    ) -> DbResult<Vec<MemoryEntry>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM memories
             WHERE owner_id = ?
             ORDER BY importance DESC, updated_at DESC
             LIMIT ?"
        );
        let rows = sqlx::query_as::<_, MemoryRow>(&sql)
            .bind(owner_id)
            .bind(limit as i64)
            .fetch_all(pool)
            .await?;

        Ok(Self::parse_skipping_legacy(rows))
    }

    /// All rows for an owner, unparsed. Consolidation works on this view so
    /// legacy categories are visible to it.
    pub async fn list_raw_for_owner(
        pool: &SqlitePool,
        owner_id: &str,
    ) -> DbResult<Vec<MemoryRow>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM memories
             WHERE owner_id = ?
             ORDER BY created_at ASC, id ASC"
        );
        Ok(sqlx::query_as::<_, MemoryRow>(&sql)
            .bind(owner_id)
            .fetch_all(pool)
            .await?)
    }

    /// Direct correction: replace value (and optionally importance) of an
    /// owned entry.
    pub async fn correct(
        pool: &SqlitePool,
        owner_id: &str,
        id: &str,
        value: &str,
        importance: Option<f64>,
    ) -> DbResult<MemoryEntry> {
        let now = Utc::now().timestamp();
        let result = match importance {
            Some(importance) => {
                sqlx::query(
                    "UPDATE memories SET value = ?, importance = ?, source = 'explicit', updated_at = ?
                     WHERE id = ? AND owner_id = ?",
                )
                .bind(value)
                .bind(importance.clamp(0.0, 1.0))
                .bind(now)
                .bind(id)
                .bind(owner_id)
                .execute(pool)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE memories SET value = ?, source = 'explicit', updated_at = ?
                     WHERE id = ? AND owner_id = ?",
                )
                .bind(value)
                .bind(now)
                .bind(id)
                .bind(owner_id)
                .execute(pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(DbError::MemoryNotFound(id.to_string()));
        }

        Self::get(pool, owner_id, id)
            .await?
            .ok_or_else(|| DbError::MemoryNotFound(id.to_string()))
    }

    /// Delete an owned entry. Returns whether a row was removed.
    pub async fn delete(pool: &SqlitePool, owner_id: &str, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM memories WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete rows by id. Missing ids are a no-op, so concurrent
    /// consolidation passes can safely retry deletions.
    pub async fn delete_ids(pool: &SqlitePool, owner_id: &str, ids: &[String]) -> DbResult<u64> {
        let mut deleted = 0;
        for id in ids {
            let result = sqlx::query("DELETE FROM memories WHERE id = ? AND owner_id = ?")
                .bind(id)
                .bind(owner_id)
                .execute(pool)
                .await?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }

    /// Rewrite the category of a single row (consolidation migration). A
    /// relabel is not a touch, so updated_at stays as it was.
    pub async fn set_category(
        pool: &SqlitePool,
        id: &str,
        category: MemoryCategory,
    ) -> DbResult<()> {
        sqlx::query("UPDATE memories SET category = ? WHERE id = ?")
            .bind(category.as_str())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Raise a row's importance and refresh its updated_at (consolidation
    /// merge keeper).
    pub async fn raise_importance(
        pool: &SqlitePool,
        id: &str,
        importance: f64,
        now: i64,
    ) -> DbResult<()> {
        sqlx::query("UPDATE memories SET importance = ?, updated_at = ? WHERE id = ?")
            .bind(importance.clamp(0.0, 1.0))
            .bind(now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Distinct owners with at least one memory entry.
    pub async fn distinct_owners(pool: &SqlitePool) -> DbResult<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT owner_id FROM memories ORDER BY owner_id")
                .fetch_all(pool)
                .await?;
        Ok(rows.into_iter().map(|(owner,)| owner).collect())
    }

    fn parse_skipping_legacy(rows: Vec<MemoryRow>) -> Vec<MemoryEntry> {
        rows.into_iter()
            .filter_map(|row| match MemoryEntry::try_from(row) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("skipping memory row pending consolidation: {e}");
                    None
                }
            })
            .collect()
    }
}
