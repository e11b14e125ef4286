//! Curriculum store: documents, chunks and their embedding vectors.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use libsqlite3_sys::{SQLITE_OK, sqlite3_auto_extension};
use sqlite_vec::sqlite3_vec_init;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use uuid::Uuid;

use pult_core::KnowledgeSettings;

use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::models::{ChunkRecord, CurriculumChunk, CurriculumDocument, DocumentStatus};

static SQLITE_VEC_INIT_RC: OnceLock<i32> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct CurriculumStore {
    pool: SqlitePool,
}

impl CurriculumStore {
    pub async fn open(db_path: &Path, embedding_dim: Option<usize>) -> KnowledgeResult<Self> {
        init_sqlite_vec_once()?;
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA journal_mode = WAL")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA synchronous = NORMAL")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA cache_size = -64000")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;
        ensure_vec_table(&pool, embedding_dim).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Resolve the curriculum database path from settings or the platform data
/// directory.
pub fn curriculum_db_path(settings: &KnowledgeSettings) -> KnowledgeResult<PathBuf> {
    if let Some(path) = &settings.db_path_override {
        return Ok(path.clone());
    }
    let data_dir = dirs::data_dir().ok_or(KnowledgeError::MissingDataDir)?;
    Ok(data_dir.join("pult").join("curriculum.sqlite3"))
}

fn init_sqlite_vec_once() -> KnowledgeResult<()> {
    let rc = *SQLITE_VEC_INIT_RC.get_or_init(|| unsafe {
        // register sqlite-vec for every future connection; the entry point
        // type is inferred so the cast tracks the libsqlite3-sys bindings
        sqlite3_auto_extension(Some(std::mem::transmute(sqlite3_vec_init as *const ())))
    });

    if rc == SQLITE_OK {
        Ok(())
    } else {
        Err(KnowledgeError::SqliteVec(format!(
            "sqlite-vec init failed with code {rc}"
        )))
    }
}

async fn run_migrations(pool: &SqlitePool) -> KnowledgeResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn ensure_vec_table(pool: &SqlitePool, embedding_dim: Option<usize>) -> KnowledgeResult<()> {
    let existing: Option<(String,)> =
        sqlx::query_as("SELECT value FROM meta WHERE key = 'embedding_dim' LIMIT 1")
            .fetch_optional(pool)
            .await?;

    let dim = if let Some((value,)) = existing {
        value.parse::<usize>().ok()
    } else {
        embedding_dim
    };

    if let Some(dimension) = dim {
        ensure_vec_table_dim(pool, dimension).await?;
    }

    Ok(())
}

/// Create the vector table for the given dimensionality (idempotent) and
/// record the dimension in `meta`.
pub async fn ensure_vec_table_dim(pool: &SqlitePool, dimension: usize) -> KnowledgeResult<()> {
    if !vec_table_exists(pool).await? {
        let create_sql = format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS chunk_vec USING vec0(embedding float[{}] distance_metric=cosine)",
            dimension
        );
        sqlx::query(&create_sql).execute(pool).await?;
    }

    sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES ('embedding_dim', ?)")
        .bind(dimension.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn vec_table_exists(pool: &SqlitePool) -> KnowledgeResult<bool> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'chunk_vec'",
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

/// Insert shape for a document upsert.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub owner_id: String,
    pub subject: String,
    pub grade_band: String,
    pub region: String,
    pub excerpt: String,
    pub outline: Vec<String>,
    pub source_filename: String,
    pub content_hash: String,
}

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    id: String,
    owner_id: String,
    subject: String,
    grade_band: String,
    region: String,
    status: String,
    excerpt: String,
    outline_json: String,
    source_filename: String,
    content_hash: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<DocumentRow> for CurriculumDocument {
    type Error = KnowledgeError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        Ok(CurriculumDocument {
            status: row.status.parse()?,
            outline: serde_json::from_str(&row.outline_json).unwrap_or_default(),
            id: row.id,
            owner_id: row.owner_id,
            subject: row.subject,
            grade_band: row.grade_band,
            region: row.region,
            excerpt: row.excerpt,
            source_filename: row.source_filename,
            content_hash: row.content_hash,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const DOCUMENT_COLUMNS: &str = "id, owner_id, subject, grade_band, region, status, excerpt, outline_json, source_filename, content_hash, created_at, updated_at";

/// Upsert the document record keyed by (owner, subject, grade band) and
/// reset its status to `processing`. The row id and created_at of an
/// existing document survive.
pub async fn upsert_document(
    pool: &SqlitePool,
    new: &NewDocument,
) -> KnowledgeResult<CurriculumDocument> {
    let id = format!("doc_{}", Uuid::new_v4());
    let now = Utc::now().timestamp();
    let outline_json = serde_json::to_string(&new.outline).unwrap_or_else(|_| "[]".to_string());

    sqlx::query(
        "INSERT INTO documents (id, owner_id, subject, grade_band, region, status, excerpt, outline_json, source_filename, content_hash, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, 'processing', ?, ?, ?, ?, ?, ?)
         ON CONFLICT(owner_id, subject, grade_band) DO UPDATE SET
             region = excluded.region,
             status = 'processing',
             excerpt = excluded.excerpt,
             outline_json = excluded.outline_json,
             source_filename = excluded.source_filename,
             content_hash = excluded.content_hash,
             updated_at = excluded.updated_at",
    )
    .bind(&id)
    .bind(&new.owner_id)
    .bind(&new.subject)
    .bind(&new.grade_band)
    .bind(&new.region)
    .bind(&new.excerpt)
    .bind(&outline_json)
    .bind(&new.source_filename)
    .bind(&new.content_hash)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    get_document_by_key(pool, &new.owner_id, &new.subject, &new.grade_band)
        .await?
        .ok_or(KnowledgeError::Sqlx(sqlx::Error::RowNotFound))
}

pub async fn get_document_by_key(
    pool: &SqlitePool,
    owner_id: &str,
    subject: &str,
    grade_band: &str,
) -> KnowledgeResult<Option<CurriculumDocument>> {
    let sql = format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents
         WHERE owner_id = ? AND subject = ? AND grade_band = ?"
    );
    let row = sqlx::query_as::<_, DocumentRow>(&sql)
        .bind(owner_id)
        .bind(subject)
        .bind(grade_band)
        .fetch_optional(pool)
        .await?;

    row.map(CurriculumDocument::try_from).transpose()
}

/// Get a document by id, restricted to the owner.
pub async fn get_document(
    pool: &SqlitePool,
    owner_id: &str,
    id: &str,
) -> KnowledgeResult<Option<CurriculumDocument>> {
    let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ? AND owner_id = ?");
    let row = sqlx::query_as::<_, DocumentRow>(&sql)
        .bind(id)
        .bind(owner_id)
        .fetch_optional(pool)
        .await?;

    row.map(CurriculumDocument::try_from).transpose()
}

pub async fn list_documents(
    pool: &SqlitePool,
    owner_id: &str,
) -> KnowledgeResult<Vec<CurriculumDocument>> {
    let sql = format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents
         WHERE owner_id = ?
         ORDER BY subject, grade_band"
    );
    let rows = sqlx::query_as::<_, DocumentRow>(&sql)
        .bind(owner_id)
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(CurriculumDocument::try_from).collect()
}

pub async fn set_document_status(
    pool: &SqlitePool,
    id: &str,
    status: DocumentStatus,
) -> KnowledgeResult<()> {
    sqlx::query("UPDATE documents SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count_chunks(pool: &SqlitePool, document_id: &str) -> KnowledgeResult<usize> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .fetch_one(pool)
        .await?;
    Ok(count as usize)
}

/// Replace a document's chunks and their vectors in one transaction.
///
/// Deletes whatever was stored for the document, inserts the new chunks plus
/// their embeddings, then verifies the persisted row count before
/// committing. A mismatch rolls everything back and the document stays
/// `processing`.
pub async fn replace_document_chunks(
    pool: &SqlitePool,
    document_id: &str,
    chunks: &[ChunkRecord],
    embeddings: &[Vec<f32>],
) -> KnowledgeResult<usize> {
    if chunks.len() != embeddings.len() {
        return Err(KnowledgeError::ChunkCountMismatch {
            expected: chunks.len(),
            actual: embeddings.len(),
        });
    }

    let mut tx = pool.begin().await?;

    let existing_ids: Vec<(i64,)> = sqlx::query_as("SELECT id FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .fetch_all(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for (chunk_id,) in &existing_ids {
        sqlx::query("DELETE FROM chunk_vec WHERE rowid = ?")
            .bind(chunk_id)
            .execute(&mut *tx)
            .await?;
    }

    let now = Utc::now().timestamp();
    for (chunk, embedding) in chunks.iter().zip(embeddings) {
        let result = sqlx::query(
            "INSERT INTO chunks (document_id, chunk_index, content, start_char, end_char, subject, grade_band, region, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.content)
        .bind(chunk.start_char)
        .bind(chunk.end_char)
        .bind(&chunk.subject)
        .bind(&chunk.grade_band)
        .bind(&chunk.region)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let chunk_id = result.last_insert_rowid();
        let payload = serde_json::to_string(embedding)
            .map_err(|e| KnowledgeError::Embedding(format!("embedding serialize failed: {e}")))?;

        sqlx::query("INSERT OR REPLACE INTO chunk_vec(rowid, embedding) VALUES (?, ?)")
            .bind(chunk_id)
            .bind(payload)
            .execute(&mut *tx)
            .await?;
    }

    let (persisted,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .fetch_one(&mut *tx)
        .await?;

    if persisted as usize != chunks.len() {
        // dropping the transaction rolls back
        return Err(KnowledgeError::ChunkCountMismatch {
            expected: chunks.len(),
            actual: persisted as usize,
        });
    }

    tx.commit().await?;
    Ok(persisted as usize)
}

/// All chunks of the owner's active documents, in document order. Used by
/// the keyword fallback scan.
pub async fn list_owner_chunks(
    pool: &SqlitePool,
    owner_id: &str,
) -> KnowledgeResult<Vec<CurriculumChunk>> {
    Ok(sqlx::query_as::<_, CurriculumChunk>(
        "SELECT c.id, c.document_id, c.chunk_index, c.content, c.start_char, c.end_char, c.subject, c.grade_band, c.region
         FROM chunks c
         JOIN documents d ON d.id = c.document_id
         WHERE d.owner_id = ? AND d.status = 'active'
         ORDER BY c.document_id, c.chunk_index",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await?)
}
