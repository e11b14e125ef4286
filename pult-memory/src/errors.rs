//! Memory subsystem error types.

use pult_db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// The extraction collaborator failed or returned an unusable payload.
    #[error("extraction failed: {0}")]
    Extraction(String),
}

pub type MemoryResult<T> = Result<T, MemoryError>;
