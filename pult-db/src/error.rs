//! Database error types.

/// Database operation errors
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// SQL error from sqlx
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Config directory not found
    #[error("Config/data directory not found")]
    NoConfigDir,

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Memory scope string not in the closed set
    #[error("Invalid memory scope: {0}")]
    InvalidScope(String),

    /// Memory category string not in the closed 8-tag set
    #[error("Invalid memory category: {0}")]
    InvalidCategory(String),

    /// Memory source string not in the closed set
    #[error("Invalid memory source: {0}")]
    InvalidSource(String),

    /// Memory entry not found (or owned by someone else)
    #[error("Memory entry not found: {0}")]
    MemoryNotFound(String),
}

/// Result type alias for database operations
pub type DbResult<T> = Result<T, DbError>;
