//! Test helpers for the pult application database.

use crate::{
    db::PultDbPool,
    error::{DbError, DbResult},
    sqlite_runtime::create_in_memory_pool,
};

/// Create an in-memory application database for testing
pub async fn create_test_pool() -> DbResult<PultDbPool> {
    let pool = create_in_memory_pool(1).await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| DbError::Migration(e.to_string()))?;

    Ok(PultDbPool::from_pool(pool))
}
