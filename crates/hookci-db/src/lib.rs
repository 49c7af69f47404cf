//! Storage layer for the hookci build relay.
//!
//! Provides the entity store trait with in-memory and PostgreSQL
//! implementations, lazy paged queries, and the file-backed log sink.

pub mod error;
pub mod logs;
pub mod repo;

pub use error::{DbError, DbResult};
pub use logs::FileLogSink;
pub use repo::*;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
