//! PostgreSQL persistence for storecrawl.
//!
//! [`ProductRepository`] implements both
//! [`ProductStore`](storecrawl_core::traits::ProductStore), used by the crawl
//! writer, and [`EmbeddingStore`](storecrawl_core::traits::EmbeddingStore),
//! used by the embedding backfill job.
//!
//! The schema lives in `migrations/` and is compiled into the crate, so the
//! CLI and the integration tests apply exactly the same DDL.

mod repository;

pub use repository::ProductRepository;

use sqlx::PgPool;
use storecrawl_core::error::AppError;
use tracing::info;

/// Schema migrations in apply order. Each entry may hold several statements.
pub const MIGRATIONS: &[&str] = &[include_str!("../migrations/0001_catalog.sql")];

/// Applies every migration. All DDL uses `IF NOT EXISTS`, so this is safe to
/// run against an already initialized database.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    for migration in MIGRATIONS {
        sqlx::raw_sql(migration)
            .execute(pool)
            .await
            .map_err(AppError::DatabaseError)?;
    }
    info!(count = MIGRATIONS.len(), "Schema migrations applied");
    Ok(())
}
