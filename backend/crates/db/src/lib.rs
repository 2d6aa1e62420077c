pub mod memory;
pub mod rubric;
pub mod schema;
pub mod scripts;
pub mod sync;

use coach_common::error::{CoachError, CoachResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create a Postgres connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> CoachResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| CoachError::Database(e.to_string()))
}
