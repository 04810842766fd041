//! Database migration management.
//!
//! SQL files under `migrations/` are embedded at compile time and applied in
//! order; applied versions are tracked in `_sqlx_migrations`.

use crate::error::{DatabaseError, Result};
use sqlx::{Pool, Sqlite};

/// Run all pending database migrations.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    tracing::info!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration execution failed: {e}")))?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}

/// Get the current schema version.
///
/// Returns 0 if no migrations have been applied yet.
pub async fn get_schema_version(pool: &Pool<Sqlite>) -> Result<i64> {
    let table_exists = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?
        > 0;

    if !table_exists {
        return Ok(0);
    }

    let version =
        sqlx::query_scalar::<_, i64>("SELECT COALESCE(MAX(version), 0) FROM _sqlx_migrations")
            .fetch_optional(pool)
            .await?
            .unwrap_or(0);

    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DatabasePool;

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = DatabasePool::new(":memory:").await.expect("create pool");

        run_migrations(pool.pool()).await.expect("run migrations");

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name"
        )
        .fetch_all(pool.pool())
        .await
        .expect("query tables");

        assert_eq!(tables, vec!["processed_domains", "runs"]);
    }

    #[tokio::test]
    async fn test_schema_version_and_idempotence() {
        let pool = DatabasePool::new(":memory:").await.expect("create pool");

        assert_eq!(get_schema_version(pool.pool()).await.expect("version"), 0);

        run_migrations(pool.pool()).await.expect("first run");
        run_migrations(pool.pool())
            .await
            .expect("second run should be idempotent");

        assert_eq!(get_schema_version(pool.pool()).await.expect("version"), 2);
    }
}
