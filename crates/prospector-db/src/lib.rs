//! Prospector Database Layer
//!
//! Provides `SQLite` storage through `SQLx` with embedded migrations.
//!
//! # Tables
//!
//! - **`processed_domains`**: domains already sent through email discovery,
//!   so credits are not spent twice on the same website across runs
//! - **`runs`**: one row per discovery run with its terminal status
//!
//! # Example
//!
//! ```ignore
//! use prospector_db::{processed_domains, Database, DomainOutcome};
//!
//! let db = Database::open("prospector.db").await?;
//! processed_domains::mark_domain_processed(db.pool(), "example.com", DomainOutcome::NotFound, None).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod connection;
pub mod error;
pub mod migrations;
pub mod processed_domains;
pub mod runs;

// Re-export commonly used types
pub use connection::DatabasePool;
pub use error::{DatabaseError, Result};
pub use processed_domains::{DomainOutcome, ProcessedDomain};
pub use runs::{RunRecord, RunStatus};

use std::path::Path;

/// High-level database handle.
#[derive(Debug, Clone)]
pub struct Database {
    pool: DatabasePool,
}

impl Database {
    /// Open the database at `path` without running migrations.
    ///
    /// # Arguments
    /// * `path` - Path to the database file (or `:memory:` for in-memory)
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let pool = DatabasePool::new(path).await?;
        Ok(Self { pool })
    }

    /// Open the database at `path` and bring the schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Self::new(path).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Create a database instance from an existing pool.
    #[must_use]
    pub fn from_pool(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Run all pending database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(self.pool.pool()).await
    }

    /// Get the current schema version.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(self.pool.pool()).await
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Sqlite> {
        self.pool.pool()
    }

    /// Close the database connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_migrations() {
        let db = Database::new(":memory:").await.expect("create database");

        let version_before = db.get_schema_version().await.expect("get version");
        assert_eq!(version_before, 0);

        db.run_migrations().await.expect("run migrations");

        let version_after = db.get_schema_version().await.expect("get version");
        assert_eq!(version_after, 2);
    }

    #[tokio::test]
    async fn test_processed_domains_schema() {
        let db = Database::open(":memory:").await.expect("open database");

        let columns: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM pragma_table_info('processed_domains') ORDER BY cid",
        )
        .fetch_all(db.pool())
        .await
        .expect("query columns");

        assert_eq!(columns, vec!["domain", "outcome", "email", "processed_at"]);
    }

    #[tokio::test]
    async fn test_outcome_constraint() {
        let db = Database::open(":memory:").await.expect("open database");

        let result = sqlx::query(
            "INSERT INTO processed_domains (domain, outcome, processed_at) VALUES ('x.example', 'maybe', '2026-01-01T00:00:00Z')",
        )
        .execute(db.pool())
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_database_close() {
        let db = Database::open(":memory:").await.expect("open database");
        db.close().await;
    }
}
