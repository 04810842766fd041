//! Run history for tracking discovery runs.

use crate::error::{DatabaseError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// A recorded discovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique identifier for the run
    pub id: String,
    /// Business niche searched
    pub niche: String,
    /// Requested number of leads
    pub target_lead_count: u32,
    /// Current or final status
    pub status: RunStatus,
    /// Leads committed
    pub lead_count: u32,
    /// Expansion rounds used
    pub rounds: u32,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished (if finished)
    pub completed_at: Option<DateTime<Utc>>,
}

/// Status of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunStatus {
    /// Run is in progress
    InProgress,
    /// Target lead count reached
    GoalReached,
    /// No expansion strategy produced new work
    Exhausted,
    /// Stopped at the round cap
    RoundLimitReached,
    /// Stopped on request
    Cancelled,
    /// Refused to start
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "InProgress"),
            Self::GoalReached => write!(f, "GoalReached"),
            Self::Exhausted => write!(f, "Exhausted"),
            Self::RoundLimitReached => write!(f, "RoundLimitReached"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "InProgress" => Ok(Self::InProgress),
            "GoalReached" => Ok(Self::GoalReached),
            "Exhausted" => Ok(Self::Exhausted),
            "RoundLimitReached" => Ok(Self::RoundLimitReached),
            "Cancelled" => Ok(Self::Cancelled),
            "Failed" => Ok(Self::Failed),
            other => Err(DatabaseError::Decode(format!("unknown run status '{other}'"))),
        }
    }
}

/// Create a new in-progress run.
pub async fn create_run(
    pool: &SqlitePool,
    niche: String,
    target_lead_count: u32,
) -> Result<RunRecord> {
    let id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let status = RunStatus::InProgress;

    sqlx::query(
        "INSERT INTO runs (id, niche, target_lead_count, status, lead_count, rounds, started_at)
         VALUES (?, ?, ?, ?, 0, 0, ?)",
    )
    .bind(&id)
    .bind(&niche)
    .bind(i64::from(target_lead_count))
    .bind(status.to_string())
    .bind(started_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(RunRecord {
        id,
        niche,
        target_lead_count,
        status,
        lead_count: 0,
        rounds: 0,
        started_at,
        completed_at: None,
    })
}

/// Record the final state of a run.
pub async fn complete_run(
    pool: &SqlitePool,
    id: &str,
    status: RunStatus,
    lead_count: u32,
    rounds: u32,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE runs SET status = ?, lead_count = ?, rounds = ?, completed_at = ? WHERE id = ?",
    )
    .bind(status.to_string())
    .bind(i64::from(lead_count))
    .bind(i64::from(rounds))
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound(format!("run '{id}' not found")));
    }
    Ok(())
}

/// Fetch a run by id.
pub async fn get_run(pool: &SqlitePool, id: &str) -> Result<Option<RunRecord>> {
    let row = sqlx::query(
        "SELECT id, niche, target_lead_count, status, lead_count, rounds, started_at, completed_at
         FROM runs WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| decode_run(&row)).transpose()
}

/// Most recent runs first.
pub async fn list_recent_runs(pool: &SqlitePool, limit: u32) -> Result<Vec<RunRecord>> {
    let rows = sqlx::query(
        "SELECT id, niche, target_lead_count, status, lead_count, rounds, started_at, completed_at
         FROM runs ORDER BY started_at DESC LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.iter().map(decode_run).collect()
}

fn decode_run(row: &sqlx::sqlite::SqliteRow) -> Result<RunRecord> {
    let status: String = row.get("status");
    let started_at: String = row.get("started_at");
    let completed_at: Option<String> = row.get("completed_at");

    Ok(RunRecord {
        id: row.get("id"),
        niche: row.get("niche"),
        target_lead_count: decode_count(row.get("target_lead_count"))?,
        status: status.parse()?,
        lead_count: decode_count(row.get("lead_count"))?,
        rounds: decode_count(row.get("rounds"))?,
        started_at: parse_timestamp(&started_at)?,
        completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn decode_count(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| DatabaseError::Decode(format!("count out of range: {value}")))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Decode(format!("invalid timestamp '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    async fn setup_test_db() -> Database {
        Database::open(":memory:").await.expect("open test database")
    }

    #[tokio::test]
    async fn test_create_run() {
        let db = setup_test_db().await;

        let run = create_run(db.pool(), "dentist".to_string(), 5)
            .await
            .expect("create run");

        assert_eq!(run.niche, "dentist");
        assert_eq!(run.target_lead_count, 5);
        assert_eq!(run.status, RunStatus::InProgress);
        assert!(run.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_complete_run() {
        let db = setup_test_db().await;
        let run = create_run(db.pool(), "dentist".to_string(), 5)
            .await
            .expect("create run");

        complete_run(db.pool(), &run.id, RunStatus::GoalReached, 5, 2)
            .await
            .expect("complete run");

        let stored = get_run(db.pool(), &run.id)
            .await
            .expect("get run")
            .expect("run exists");
        assert_eq!(stored.status, RunStatus::GoalReached);
        assert_eq!(stored.lead_count, 5);
        assert_eq!(stored.rounds, 2);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_complete_missing_run() {
        let db = setup_test_db().await;
        let result = complete_run(db.pool(), "nope", RunStatus::Cancelled, 0, 0).await;
        assert!(matches!(result, Err(DatabaseError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_recent_runs() {
        let db = setup_test_db().await;
        for niche in ["dentist", "plumber", "bakery"] {
            create_run(db.pool(), niche.to_string(), 10)
                .await
                .expect("create run");
        }

        let runs = list_recent_runs(db.pool(), 2).await.expect("list runs");
        assert_eq!(runs.len(), 2);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            RunStatus::InProgress,
            RunStatus::GoalReached,
            RunStatus::Exhausted,
            RunStatus::RoundLimitReached,
            RunStatus::Cancelled,
            RunStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<RunStatus>().expect("parse"), status);
        }
    }
}
