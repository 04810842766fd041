//! Processed-domain tracking.
//!
//! Email discovery costs credits per lookup. Every domain sent through
//! discovery is recorded here with its outcome so later runs can skip it, or
//! reuse the email that was found.

use crate::error::{DatabaseError, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;

/// Result of running discovery against a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainOutcome {
    /// An email was found
    Found,
    /// Discovery ran and found nothing
    NotFound,
    /// Discovery failed for a reason other than exhaustion
    Failed,
}

impl DomainOutcome {
    /// Column value for this outcome.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Found => "found",
            Self::NotFound => "not_found",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for DomainOutcome {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "found" => Ok(Self::Found),
            "not_found" => Ok(Self::NotFound),
            "failed" => Ok(Self::Failed),
            other => Err(DatabaseError::Decode(format!(
                "unknown domain outcome '{other}'"
            ))),
        }
    }
}

/// A domain that has been through email discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedDomain {
    /// Normalized domain
    pub domain: String,
    /// What discovery produced
    pub outcome: DomainOutcome,
    /// Email found, when the outcome is `Found`
    pub email: Option<String>,
    /// ISO 8601 timestamp of the last lookup
    pub processed_at: String,
}

/// Lowercase, trim and drop a leading `www.`.
#[must_use]
pub fn normalize_domain(domain: &str) -> String {
    let lowered = domain.trim().to_lowercase();
    lowered
        .strip_prefix("www.")
        .map_or(lowered.clone(), ToString::to_string)
}

/// Whether `domain` has been processed before.
pub async fn is_domain_processed(pool: &Pool<Sqlite>, domain: &str) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM processed_domains WHERE domain = ?",
    )
    .bind(normalize_domain(domain))
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Fetch the record for `domain`, if any.
pub async fn get_processed_domain(
    pool: &Pool<Sqlite>,
    domain: &str,
) -> Result<Option<ProcessedDomain>> {
    let row = sqlx::query(
        "SELECT domain, outcome, email, processed_at FROM processed_domains WHERE domain = ?",
    )
    .bind(normalize_domain(domain))
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        let outcome: String = row.get("outcome");
        Ok(ProcessedDomain {
            domain: row.get("domain"),
            outcome: outcome.parse()?,
            email: row.get("email"),
            processed_at: row.get("processed_at"),
        })
    })
    .transpose()
}

/// Record the outcome for `domain`, replacing any earlier record.
pub async fn mark_domain_processed(
    pool: &Pool<Sqlite>,
    domain: &str,
    outcome: DomainOutcome,
    email: Option<&str>,
) -> Result<ProcessedDomain> {
    let domain = normalize_domain(domain);
    let processed_at = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO processed_domains (domain, outcome, email, processed_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(domain) DO UPDATE SET
            outcome = excluded.outcome,
            email = excluded.email,
            processed_at = excluded.processed_at",
    )
    .bind(&domain)
    .bind(outcome.as_str())
    .bind(email)
    .bind(&processed_at)
    .execute(pool)
    .await?;

    Ok(ProcessedDomain {
        domain,
        outcome,
        email: email.map(ToString::to_string),
        processed_at,
    })
}

/// Count processed domains, optionally restricted to one outcome.
pub async fn count_processed_domains(
    pool: &Pool<Sqlite>,
    outcome: Option<DomainOutcome>,
) -> Result<i64> {
    let count = match outcome {
        Some(outcome) => {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM processed_domains WHERE outcome = ?",
            )
            .bind(outcome.as_str())
            .fetch_one(pool)
            .await?
        }
        None => {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM processed_domains")
                .fetch_one(pool)
                .await?
        }
    };
    Ok(count)
}

/// Forget failed lookups so they are retried on the next run.
pub async fn clear_failed_domains(pool: &Pool<Sqlite>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM processed_domains WHERE outcome = 'failed'")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    async fn setup_test_db() -> Database {
        Database::open(":memory:").await.expect("open test database")
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain(" WWW.Cabinet-Dupont.fr "), "cabinet-dupont.fr");
        assert_eq!(normalize_domain("dental.example"), "dental.example");
    }

    #[test]
    fn test_outcome_round_trip() {
        for outcome in [DomainOutcome::Found, DomainOutcome::NotFound, DomainOutcome::Failed] {
            assert_eq!(outcome.as_str().parse::<DomainOutcome>().expect("parse"), outcome);
        }
        assert!("maybe".parse::<DomainOutcome>().is_err());
    }

    #[tokio::test]
    async fn test_mark_and_check() {
        let db = setup_test_db().await;

        assert!(!is_domain_processed(db.pool(), "cabinet-dupont.fr")
            .await
            .expect("check"));

        mark_domain_processed(
            db.pool(),
            "www.cabinet-dupont.fr",
            DomainOutcome::Found,
            Some("contact@cabinet-dupont.fr"),
        )
        .await
        .expect("mark");

        assert!(is_domain_processed(db.pool(), "Cabinet-Dupont.fr")
            .await
            .expect("check"));

        let record = get_processed_domain(db.pool(), "cabinet-dupont.fr")
            .await
            .expect("get")
            .expect("record exists");
        assert_eq!(record.outcome, DomainOutcome::Found);
        assert_eq!(record.email.as_deref(), Some("contact@cabinet-dupont.fr"));
    }

    #[tokio::test]
    async fn test_mark_replaces_previous_outcome() {
        let db = setup_test_db().await;

        mark_domain_processed(db.pool(), "smile.example", DomainOutcome::Failed, None)
            .await
            .expect("mark failed");
        mark_domain_processed(db.pool(), "smile.example", DomainOutcome::NotFound, None)
            .await
            .expect("mark not found");

        assert_eq!(count_processed_domains(db.pool(), None).await.expect("count"), 1);
        let record = get_processed_domain(db.pool(), "smile.example")
            .await
            .expect("get")
            .expect("record exists");
        assert_eq!(record.outcome, DomainOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_clear_failed_domains() {
        let db = setup_test_db().await;

        mark_domain_processed(db.pool(), "a.example", DomainOutcome::Failed, None)
            .await
            .expect("mark");
        mark_domain_processed(db.pool(), "b.example", DomainOutcome::Found, Some("x@b.example"))
            .await
            .expect("mark");

        assert_eq!(clear_failed_domains(db.pool()).await.expect("clear"), 1);
        assert_eq!(
            count_processed_domains(db.pool(), Some(DomainOutcome::Found))
                .await
                .expect("count"),
            1
        );
        assert!(!is_domain_processed(db.pool(), "a.example").await.expect("check"));
    }
}
