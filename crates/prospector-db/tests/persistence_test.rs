//! Processed domains and run history survive reopening the database file.

use prospector_db::processed_domains::{get_processed_domain, is_domain_processed, mark_domain_processed};
use prospector_db::runs::{complete_run, create_run, list_recent_runs};
use prospector_db::{Database, DomainOutcome, RunStatus};

#[tokio::test]
async fn test_processed_domains_persist_across_reopen() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("prospector.db");

    let db = Database::open(&path).await.expect("open database");
    mark_domain_processed(
        db.pool(),
        "clinique-lumiere.fr",
        DomainOutcome::Found,
        Some("accueil@clinique-lumiere.fr"),
    )
    .await
    .expect("mark domain");
    mark_domain_processed(db.pool(), "no-contact.fr", DomainOutcome::NotFound, None)
        .await
        .expect("mark domain");
    db.close().await;

    let reopened = Database::open(&path).await.expect("reopen database");
    assert!(is_domain_processed(reopened.pool(), "clinique-lumiere.fr")
        .await
        .expect("check"));
    assert!(is_domain_processed(reopened.pool(), "www.no-contact.fr")
        .await
        .expect("check"));

    let record = get_processed_domain(reopened.pool(), "clinique-lumiere.fr")
        .await
        .expect("get")
        .expect("record exists");
    assert_eq!(record.email.as_deref(), Some("accueil@clinique-lumiere.fr"));
}

#[tokio::test]
async fn test_run_history_persists_across_reopen() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("prospector.db");

    let db = Database::open(&path).await.expect("open database");
    let run = create_run(db.pool(), "dentist".to_string(), 5)
        .await
        .expect("create run");
    complete_run(db.pool(), &run.id, RunStatus::Exhausted, 3, 4)
        .await
        .expect("complete run");
    db.close().await;

    let reopened = Database::open(&path).await.expect("reopen database");
    let runs = list_recent_runs(reopened.pool(), 10).await.expect("list runs");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Exhausted);
    assert_eq!(runs[0].lead_count, 3);
    assert_eq!(reopened.get_schema_version().await.expect("version"), 2);
}
