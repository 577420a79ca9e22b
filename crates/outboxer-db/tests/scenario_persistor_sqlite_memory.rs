//! Scenario: persistor invariants against an in-memory SQLite database.
//!
//! Unlike the `MQK_DATABASE_URL`-gated scenarios in this crate, these run
//! unconditionally in `cargo test` — SQLite's `sqlite::memory:` URL needs no
//! external server, the same role `mqk_db`'s tests reserved for a real
//! Postgres instance reachable only through an env var.

use std::sync::Arc;

use chrono::Utc;
use outboxer_db::{dialect::Sqlite, migrate, Dialect, PersistorConfig, SqlxPersistor};
use outboxer_schemas::Entry;

async fn memory_persistor() -> anyhow::Result<(sqlx::AnyPool, SqlxPersistor)> {
    sqlx::any::install_default_drivers();
    let pool = sqlx::AnyPool::connect("sqlite::memory:").await?;
    let dialect: Arc<dyn Dialect> = Arc::new(Sqlite);
    migrate(&pool, &dialect, "txno_outbox").await?;
    let persistor = SqlxPersistor::new(dialect, PersistorConfig::default());
    Ok((pool, persistor))
}

#[tokio::test]
async fn save_then_select_batch_finds_due_entries() -> anyhow::Result<()> {
    let (pool, persistor) = memory_persistor().await?;

    let past = Utc::now() - chrono::Duration::seconds(1);
    let future = Utc::now() + chrono::Duration::seconds(60);

    let due = Entry::new_pending("e-due".into(), "{}".into(), None, past);
    let not_due = Entry::new_pending("e-not-due".into(), "{}".into(), None, future);

    persistor.save(&pool, &due).await?;
    persistor.save(&pool, &not_due).await?;

    let batch = persistor.select_batch(&pool, Utc::now(), 10).await?;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, "e-due");

    Ok(())
}

#[tokio::test]
async fn update_with_stale_version_is_rejected() -> anyhow::Result<()> {
    let (pool, persistor) = memory_persistor().await?;

    let mut entry = Entry::new_pending("e-1".into(), "{}".into(), None, Utc::now());
    persistor.save(&pool, &entry).await?;

    // A second in-memory copy, as if two workers had both read the row.
    let mut stale_copy = entry.clone();

    entry.attempts += 1;
    persistor.update(&pool, &mut entry).await?;
    assert_eq!(entry.version, 2);

    stale_copy.attempts += 1;
    let err = persistor
        .update(&pool, &mut stale_copy)
        .await
        .expect_err("stale version must be rejected");
    assert!(err.to_string().contains("optimistic lock"));

    Ok(())
}

#[tokio::test]
async fn duplicate_unique_request_id_is_rejected_at_save() -> anyhow::Result<()> {
    let (pool, persistor) = memory_persistor().await?;

    let first = Entry::new_pending(
        "e-1".into(),
        "{}".into(),
        Some("req-shared".into()),
        Utc::now(),
    );
    let second = Entry::new_pending(
        "e-2".into(),
        "{}".into(),
        Some("req-shared".into()),
        Utc::now(),
    );

    persistor.save(&pool, &first).await?;
    let err = persistor
        .save(&pool, &second)
        .await
        .expect_err("duplicate unique_request_id must be rejected");
    assert!(err.to_string().contains("already scheduled"));

    Ok(())
}

#[tokio::test]
async fn whitelist_clears_blocklist_and_resets_attempts() -> anyhow::Result<()> {
    let (pool, persistor) = memory_persistor().await?;

    let mut entry = Entry::new_pending("e-1".into(), "{}".into(), None, Utc::now());
    entry.attempts = 5;
    entry.blocklisted = true;
    persistor.save(&pool, &entry).await?;

    let changed = persistor.whitelist(&pool, "e-1").await?;
    assert!(changed);

    let batch = persistor.select_batch(&pool, Utc::now(), 10).await?;
    let reset = batch.iter().find(|e| e.id == "e-1").expect("entry present");
    assert_eq!(reset.attempts, 0);
    assert!(!reset.blocklisted);

    let no_op = persistor.whitelist(&pool, "e-1").await?;
    assert!(!no_op, "whitelisting an already-clean entry is a no-op");

    Ok(())
}
