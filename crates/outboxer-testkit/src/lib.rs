//! Integration test harness (§11.5) + the end-to-end scenarios from §8.
//!
//! Grounded on `mqk_db::testkit_db_pool` (connect + migrate, handed back as
//! one ready-to-use pool) and the `#[ignore = "requires ...; run: ..."]`
//! gating convention used throughout `mqk-db/tests/scenario_*.rs`: a helper
//! here returns `Ok(None)` rather than erroring when no real database is
//! reachable, so scenario tests can skip gracefully instead of failing CI
//! runs that have no Postgres/MySQL available.

use std::sync::Arc;

use anyhow::Context;
use outboxer_db::{migrate, Dialect, DialectFamily};

/// Stands up an in-memory SQLite `AnyPool` and applies migrations
/// synchronously (§11.5) — no env var required, unlike [`env_pool`]. This is
/// the role `H2` plays in the Java original: a fast, dependency-free
/// relational backend for tests that only need *a* working backend, not
/// specifically Postgres/MySQL locking semantics.
pub async fn memory_pool() -> anyhow::Result<(sqlx::AnyPool, Arc<dyn Dialect>)> {
    sqlx::any::install_default_drivers();
    let pool = sqlx::AnyPool::connect("sqlite::memory:")
        .await
        .context("connecting in-memory sqlite pool")?;
    let dialect: Arc<dyn Dialect> = Arc::new(outboxer_db::Sqlite);
    migrate(&pool, &dialect, "txno_outbox").await?;
    Ok((pool, dialect))
}

/// Connects using `OUTBOXER_DATABASE_URL` and migrates, for scenarios that
/// need real row-level locking across concurrent connections (Postgres/
/// MySQL — SQLite's `:memory:` pool has no such thing to test). Returns
/// `Ok(None)`, not an error, when the env var is unset or the connection
/// fails, so callers skip instead of failing the whole test run.
pub async fn env_pool() -> anyhow::Result<Option<(sqlx::AnyPool, Arc<dyn Dialect>)>> {
    let url = match std::env::var(outboxer_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };
    let dialect = outboxer_db::dialect_for_url(&url);
    let pool = match outboxer_db::connect(&url).await {
        Ok(pool) => pool,
        Err(_) => return Ok(None),
    };
    migrate(&pool, &dialect, "txno_outbox").await?;
    Ok(Some((pool, dialect)))
}

/// Wraps any [`Dialect`] and forces `supports_skip_lock()` to `false`,
/// keeping every other SQL fragment delegated to the wrapped dialect. Used
/// by the "no-skip-lock dialect" scenario (§8 scenario 6) to exercise the
/// plain `FOR UPDATE` (block-then-timeout) path on a real Postgres/MySQL
/// connection without needing an actual MySQL 5 server on hand.
pub struct ForceNoSkipLock(pub Arc<dyn Dialect>);

impl Dialect for ForceNoSkipLock {
    fn family(&self) -> DialectFamily {
        self.0.family()
    }

    fn supports_skip_lock(&self) -> bool {
        false
    }

    fn set_lock_timeout_sql(&self, seconds: u64) -> Option<String> {
        self.0.set_lock_timeout_sql(seconds)
    }

    fn delete_processed_and_expired_sql(&self, table: &str) -> String {
        self.0.delete_processed_and_expired_sql(table)
    }

    fn create_outbox_table_sql(&self, table: &str) -> String {
        self.0.create_outbox_table_sql(table)
    }
}
