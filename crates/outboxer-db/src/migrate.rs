//! Schema provisioning (§4.2's `migrate`): creates the outbox table and a
//! one-row `txno_version` bookkeeping table.
//!
//! `mqk_db::migrate` runs `sqlx::migrate!("./migrations")` — `.sql` files
//! compiled in and applied against one fixed Postgres schema. That approach
//! bakes in a single dialect at compile time; this crate supports three,
//! each with different DDL (`SMALLINT` vs `TINYINT` vs plain `INTEGER`, see
//! `dialect.rs`), so schema creation here is driven at runtime by the
//! caller's chosen [`Dialect`] instead of a fixed migrations directory.

use std::sync::Arc;

use anyhow::Context;
use sqlx::AnyPool;

use crate::dialect::Dialect;

pub const SCHEMA_VERSION: i64 = 1;

/// Idempotent: safe to call on every process start, same as
/// `mqk_db::migrate` being run unconditionally by `testkit_db_pool`.
pub async fn migrate(
    pool: &AnyPool,
    dialect: &Arc<dyn Dialect>,
    table_name: &str,
) -> anyhow::Result<()> {
    sqlx::query(&dialect.create_outbox_table_sql(table_name))
        .execute(pool)
        .await
        .context("creating outbox table")?;

    sqlx::query("CREATE TABLE IF NOT EXISTS txno_version (version INTEGER NOT NULL)")
        .execute(pool)
        .await
        .context("creating txno_version table")?;

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM txno_version")
        .fetch_one(pool)
        .await
        .context("checking txno_version row count")?;

    if count == 0 {
        sqlx::query(&format!(
            "INSERT INTO txno_version (version) VALUES ({SCHEMA_VERSION})"
        ))
        .execute(pool)
        .await
        .context("seeding txno_version")?;
    }

    Ok(())
}

/// Connectivity-plus-schema-presence check (§12.2's `status(pool)` daemon
/// query), shaped after `mqk_db::status` / `DbStatus`.
#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_outbox_table: bool,
    pub schema_version: Option<i64>,
}

pub async fn status(pool: &AnyPool, table_name: &str) -> anyhow::Result<DbStatus> {
    let (one,): (i64,) = sqlx::query_as("SELECT 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let has_outbox_table = sqlx::query(&format!("SELECT 1 FROM {table_name} WHERE 1 = 0"))
        .execute(pool)
        .await
        .is_ok();

    let schema_version = sqlx::query_as::<_, (i64,)>("SELECT version FROM txno_version")
        .fetch_optional(pool)
        .await
        .ok()
        .flatten()
        .map(|(v,)| v);

    Ok(DbStatus {
        ok,
        has_outbox_table,
        schema_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Sqlite;

    #[tokio::test]
    async fn migrate_is_idempotent_against_sqlite_memory() {
        sqlx::any::install_default_drivers();
        let pool = sqlx::AnyPool::connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite pool");
        let dialect: Arc<dyn Dialect> = Arc::new(Sqlite);

        migrate(&pool, &dialect, "txno_outbox").await.expect("first migrate");
        migrate(&pool, &dialect, "txno_outbox").await.expect("second migrate is a no-op");

        let st = status(&pool, "txno_outbox").await.expect("status");
        assert!(st.ok);
        assert!(st.has_outbox_table);
        assert_eq!(st.schema_version, Some(SCHEMA_VERSION));
    }
}
