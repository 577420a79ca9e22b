//! The `Persistor` contract (§4.2) over `sqlx::Any`, generalizing
//! `mqk_db`'s `outbox_enqueue` / `outbox_claim_batch` / `outbox_mark_*`
//! family (`core-rs/crates/mqk-db/src/lib.rs`) from one fixed `OutboxRow`
//! shape and a hardcoded Postgres pool to any [`Dialect`] over `Entry`.
//!
//! Every method is generic over `E: sqlx::Executor<'c, Database = Any>` so
//! it can run against either a bare pool (read paths) or the caller's open
//! transaction (everything invariant 2/3 touch) — `mqk_db` always took
//! `&PgPool` directly because it never needed to interleave with a
//! caller-held business transaction the way `schedule()` does here.

use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::any::AnyRow;
use sqlx::{Executor, Row};
use std::sync::Arc;

use outboxer_schemas::{Entry, OutboxError};

use crate::dialect::Dialect;

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(micros).single().unwrap_or_else(Utc::now)
}

fn row_to_entry(row: AnyRow) -> Result<Entry, sqlx::Error> {
    let attempts: i64 = row.try_get("attempts")?;
    let blocklisted: i64 = row.try_get("blocklisted")?;
    let processed: i64 = row.try_get("processed")?;
    let version: i64 = row.try_get("version")?;
    let next_attempt_time_micros: i64 = row.try_get("next_attempt_time_micros")?;

    Ok(Entry {
        id: row.try_get("id")?,
        unique_request_id: row.try_get("unique_request_id")?,
        invocation: row.try_get("invocation")?,
        next_attempt_time: from_micros(next_attempt_time_micros),
        attempts: attempts.max(0) as u32,
        blocklisted: blocklisted != 0,
        processed: processed != 0,
        version: version.max(0) as u32,
    })
}

/// Maps a raw `sqlx::Error` to [`OutboxError::AlreadyScheduled`] when it's a
/// UNIQUE-constraint violation on `unique_request_id`, passthrough
/// otherwise. Generalizes `mqk_db::is_unique_constraint_violation`'s
/// Postgres-only `db_err.code() == Some("23505")` check across dialects
/// (see DESIGN.md Open Question resolution #2).
pub fn classify_insert_error(err: sqlx::Error, unique_request_id: &str) -> anyhow::Error {
    if let sqlx::Error::Database(db_err) = &err {
        let code = db_err.code();
        let is_unique = match code.as_deref() {
            Some("23505") => true, // Postgres
            Some("1062") => true,  // MySQL
            _ => db_err.message().contains("UNIQUE constraint failed"), // SQLite
        };
        if is_unique {
            return anyhow::Error::new(OutboxError::AlreadyScheduled {
                unique_request_id: unique_request_id.to_string(),
            });
        }
    }
    anyhow::Error::new(err).context("outbox persistor insert failed")
}

/// Configuration for [`SqlxPersistor`]: the table name (§6's
/// `tableName` builder option) and the write-lock wait bound (§4.2's
/// `writeLockTimeoutSeconds`).
#[derive(Debug, Clone)]
pub struct PersistorConfig {
    pub table_name: String,
    pub write_lock_timeout_seconds: u64,
}

impl Default for PersistorConfig {
    fn default() -> Self {
        Self {
            table_name: "txno_outbox".to_string(),
            write_lock_timeout_seconds: 2,
        }
    }
}

/// The dialect-generic persistence layer. One instance is shared (behind an
/// `Arc`) between the business-transaction path (`save`/`update`/`delete`)
/// and the flusher's own short-lived transactions (`lock`/`select_batch`).
pub struct SqlxPersistor {
    dialect: Arc<dyn Dialect>,
    config: PersistorConfig,
}

impl SqlxPersistor {
    pub fn new(dialect: Arc<dyn Dialect>, config: PersistorConfig) -> Self {
        Self { dialect, config }
    }

    pub fn table_name(&self) -> &str {
        &self.config.table_name
    }

    /// `INSERT INTO txno_outbox (...)` (§4.2 `save`). A UNIQUE violation on
    /// `unique_request_id` surfaces as [`OutboxError::AlreadyScheduled`]
    /// (invariant 3).
    pub async fn save<'c, E>(&self, exec: E, entry: &Entry) -> anyhow::Result<()>
    where
        E: Executor<'c, Database = sqlx::Any>,
    {
        let table = &self.config.table_name;
        let sql = format!(
            "INSERT INTO {table} \
             (id, unique_request_id, invocation, next_attempt_time_micros, attempts, blocklisted, processed, version) \
             VALUES ({p1}, {p2}, {p3}, {p4}, {p5}, {p6}, {p7}, {p8})",
            p1 = self.dialect.placeholder(1),
            p2 = self.dialect.placeholder(2),
            p3 = self.dialect.placeholder(3),
            p4 = self.dialect.placeholder(4),
            p5 = self.dialect.placeholder(5),
            p6 = self.dialect.placeholder(6),
            p7 = self.dialect.placeholder(7),
            p8 = self.dialect.placeholder(8),
        );

        sqlx::query(&sql)
            .bind(&entry.id)
            .bind(&entry.unique_request_id)
            .bind(&entry.invocation)
            .bind(to_micros(entry.next_attempt_time))
            .bind(entry.attempts as i64)
            .bind(entry.blocklisted as i64)
            .bind(entry.processed as i64)
            .bind(entry.version as i64)
            .execute(exec)
            .await
            .map_err(|e| {
                classify_insert_error(e, entry.unique_request_id.as_deref().unwrap_or(""))
            })?;

        Ok(())
    }

    /// Version-guarded `UPDATE` (invariant 2). `entry` holds the caller's
    /// last-known state including its current `version`; on success the new
    /// `version` (current + 1) is written back into `entry` so the caller's
    /// in-memory copy stays valid for a subsequent call without a re-read.
    /// Returns [`OutboxError::OptimisticLock`] when zero rows matched —
    /// either the row vanished or a concurrent writer already bumped
    /// `version` out from under this one.
    pub async fn update<'c, E>(&self, exec: E, entry: &mut Entry) -> anyhow::Result<()>
    where
        E: Executor<'c, Database = sqlx::Any>,
    {
        let table = &self.config.table_name;
        let sql = format!(
            "UPDATE {table} SET \
                next_attempt_time_micros = {p1}, attempts = {p2}, blocklisted = {p3}, \
                processed = {p4}, version = {p5} \
             WHERE id = {p6} AND version = {p7}",
            p1 = self.dialect.placeholder(1),
            p2 = self.dialect.placeholder(2),
            p3 = self.dialect.placeholder(3),
            p4 = self.dialect.placeholder(4),
            p5 = self.dialect.placeholder(5),
            p6 = self.dialect.placeholder(6),
            p7 = self.dialect.placeholder(7),
        );

        let next_version = entry.version + 1;
        let result = sqlx::query(&sql)
            .bind(to_micros(entry.next_attempt_time))
            .bind(entry.attempts as i64)
            .bind(entry.blocklisted as i64)
            .bind(entry.processed as i64)
            .bind(next_version as i64)
            .bind(&entry.id)
            .bind(entry.version as i64)
            .execute(exec)
            .await
            .context("outbox persistor update failed")?;

        if result.rows_affected() == 0 {
            return Err(anyhow::Error::new(OutboxError::OptimisticLock {
                entry_id: entry.id.clone(),
            }));
        }
        entry.version = next_version;
        Ok(())
    }

    /// Version-guarded `DELETE` (invariant 2), used when a successful
    /// dispatch marks an entry done and §4.2's housekeeping later sweeps it
    /// instead of leaving it `processed=true` forever.
    pub async fn delete<'c, E>(&self, exec: E, id: &str, version: u32) -> anyhow::Result<()>
    where
        E: Executor<'c, Database = sqlx::Any>,
    {
        let table = &self.config.table_name;
        let sql = format!(
            "DELETE FROM {table} WHERE id = {p1} AND version = {p2}",
            p1 = self.dialect.placeholder(1),
            p2 = self.dialect.placeholder(2),
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(version as i64)
            .execute(exec)
            .await
            .context("outbox persistor delete failed")?;

        if result.rows_affected() == 0 {
            return Err(anyhow::Error::new(OutboxError::OptimisticLock {
                entry_id: id.to_string(),
            }));
        }
        Ok(())
    }

    /// Un-blocklists an entry and resets `attempts` to zero (§12.1's
    /// `whitelist` operation) so the retry policy starts over cleanly.
    pub async fn whitelist<'c, E>(&self, exec: E, id: &str) -> anyhow::Result<bool>
    where
        E: Executor<'c, Database = sqlx::Any>,
    {
        let table = &self.config.table_name;
        let sql = format!(
            "UPDATE {table} SET blocklisted = 0, attempts = 0, version = version + 1 \
             WHERE id = {p1} AND blocklisted = 1",
            p1 = self.dialect.placeholder(1),
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(exec)
            .await
            .context("outbox persistor whitelist failed")?;
        Ok(result.rows_affected() > 0)
    }

    /// `SELECT ... FOR UPDATE [SKIP LOCKED]` on a single id, taking a
    /// write-lock-timeout preface first. This is the per-row lock primitive
    /// `select_batch`'s callers use to claim one entry at a time inside a
    /// dedicated short transaction — the direct generalization of
    /// `mqk_db::outbox_claim_batch`'s CTE to one row and any dialect.
    pub async fn lock(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Any>,
        id: &str,
    ) -> anyhow::Result<Option<Entry>> {
        if let Some(preface) = self
            .dialect
            .set_lock_timeout_sql(self.config.write_lock_timeout_seconds)
        {
            sqlx::query(&preface)
                .execute(&mut **tx)
                .await
                .context("setting lock timeout")?;
        }

        let table = &self.config.table_name;
        let clause = self.dialect.for_update_clause();
        let sql = format!(
            "SELECT * FROM {table} WHERE id = {p1} {clause}",
            p1 = self.dialect.placeholder(1),
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .context("locking outbox entry")?;

        row.map(row_to_entry).transpose().map_err(anyhow::Error::new)
    }

    /// Selects up to `limit` selectable entries (invariant 1) ordered by
    /// `next_attempt_time` — the candidate list the flusher then attempts to
    /// [`lock`](Self::lock) one at a time with `SKIP LOCKED` doing the
    /// contention-avoidance work across concurrent flushers/instances.
    pub async fn select_batch<'c, E>(
        &self,
        exec: E,
        now: DateTime<Utc>,
        limit: u32,
    ) -> anyhow::Result<Vec<Entry>>
    where
        E: Executor<'c, Database = sqlx::Any>,
    {
        let table = &self.config.table_name;
        let sql = format!(
            "SELECT * FROM {table} \
             WHERE blocklisted = 0 AND processed = 0 AND next_attempt_time_micros < {p1} \
             ORDER BY next_attempt_time_micros ASC \
             LIMIT {p2}",
            p1 = self.dialect.placeholder(1),
            p2 = self.dialect.placeholder(2),
        );

        let rows = sqlx::query(&sql)
            .bind(to_micros(now))
            .bind(limit as i64)
            .fetch_all(exec)
            .await
            .context("selecting outbox batch")?;

        rows.into_iter()
            .map(row_to_entry)
            .collect::<Result<Vec<_>, _>>()
            .map_err(anyhow::Error::new)
    }

    /// Looks an entry up by its idempotency key (§4.4's
    /// `findExistingByUniqueRequestId` behind `schedule()`'s dedup check).
    pub async fn find_by_unique_request_id<'c, E>(
        &self,
        exec: E,
        unique_request_id: &str,
    ) -> anyhow::Result<Option<Entry>>
    where
        E: Executor<'c, Database = sqlx::Any>,
    {
        let table = &self.config.table_name;
        let sql = format!(
            "SELECT * FROM {table} WHERE unique_request_id = {p1}",
            p1 = self.dialect.placeholder(1),
        );
        let row = sqlx::query(&sql)
            .bind(unique_request_id)
            .fetch_optional(exec)
            .await
            .context("looking up outbox entry by unique_request_id")?;
        row.map(row_to_entry).transpose().map_err(anyhow::Error::new)
    }

    /// Bulk housekeeping delete (§4.2): removes `processed=true` rows older
    /// than `older_than`, capped at `limit` rows per call so a single sweep
    /// can't hold a table lock indefinitely on a large backlog.
    pub async fn delete_processed_and_expired<'c, E>(
        &self,
        exec: E,
        older_than: DateTime<Utc>,
        limit: u32,
    ) -> anyhow::Result<u64>
    where
        E: Executor<'c, Database = sqlx::Any>,
    {
        let table = &self.config.table_name;
        let sql = self.dialect.delete_processed_and_expired_sql(table);
        let result = sqlx::query(&sql)
            .bind(to_micros(older_than))
            .bind(limit as i64)
            .execute(exec)
            .await
            .context("sweeping processed outbox entries")?;
        Ok(result.rows_affected())
    }
}
