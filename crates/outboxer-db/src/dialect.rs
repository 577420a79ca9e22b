//! The dialect surface (§4.2): the minimum set of per-backend differences
//! the persistor needs to know about. `supportsSkipLock` is — per §4.2 —
//! "the only behavioral bit today"; everything else here is SQL-text
//! assembly so the persistor's query-building code stays dialect-agnostic.
//!
//! H2 (named in §6's compatibility list) has no Rust driver; SQLite plays
//! its role here as the embedded/fast-test dialect (see DESIGN.md Open
//! Question resolution #1-adjacent note). `supports_skip_lock` is false for
//! SQLite because `SELECT ... FOR UPDATE` isn't valid syntax on a file-based
//! engine with whole-database locking — the persistor falls back to the
//! lock-wait-timeout path described in §4.2/§5 for that dialect.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialectFamily {
    Postgres,
    MySql,
    Sqlite,
}

impl fmt::Display for DialectFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialectFamily::Postgres => write!(f, "postgres"),
            DialectFamily::MySql => write!(f, "mysql"),
            DialectFamily::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// The per-backend behavior the persistor (`outboxer-db::persistor`) needs.
pub trait Dialect: Send + Sync {
    fn family(&self) -> DialectFamily;

    /// Whether `FOR UPDATE SKIP LOCKED` is valid syntax here. MySQL 5 does
    /// not support it either (only MySQL 8+); a deployment pinned to MySQL 5
    /// should construct [`MySql`] with `supports_skip_lock = false` via
    /// [`MySql::mysql5`].
    fn supports_skip_lock(&self) -> bool;

    /// Bind placeholder for the `index`-th (1-based) parameter in a
    /// statement. `sqlx::Any` forwards query text to the underlying driver
    /// unchanged, so placeholder syntax is not actually portable across
    /// backends the way the rest of this trait's SQL fragments are — every
    /// query built by the persistor runs its parameter list through this to
    /// stay correct per dialect.
    fn placeholder(&self, index: usize) -> String {
        match self.family() {
            DialectFamily::Postgres => format!("${index}"),
            DialectFamily::MySql | DialectFamily::Sqlite => "?".to_string(),
        }
    }

    /// The row-locking clause to append to a `SELECT`. Empty string for
    /// SQLite, which has no such clause.
    fn for_update_clause(&self) -> &'static str {
        match (self.family(), self.supports_skip_lock()) {
            (DialectFamily::Sqlite, _) => "",
            (_, true) => "FOR UPDATE SKIP LOCKED",
            (_, false) => "FOR UPDATE",
        }
    }

    /// A preface statement run once per connection/transaction before the
    /// lock-wait-bounded `lock()` query, implementing
    /// `writeLockTimeoutSeconds` (§4.2). `None` where the dialect has no
    /// equivalent session setting (SQLite: the whole-database busy timeout
    /// is set once at connection time instead, not per-statement).
    fn set_lock_timeout_sql(&self, seconds: u64) -> Option<String>;

    /// Bulk-delete of `processed=true ∧ blocklisted=false ∧
    /// next_attempt_time_micros < ?` rows, capped at `?` rows (§4.2). Each
    /// dialect expresses the cap differently because only MySQL and SQLite
    /// support `DELETE ... LIMIT` directly; Postgres needs a `ctid`/subquery
    /// form.
    fn delete_processed_and_expired_sql(&self, table: &str) -> String;

    /// DDL for the outbox table itself, used by `migrate`.
    fn create_outbox_table_sql(&self, table: &str) -> String;
}

/// PostgreSQL 9+.
pub struct Postgres;

impl Dialect for Postgres {
    fn family(&self) -> DialectFamily {
        DialectFamily::Postgres
    }

    fn supports_skip_lock(&self) -> bool {
        true
    }

    fn set_lock_timeout_sql(&self, seconds: u64) -> Option<String> {
        Some(format!("SET LOCAL lock_timeout = '{seconds}s'"))
    }

    fn delete_processed_and_expired_sql(&self, table: &str) -> String {
        let p1 = self.placeholder(1);
        let p2 = self.placeholder(2);
        format!(
            "DELETE FROM {table} WHERE id IN ( \
                SELECT id FROM {table} \
                WHERE processed = 1 AND blocklisted = 0 AND next_attempt_time_micros < {p1} \
                LIMIT {p2} )"
        )
    }

    fn create_outbox_table_sql(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} ( \
                id TEXT PRIMARY KEY, \
                unique_request_id TEXT UNIQUE, \
                invocation TEXT NOT NULL, \
                next_attempt_time_micros BIGINT NOT NULL, \
                attempts INTEGER NOT NULL DEFAULT 0, \
                blocklisted SMALLINT NOT NULL DEFAULT 0, \
                processed SMALLINT NOT NULL DEFAULT 0, \
                version INTEGER NOT NULL DEFAULT 1 \
            )"
        )
    }
}

/// MySQL 5/8. `supports_skip_lock` defaults to `true` (MySQL 8); construct
/// with [`MySql::mysql5`] when the target server predates `SKIP LOCKED`.
pub struct MySql {
    skip_lock: bool,
}

impl Default for MySql {
    fn default() -> Self {
        Self { skip_lock: true }
    }
}

impl MySql {
    pub fn mysql8() -> Self {
        Self { skip_lock: true }
    }

    pub fn mysql5() -> Self {
        Self { skip_lock: false }
    }
}

impl Dialect for MySql {
    fn family(&self) -> DialectFamily {
        DialectFamily::MySql
    }

    fn supports_skip_lock(&self) -> bool {
        self.skip_lock
    }

    fn set_lock_timeout_sql(&self, seconds: u64) -> Option<String> {
        Some(format!("SET innodb_lock_wait_timeout = {seconds}"))
    }

    fn delete_processed_and_expired_sql(&self, table: &str) -> String {
        format!(
            "DELETE FROM {table} \
             WHERE processed = 1 AND blocklisted = 0 AND next_attempt_time_micros < ? \
             LIMIT ?"
        )
    }

    fn create_outbox_table_sql(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} ( \
                id VARCHAR(255) PRIMARY KEY, \
                unique_request_id VARCHAR(255) UNIQUE, \
                invocation LONGTEXT NOT NULL, \
                next_attempt_time_micros BIGINT NOT NULL, \
                attempts INTEGER NOT NULL DEFAULT 0, \
                blocklisted TINYINT NOT NULL DEFAULT 0, \
                processed TINYINT NOT NULL DEFAULT 0, \
                version INTEGER NOT NULL DEFAULT 1 \
            )"
        )
    }
}

/// SQLite — the embedded/fast-test stand-in for H2. No row-level locking
/// and no per-statement lock timeout; correctness still holds per §5
/// ("without SKIP LOCKED it either acquires the lock after waiting or times
/// out"), it's just the whole-database busy-timeout doing the waiting.
pub struct Sqlite;

impl Dialect for Sqlite {
    fn family(&self) -> DialectFamily {
        DialectFamily::Sqlite
    }

    fn supports_skip_lock(&self) -> bool {
        false
    }

    fn set_lock_timeout_sql(&self, _seconds: u64) -> Option<String> {
        None
    }

    fn delete_processed_and_expired_sql(&self, table: &str) -> String {
        format!(
            "DELETE FROM {table} \
             WHERE processed = 1 AND blocklisted = 0 AND next_attempt_time_micros < ? \
             LIMIT ?"
        )
    }

    fn create_outbox_table_sql(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} ( \
                id TEXT PRIMARY KEY, \
                unique_request_id TEXT UNIQUE, \
                invocation TEXT NOT NULL, \
                next_attempt_time_micros INTEGER NOT NULL, \
                attempts INTEGER NOT NULL DEFAULT 0, \
                blocklisted INTEGER NOT NULL DEFAULT 0, \
                processed INTEGER NOT NULL DEFAULT 0, \
                version INTEGER NOT NULL DEFAULT 1 \
            )"
        )
    }
}
