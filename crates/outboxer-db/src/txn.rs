//! The transaction-manager contract (§4.3): the seam `schedule()` uses to
//! enqueue an entry atomically alongside the caller's own business writes,
//! plus the `addPostCommitHook` escape hatch for work that must wait until
//! the surrounding transaction is durably committed (§4.3, §8 scenario 1).
//!
//! `mqk_db` never modeled an explicit transaction boundary of its own —
//! every function there takes a pool and runs as its own implicit
//! transaction — so this is new code, built directly against
//! `sqlx::Transaction` rather than adapted from an existing teacher
//! abstraction (see DESIGN.md).

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Context as _;
use sqlx::AnyPool;

/// A callback deferred until after commit. Runs at most once, never if the
/// transaction rolls back.
pub type PostCommitHook = Box<dyn FnOnce() + Send>;

/// Arbitrary request-scoped key/value bag threaded alongside a
/// [`Transaction`] (§4.3's `context()`) — a place for callers to stash
/// correlation ids or other cross-cutting metadata without changing every
/// `schedule()` call site's signature.
#[derive(Debug, Default)]
pub struct TransactionContext {
    values: Mutex<HashMap<String, String>>,
}

impl TransactionContext {
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.lock().unwrap().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }
}

/// An open business transaction. Wraps the `sqlx` handle `Persistor` methods
/// bind their queries to, plus the queue of hooks registered through
/// [`Transaction::add_post_commit_hook`].
///
/// `Transaction::begin()` on a `Pool` (rather than a checked-out
/// `PoolConnection`) yields a `'static` handle, which is what lets this type
/// own its transaction without borrowing from the manager that created it.
pub struct Transaction {
    inner: Option<sqlx::Transaction<'static, sqlx::Any>>,
    hooks: Mutex<Vec<PostCommitHook>>,
    context: TransactionContext,
}

impl Transaction {
    fn new(inner: sqlx::Transaction<'static, sqlx::Any>) -> Self {
        Self {
            inner: Some(inner),
            hooks: Mutex::new(Vec::new()),
            context: TransactionContext::default(),
        }
    }

    /// The connection this transaction runs on — what `Persistor`'s
    /// `save`/`update`/`delete` bind their queries to.
    pub fn connection(&mut self) -> &mut sqlx::Transaction<'static, sqlx::Any> {
        self.inner.as_mut().expect("transaction already finalized")
    }

    /// The request-scoped metadata bag threaded alongside this transaction.
    pub fn context(&self) -> &TransactionContext {
        &self.context
    }

    /// Registers a callback to run once, strictly after this transaction
    /// commits. Never runs if the transaction rolls back or is dropped
    /// uncommitted (§4.3, §8 scenario 1 — the reason `schedule()` exists at
    /// all: nothing outside the database should observe a scheduled call
    /// before its business transaction is durable).
    pub fn add_post_commit_hook(&self, hook: impl FnOnce() + Send + 'static) {
        self.hooks.lock().unwrap().push(Box::new(hook));
    }

    pub async fn commit(mut self) -> anyhow::Result<()> {
        let inner = self.inner.take().expect("transaction already finalized");
        inner
            .commit()
            .await
            .context("committing business transaction")?;
        for hook in self.hooks.into_inner().unwrap() {
            hook();
        }
        Ok(())
    }

    pub async fn rollback(mut self) -> anyhow::Result<()> {
        let inner = self.inner.take().expect("transaction already finalized");
        inner
            .rollback()
            .await
            .context("rolling back business transaction")?;
        Ok(())
    }
}

/// The transaction-manager contract (§4.3): `begin()` only — `commit`/
/// `rollback` live on the [`Transaction`] it returns so callers can't invoke
/// them on a transaction they don't hold.
///
/// `#[async_trait]` (absent from the teacher's own stack, which never holds
/// a transaction manager behind `dyn`) makes this object-safe — the
/// submitter/runner in `outboxer-execution` needs `Arc<dyn
/// TransactionManager>` so it can be swapped for a test double without a
/// generic parameter threading through every call site.
#[async_trait::async_trait]
pub trait TransactionManager: Send + Sync {
    async fn begin(&self) -> anyhow::Result<Transaction>;
}

/// The `sqlx::AnyPool`-backed manager used everywhere outside tests.
pub struct SqlxTransactionManager {
    pool: AnyPool,
}

impl SqlxTransactionManager {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl TransactionManager for SqlxTransactionManager {
    async fn begin(&self) -> anyhow::Result<Transaction> {
        let tx = self
            .pool
            .begin()
            .await
            .context("beginning business transaction")?;
        Ok(Transaction::new(tx))
    }
}
