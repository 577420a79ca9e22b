//! Submitter & runner (§4.5, C6): the terminal leg of an entry's life. Given
//! a locked [`outboxer_schemas::Entry`], resolve its handler, run it, and
//! write back success/failure/blocklist — swallowing optimistic-lock
//! collisions per §7 tier 2 rather than surfacing them anywhere.
//!
//! Grounded on `mqk_db::outbox_claim_batch` followed by
//! `outbox_mark_sent`/`outbox_mark_failed` (see DESIGN.md): claim in one
//! short transaction, run the work outside any transaction, write the
//! terminal state in a second short transaction. §5 is explicit that the
//! database transaction is not held across the invocation await.

use std::sync::Arc;

use outboxer_db::{SqlxPersistor, TransactionManager};
use outboxer_schemas::{Entry, OutboxError, Serializer};

use crate::clock::Clock;
use crate::instantiator::Instantiator;
use crate::executor::Executor;
use crate::listener::{self, OutboxListener};
use crate::retry::RetryPolicy;

/// What happened to one entry after a [`Runner::try_run`] call. Mostly of
/// interest to tests and the CLI's `flush-once` subcommand; the flusher
/// itself only logs this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// `lock()` returned nothing — another worker holds the row, or it was
    /// skipped under `SKIP LOCKED`. Not an error (§4.2, §4.5).
    NotLocked,
    Success,
    Failed { blocklisted: bool },
    /// The terminal write lost an optimistic-lock race (§7 tier 2). Another
    /// worker's write already landed; this run's outcome is discarded.
    Abandoned,
}

/// Configuration for [`Runner`]: the three §6 builder knobs that govern
/// retry/blocklist/dedup-retention behavior.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub attempt_frequency: chrono::Duration,
    pub blocklist_after_attempts: u32,
    pub retention_threshold: chrono::Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            attempt_frequency: chrono::Duration::seconds(2),
            blocklist_after_attempts: 5,
            retention_threshold: chrono::Duration::days(7),
        }
    }
}

/// Runs locked entries to completion (§4.5). One instance is shared between
/// the post-commit immediate-run path and the flusher's batch dispatch.
pub struct Runner<S: Serializer> {
    persistor: Arc<SqlxPersistor>,
    transaction_manager: Arc<dyn TransactionManager>,
    serializer: S,
    instantiator: Arc<dyn Instantiator>,
    executor: Arc<dyn Executor>,
    retry_policy: Arc<dyn RetryPolicy>,
    clock: Arc<dyn Clock>,
    listener: Arc<dyn OutboxListener>,
    config: RunnerConfig,
}

impl<S: Serializer> Runner<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        persistor: Arc<SqlxPersistor>,
        transaction_manager: Arc<dyn TransactionManager>,
        serializer: S,
        instantiator: Arc<dyn Instantiator>,
        executor: Arc<dyn Executor>,
        retry_policy: Arc<dyn RetryPolicy>,
        clock: Arc<dyn Clock>,
        listener: Arc<dyn OutboxListener>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            persistor,
            transaction_manager,
            serializer,
            instantiator,
            executor,
            retry_policy,
            clock,
            listener,
            config,
        }
    }

    /// Attempts to claim and run `entry_id` (§4.5 steps a-c). Opens its own
    /// transaction for the claim; the caller never needs to hold one.
    pub async fn try_run(&self, entry_id: &str) -> anyhow::Result<RunOutcome> {
        let mut tx = self.transaction_manager.begin().await?;
        let locked = self.persistor.lock(tx.connection(), entry_id).await?;

        let entry = match locked {
            Some(entry) => entry,
            None => {
                tx.rollback().await?;
                return Ok(RunOutcome::NotLocked);
            }
        };
        // Release the row lock immediately; the invocation itself runs with
        // no transaction held (§5).
        tx.rollback().await?;

        self.run_claimed(entry).await
    }

    async fn run_claimed(&self, entry: Entry) -> anyhow::Result<RunOutcome> {
        let outcome = self.invoke(&entry).await;
        self.finish(entry, outcome).await
    }

    /// Deserializes and dispatches the entry's invocation, returning
    /// `Err(cause)` for every way a run can fail: no registered handler, a
    /// corrupt invocation blob, or the handler's own future resolving to an
    /// error. All three are transient failures per §7 tier 3 — none of them
    /// distinguish themselves to the retry/blocklist state machine.
    async fn invoke(&self, entry: &Entry) -> Result<(), String> {
        let invocation = self
            .serializer
            .deserialize(&entry.invocation)
            .map_err(|e| e.to_string())?;

        let handler = self
            .instantiator
            .resolve(&invocation.target_name, &invocation.method_name)
            .ok_or_else(|| {
                format!(
                    "no handler registered for {}::{}",
                    invocation.target_name, invocation.method_name
                )
            })?;

        self.executor
            .run(Box::pin(async move { handler(invocation).await }))
            .await
            .map_err(|e| e.to_string())
    }

    async fn finish(&self, mut entry: Entry, outcome: Result<(), String>) -> anyhow::Result<RunOutcome> {
        let mut tx = self.transaction_manager.begin().await?;
        let now = self.clock.now();

        let write_result = match outcome {
            Ok(()) => {
                if entry.unique_request_id.is_some() {
                    entry.processed = true;
                    entry.next_attempt_time = now + self.config.retention_threshold;
                    entry.attempts += 1;
                    self.persistor.update(tx.connection(), &mut entry).await
                } else {
                    self.persistor
                        .delete(tx.connection(), &entry.id, entry.version)
                        .await
                }
            }
            Err(_) => {
                entry.attempts += 1;
                if entry.attempts >= self.config.blocklist_after_attempts {
                    entry.blocklisted = true;
                } else {
                    entry.next_attempt_time = now
                        + self
                            .retry_policy
                            .next_attempt_delay(self.config.attempt_frequency, entry.attempts);
                }
                self.persistor.update(tx.connection(), &mut entry).await
            }
        };

        if let Err(err) = write_result {
            tx.rollback().await.ok();
            if is_optimistic_lock(&err) {
                tracing::debug!(entry_id = %entry.id, "outbox run abandoned: optimistic lock lost");
                return Ok(RunOutcome::Abandoned);
            }
            return Err(err);
        }
        tx.commit().await?;

        match outcome {
            Ok(()) => {
                let listener = self.listener.clone();
                let e = entry.clone();
                listener::notify("success", move || listener.success(&e));
                Ok(RunOutcome::Success)
            }
            Err(cause) => {
                if entry.blocklisted {
                    let listener = self.listener.clone();
                    let e = entry.clone();
                    let c = cause.clone();
                    listener::notify("blocklisted", move || listener.blocklisted(&e, &c));
                } else {
                    let listener = self.listener.clone();
                    let e = entry.clone();
                    let c = cause.clone();
                    listener::notify("failure", move || listener.failure(&e, &c));
                }
                Ok(RunOutcome::Failed {
                    blocklisted: entry.blocklisted,
                })
            }
        }
    }
}

fn is_optimistic_lock(err: &anyhow::Error) -> bool {
    err.downcast_ref::<OutboxError>()
        .map(|e| matches!(e, OutboxError::OptimisticLock { .. }))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use outboxer_db::{migrate, Dialect, PersistorConfig, SqlxTransactionManager};
    use outboxer_schemas::{ArgValue, Invocation, JsonSerializer};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::clock::SystemClock;
    use crate::executor::CallerThreadExecutor;
    use crate::instantiator::DispatchTable;
    use crate::listener::NoopListener;
    use crate::retry::LinearBackoff;

    async fn test_runner() -> (sqlx::AnyPool, Arc<SqlxPersistor>, Runner<JsonSerializer>, DispatchTable) {
        sqlx::any::install_default_drivers();
        let pool = sqlx::AnyPool::connect("sqlite::memory:").await.unwrap();
        let dialect: Arc<dyn Dialect> = Arc::new(outboxer_db::Sqlite);
        migrate(&pool, &dialect, "txno_outbox").await.unwrap();

        let persistor = Arc::new(SqlxPersistor::new(dialect, PersistorConfig::default()));
        let tm: Arc<dyn TransactionManager> = Arc::new(SqlxTransactionManager::new(pool.clone()));
        let dispatch = DispatchTable::new();

        let runner = Runner::new(
            persistor.clone(),
            tm,
            JsonSerializer,
            Arc::new(dispatch.clone()),
            Arc::new(CallerThreadExecutor),
            Arc::new(LinearBackoff),
            Arc::new(SystemClock),
            Arc::new(NoopListener),
            RunnerConfig::default(),
        );
        (pool, persistor, runner, dispatch)
    }

    fn invocation_entry(id: &str, target: &str, method: &str) -> Entry {
        let inv = Invocation::new(target, method).with_arg("str", ArgValue::Str("x".into()));
        let text = JsonSerializer.serialize(&inv).unwrap();
        Entry::new_pending(id.into(), text, None, chrono::Utc::now() - chrono::Duration::seconds(1))
    }

    #[tokio::test]
    async fn successful_run_deletes_entry_without_unique_request_id() {
        let (pool, persistor, runner, dispatch) = test_runner().await;
        dispatch.register("Mailer", "send", |_inv| async move { Ok(()) });

        let entry = invocation_entry("e-1", "Mailer", "send");
        persistor.save(&pool, &entry).await.unwrap();

        let outcome = runner.try_run("e-1").await.unwrap();
        assert_eq!(outcome, RunOutcome::Success);
    }

    #[tokio::test]
    async fn failed_run_reschedules_with_incremented_attempts() {
        let (pool, persistor, runner, dispatch) = test_runner().await;
        dispatch.register("Mailer", "send", |_inv| async move {
            Err(anyhow::anyhow!("smtp down"))
        });

        let entry = invocation_entry("e-1", "Mailer", "send");
        persistor.save(&pool, &entry).await.unwrap();

        let outcome = runner.try_run("e-1").await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed { blocklisted: false });

        let batch = persistor
            .select_batch(&pool, chrono::Utc::now() + chrono::Duration::hours(1), 10)
            .await
            .unwrap();
        let reloaded = batch.iter().find(|e| e.id == "e-1").unwrap();
        assert_eq!(reloaded.attempts, 1);
        assert!(!reloaded.blocklisted);
    }

    #[tokio::test]
    async fn repeated_failures_blocklist_after_configured_attempts() {
        let (pool, persistor, runner, dispatch) = test_runner().await;
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();
        dispatch.register("Mailer", "send", move |_inv| {
            let cc = cc.clone();
            async move {
                cc.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("smtp down"))
            }
        });

        let entry = invocation_entry("e-1", "Mailer", "send");
        persistor.save(&pool, &entry).await.unwrap();

        for _ in 0..RunnerConfig::default().blocklist_after_attempts {
            runner.try_run("e-1").await.unwrap();
        }

        let batch = persistor
            .select_batch(&pool, chrono::Utc::now() + chrono::Duration::hours(1), 10)
            .await
            .unwrap();
        // A blocklisted entry is excluded from select_batch (invariant 1),
        // so absence here is exactly the assertion we want.
        assert!(batch.iter().find(|e| e.id == "e-1").is_none());
    }

    #[tokio::test]
    async fn locking_an_unknown_id_returns_not_locked() {
        let (_pool, _persistor, runner, _dispatch) = test_runner().await;
        let outcome = runner.try_run("missing").await.unwrap();
        assert_eq!(outcome, RunOutcome::NotLocked);
    }

    #[tokio::test]
    async fn unregistered_target_is_treated_as_a_transient_failure() {
        let (pool, persistor, runner, _dispatch) = test_runner().await;
        let entry = invocation_entry("e-1", "Unregistered", "go");
        persistor.save(&pool, &entry).await.unwrap();

        let outcome = runner.try_run("e-1").await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed { blocklisted: false });
    }
}
