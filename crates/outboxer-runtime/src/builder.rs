//! `OutboxBuilder` / `Outbox<S>` (§6's builder surface, C7's "thin factory"
//! role): wires a `Dialect` + connection pool into a `Persistor` and
//! `TransactionManager`, hangs a `Scheduler`/`Runner`/`Flusher`/`Reaper` off
//! them, and hands back one `Outbox<S>` handle applications hold for the
//! rest of their lifetime.
//!
//! Grounded on `mqk-testkit::orchestrator`'s "one struct owns every shared
//! `Arc`, a `Builder` assembles it" composition root.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use outboxer_db::{Dialect, PersistorConfig, SqlxPersistor, SqlxTransactionManager, Transaction, TransactionManager};
use outboxer_execution::{
    CallerThreadExecutor, Clock, DispatchTable, Executor, Instantiator, NoopListener, OutboxListener,
    Runner, RunnerConfig, Scheduler, SystemClock,
};
use outboxer_schemas::{EntryId, Invocation, ScheduleOptions, Serializer};

/// Builder for an [`Outbox`] (§6). Every knob has the spec's stated default;
/// only `pool` and `dialect` are required.
pub struct OutboxBuilder<S: Serializer> {
    dialect: Arc<dyn Dialect>,
    pool: sqlx::AnyPool,
    serializer: S,
    table_name: String,
    write_lock_timeout_seconds: u64,
    attempt_frequency: StdDuration,
    blocklist_after_attempts: u32,
    retention_threshold: chrono::Duration,
    flush_batch_size: u32,
    gc_interval: StdDuration,
    clock: Arc<dyn Clock>,
    instantiator: Arc<dyn Instantiator>,
    executor: Arc<dyn Executor>,
    listener: Arc<dyn OutboxListener>,
}

impl OutboxBuilder<outboxer_schemas::JsonSerializer> {
    /// Starts a builder with every §6 default: JSON serialization, a 2s
    /// attempt frequency, blocklist after 5 attempts, 7-day dedup retention,
    /// a caller-thread executor, a no-op listener, and the system clock.
    pub fn new(dialect: Arc<dyn Dialect>, pool: sqlx::AnyPool) -> Self {
        Self {
            dialect,
            pool,
            serializer: outboxer_schemas::JsonSerializer,
            table_name: "txno_outbox".to_string(),
            write_lock_timeout_seconds: 2,
            attempt_frequency: StdDuration::from_secs(2),
            blocklist_after_attempts: 5,
            retention_threshold: chrono::Duration::days(7),
            flush_batch_size: 4096,
            gc_interval: StdDuration::from_secs(3600),
            clock: Arc::new(SystemClock),
            instantiator: Arc::new(DispatchTable::new()),
            executor: Arc::new(CallerThreadExecutor),
            listener: Arc::new(NoopListener),
        }
    }
}

impl<S: Serializer + Clone + 'static> OutboxBuilder<S> {
    /// Swaps the serializer, changing the builder's generic parameter —
    /// every other knob carries over unchanged.
    pub fn serializer<S2: Serializer + Clone>(self, serializer: S2) -> OutboxBuilder<S2> {
        OutboxBuilder {
            dialect: self.dialect,
            pool: self.pool,
            serializer,
            table_name: self.table_name,
            write_lock_timeout_seconds: self.write_lock_timeout_seconds,
            attempt_frequency: self.attempt_frequency,
            blocklist_after_attempts: self.blocklist_after_attempts,
            retention_threshold: self.retention_threshold,
            flush_batch_size: self.flush_batch_size,
            gc_interval: self.gc_interval,
            clock: self.clock,
            instantiator: self.instantiator,
            executor: self.executor,
            listener: self.listener,
        }
    }

    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn write_lock_timeout_seconds(mut self, seconds: u64) -> Self {
        self.write_lock_timeout_seconds = seconds;
        self
    }

    pub fn attempt_frequency(mut self, frequency: StdDuration) -> Self {
        self.attempt_frequency = frequency;
        self
    }

    pub fn blocklist_after_attempts(mut self, attempts: u32) -> Self {
        self.blocklist_after_attempts = attempts;
        self
    }

    pub fn retention_threshold(mut self, threshold: chrono::Duration) -> Self {
        self.retention_threshold = threshold;
        self
    }

    pub fn flush_batch_size(mut self, size: u32) -> Self {
        self.flush_batch_size = size;
        self
    }

    pub fn gc_interval(mut self, interval: StdDuration) -> Self {
        self.gc_interval = interval;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn instantiator(mut self, instantiator: Arc<dyn Instantiator>) -> Self {
        self.instantiator = instantiator;
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn OutboxListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Assembles every collaborator and returns the running [`Outbox`]
    /// handle. Does not itself spawn the flusher/reaper loops — call
    /// [`Outbox::spawn_background_tasks`] once the application is ready to
    /// start processing (mirroring `mqk-testkit::orchestrator`'s split
    /// between "assemble" and "start").
    pub fn build(self) -> Outbox<S> {
        let persistor = Arc::new(SqlxPersistor::new(
            self.dialect,
            PersistorConfig {
                table_name: self.table_name,
                write_lock_timeout_seconds: self.write_lock_timeout_seconds,
            },
        ));
        let transaction_manager: Arc<dyn TransactionManager> =
            Arc::new(SqlxTransactionManager::new(self.pool));

        let scheduler = Arc::new(Scheduler::new(
            persistor.clone(),
            self.serializer.clone(),
            self.clock.clone(),
            self.listener.clone(),
        ));

        let retry_policy = Arc::new(outboxer_execution::LinearBackoff);
        let runner_config = RunnerConfig {
            attempt_frequency: chrono::Duration::from_std(self.attempt_frequency)
                .unwrap_or_else(|_| chrono::Duration::seconds(2)),
            blocklist_after_attempts: self.blocklist_after_attempts,
            retention_threshold: self.retention_threshold,
        };
        let runner = Arc::new(Runner::new(
            persistor.clone(),
            transaction_manager.clone(),
            self.serializer,
            self.instantiator,
            self.executor,
            retry_policy,
            self.clock.clone(),
            self.listener,
            runner_config,
        ));

        Outbox {
            persistor,
            transaction_manager,
            scheduler,
            runner,
            clock: self.clock,
            attempt_frequency: self.attempt_frequency,
            flush_batch_size: self.flush_batch_size,
            gc_interval: self.gc_interval,
            retention_threshold: self.retention_threshold,
            shutdown: Arc::new(AtomicBool::new(false)),
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }
}

/// The assembled, running outbox (§6's returned handle). Holds every shared
/// collaborator behind an `Arc` so cloning any one piece out (e.g. handing
/// `runner()` to the daemon's `flush-once` endpoint) is cheap.
pub struct Outbox<S: Serializer> {
    persistor: Arc<SqlxPersistor>,
    transaction_manager: Arc<dyn TransactionManager>,
    scheduler: Arc<Scheduler<S>>,
    runner: Arc<Runner<S>>,
    clock: Arc<dyn Clock>,
    attempt_frequency: StdDuration,
    flush_batch_size: u32,
    gc_interval: StdDuration,
    retention_threshold: chrono::Duration,
    shutdown: Arc<AtomicBool>,
    tasks: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl<S: Serializer + Send + Sync + 'static> Outbox<S> {
    /// Begins a new business transaction (§4.3) — what callers wrap their
    /// own writes and a [`Outbox::schedule`] call in.
    pub async fn begin(&self) -> anyhow::Result<Transaction> {
        self.transaction_manager.begin().await
    }

    /// Enqueues `invocation` on `tx` (§4.4), and — once `tx` commits —
    /// immediately attempts the run on a spawned task rather than waiting
    /// for the next flusher tick (DESIGN.md Open Question resolution #3:
    /// the post-commit hook hands off via `tokio::spawn`, so the commit path
    /// itself never blocks on invocation completion).
    pub async fn schedule(
        &self,
        tx: &mut Transaction,
        invocation: Invocation,
        options: ScheduleOptions,
    ) -> anyhow::Result<EntryId> {
        let id = self.scheduler.schedule(tx, invocation, options).await?;
        let runner = self.runner.clone();
        let entry_id = id.clone();
        tx.add_post_commit_hook(move || {
            tokio::spawn(async move {
                if let Err(err) = runner.try_run(&entry_id).await {
                    tracing::warn!(entry_id = %entry_id, error = %err, "immediate post-commit run failed");
                }
            });
        });
        Ok(id)
    }

    /// Un-blocklists `id` (§7, §12.1), restarting its retry schedule.
    pub async fn whitelist(&self, id: &str) -> anyhow::Result<bool> {
        let mut tx = self.transaction_manager.begin().await?;
        let whitelisted = self.persistor.whitelist(tx.connection(), id).await?;
        tx.commit().await?;
        Ok(whitelisted)
    }

    /// Runs a single due-batch scan-and-dispatch cycle (§4.6) without
    /// spawning the periodic loop — what `outboxer-cli`'s `flush-once`
    /// subcommand (§10/§12) calls for a one-shot, scriptable flush.
    pub async fn flush_once(&self) -> anyhow::Result<usize> {
        let flusher = crate::flusher::Flusher::new(
            self.persistor.clone(),
            self.transaction_manager.clone(),
            self.runner.clone(),
            self.clock.clone(),
            self.flush_batch_size,
        );
        flusher.flush_once().await
    }

    /// Runs a single expired/processed-row GC sweep (§4.2's
    /// `deleteProcessedAndExpired`) without spawning the periodic loop —
    /// backs `outboxer-cli`'s `gc` subcommand.
    pub async fn sweep_expired_once(&self) -> anyhow::Result<u64> {
        let reaper = crate::flusher::Reaper::new(
            self.persistor.clone(),
            self.transaction_manager.clone(),
            self.clock.clone(),
            self.retention_threshold,
            self.flush_batch_size,
        );
        reaper.sweep_once().await
    }

    /// Exposes the shared [`SqlxPersistor`] for status/read-only queries
    /// (§12.2's daemon status endpoint).
    pub fn persistor(&self) -> &Arc<SqlxPersistor> {
        &self.persistor
    }

    /// Spawns the flusher and reaper background loops (§4.6). Returns their
    /// join handles so [`Outbox::shutdown`] can await them; callers that
    /// never shut down cleanly can simply drop the handles.
    pub fn spawn_background_tasks(&self) {
        let flusher = Arc::new(crate::flusher::Flusher::new(
            self.persistor.clone(),
            self.transaction_manager.clone(),
            self.runner.clone(),
            self.clock.clone(),
            self.flush_batch_size,
        ));
        let reaper = Arc::new(crate::flusher::Reaper::new(
            self.persistor.clone(),
            self.transaction_manager.clone(),
            self.clock.clone(),
            self.retention_threshold,
            self.flush_batch_size,
        ));

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(flusher.spawn(self.attempt_frequency, self.shutdown.clone()));
        tasks.push(reaper.spawn(self.gc_interval, self.shutdown.clone()));
    }

    /// §5/§12.4: signals every background loop to stop at its next tick and
    /// waits up to `grace` for them to finish. A loop still mid-tick past
    /// `grace` is abandoned (its task is detached, not aborted) rather than
    /// forcibly killed, since an in-flight `finish()` write should be left
    /// to complete on its own rather than torn out from under a held
    /// transaction.
    pub async fn shutdown(&self, grace: StdDuration) {
        self.shutdown.store(true, Ordering::SeqCst);
        let handles = std::mem::take(&mut *self.tasks.lock().unwrap());
        for handle in handles {
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!("outbox background task did not stop within the shutdown grace period");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outboxer_db::migrate;
    use outboxer_schemas::{ArgValue, Invocation};

    async fn sqlite_builder() -> OutboxBuilder<outboxer_schemas::JsonSerializer> {
        sqlx::any::install_default_drivers();
        let pool = sqlx::AnyPool::connect("sqlite::memory:").await.unwrap();
        let dialect: Arc<dyn Dialect> = Arc::new(outboxer_db::Sqlite);
        migrate(&pool, &dialect, "txno_outbox").await.unwrap();
        OutboxBuilder::new(dialect, pool)
    }

    #[tokio::test]
    async fn schedule_then_begin_round_trips_through_a_committed_transaction() {
        let outbox = sqlite_builder().await.build();

        let mut tx = outbox.begin().await.unwrap();
        let invocation = Invocation::new("ReportMailer", "send").with_arg("str", ArgValue::Str("hi".into()));
        let id = outbox
            .schedule(&mut tx, invocation, ScheduleOptions::default())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(!id.is_empty());
    }

    #[tokio::test]
    async fn whitelist_reports_false_for_an_entry_that_is_not_blocklisted() {
        let outbox = sqlite_builder().await.build();
        let whitelisted = outbox.whitelist("no-such-id").await.unwrap();
        assert!(!whitelisted);
    }

    #[tokio::test]
    async fn shutdown_returns_promptly_with_no_background_tasks_spawned() {
        let outbox = sqlite_builder().await.build();
        outbox.shutdown(StdDuration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn flush_once_and_sweep_expired_once_run_without_a_spawned_loop() {
        let outbox = sqlite_builder().await.build();
        assert_eq!(outbox.flush_once().await.unwrap(), 0);
        assert_eq!(outbox.sweep_expired_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn builder_knobs_are_chainable_and_build_succeeds() {
        let outbox = sqlite_builder()
            .await
            .table_name("txno_outbox")
            .attempt_frequency(StdDuration::from_millis(50))
            .blocklist_after_attempts(3)
            .flush_batch_size(5)
            .gc_interval(StdDuration::from_secs(1))
            .build();
        assert!(outbox.whitelist("missing").await.unwrap() == false);
    }
}
