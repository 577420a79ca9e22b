//! The flusher (§4.6, C7): periodic due-batch scan plus the slower-cadence
//! dedup-row GC sweep. Grounded on `mqk-daemon::state::spawn_heartbeat`'s
//! `tokio::spawn` + `tokio::time::interval` loop shape
//! (`core-rs/crates/mqk-daemon/src/state.rs`), generalized from a fixed
//! heartbeat payload to a dispatch tick that submits a batch of entries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use outboxer_db::{SqlxPersistor, TransactionManager};
use outboxer_schemas::Serializer;

use outboxer_execution::{Clock, Runner};

/// One due-batch scan-and-dispatch cycle (§4.6 steps 1-3).
///
/// `select_batch` itself takes no row lock (see `outboxer-db::persistor`);
/// the per-row `FOR UPDATE [SKIP LOCKED]` happens inside each
/// [`Runner::try_run`] call, so two flushers racing on the same batch still
/// resolve to at-most-one-runs-it via that second lock, exactly as §4.6
/// describes: "the flusher transaction commits after submission handoff;
/// locks are released, but subsequent workers re-lock via `lock()` in their
/// own transactions."
pub struct Flusher<S: Serializer> {
    persistor: Arc<SqlxPersistor>,
    transaction_manager: Arc<dyn TransactionManager>,
    runner: Arc<Runner<S>>,
    clock: Arc<dyn Clock>,
    flush_batch_size: u32,
}

impl<S: Serializer + Send + Sync + 'static> Flusher<S> {
    pub fn new(
        persistor: Arc<SqlxPersistor>,
        transaction_manager: Arc<dyn TransactionManager>,
        runner: Arc<Runner<S>>,
        clock: Arc<dyn Clock>,
        flush_batch_size: u32,
    ) -> Self {
        Self {
            persistor,
            transaction_manager,
            runner,
            clock,
            flush_batch_size,
        }
    }

    /// Runs one scan-and-dispatch cycle, returning how many entries were
    /// handed off. Never blocks on any entry's invocation completing (§4.6:
    /// "the flusher never blocks the calling thread on invocation
    /// completion; it returns as soon as the batch is dispatched").
    pub async fn flush_once(&self) -> anyhow::Result<usize> {
        let now = self.clock.now();
        let mut tx = self.transaction_manager.begin().await?;
        let batch = self
            .persistor
            .select_batch(tx.connection(), now, self.flush_batch_size)
            .await?;
        tx.commit().await?;

        let dispatched = batch.len();
        for entry in batch {
            let runner = self.runner.clone();
            tokio::spawn(async move {
                match runner.try_run(&entry.id).await {
                    Ok(outcome) => {
                        tracing::debug!(entry_id = %entry.id, outcome = ?outcome, "flusher dispatch complete");
                    }
                    Err(err) => {
                        tracing::warn!(entry_id = %entry.id, error = %err, "flusher dispatch failed");
                    }
                }
            });
        }
        Ok(dispatched)
    }

    /// Spawns the periodic scan loop (§4.6's `attemptFrequency`). `shutdown`
    /// is polled once per tick — §5's "the flusher honors interruption by
    /// exiting its loop body without submission" plus §9/§12.4's bounded
    /// grace period, both satisfied by a plain flag rather than a
    /// cancellation-token crate (matching the corpus's plain-`tokio`
    /// preference; see DESIGN.md).
    pub fn spawn(self: Arc<Self>, attempt_frequency: Duration, shutdown: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(attempt_frequency);
            loop {
                ticker.tick().await;
                if shutdown.load(Ordering::SeqCst) {
                    tracing::info!("flusher stopping on shutdown signal");
                    break;
                }
                if let Err(err) = self.flush_once().await {
                    tracing::error!(error = %err, "flusher tick failed");
                }
            }
        })
    }
}

/// Periodic housekeeping sweep (§4.6 step 4, §4.2's `deleteProcessedAndExpired`):
/// reaps `processed=true` rows older than `retention_threshold` so dedup keys
/// eventually become reusable (§3 invariant 4).
pub struct Reaper {
    persistor: Arc<SqlxPersistor>,
    transaction_manager: Arc<dyn TransactionManager>,
    clock: Arc<dyn Clock>,
    retention_threshold: chrono::Duration,
    sweep_batch_size: u32,
}

impl Reaper {
    pub fn new(
        persistor: Arc<SqlxPersistor>,
        transaction_manager: Arc<dyn TransactionManager>,
        clock: Arc<dyn Clock>,
        retention_threshold: chrono::Duration,
        sweep_batch_size: u32,
    ) -> Self {
        Self {
            persistor,
            transaction_manager,
            clock,
            retention_threshold,
            sweep_batch_size,
        }
    }

    /// One sweep; returns the number of rows reaped.
    pub async fn sweep_once(&self) -> anyhow::Result<u64> {
        let older_than = self.clock.now() - self.retention_threshold;
        let mut tx = self.transaction_manager.begin().await?;
        let deleted = self
            .persistor
            .delete_processed_and_expired(tx.connection(), older_than, self.sweep_batch_size)
            .await?;
        tx.commit().await?;
        Ok(deleted)
    }

    /// Spawns the GC loop on its own (slower) cadence, same shutdown
    /// protocol as [`Flusher::spawn`].
    pub fn spawn(self: Arc<Self>, interval: Duration, shutdown: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if shutdown.load(Ordering::SeqCst) {
                    tracing::info!("reaper stopping on shutdown signal");
                    break;
                }
                match self.sweep_once().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(reaped = n, "outbox reaper swept expired entries"),
                    Err(err) => tracing::error!(error = %err, "outbox reaper sweep failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outboxer_db::{migrate, Dialect, PersistorConfig, Sqlite, SqlxTransactionManager};
    use outboxer_execution::{
        CallerThreadExecutor, DispatchTable, FixedClock, LinearBackoff, NoopListener, Runner,
        RunnerConfig as ExecRunnerConfig,
    };
    use outboxer_schemas::{ArgValue, Entry, Invocation, JsonSerializer, Serializer as _};

    async fn fixture() -> (
        sqlx::AnyPool,
        Arc<SqlxPersistor>,
        Arc<dyn TransactionManager>,
        Arc<FixedClock>,
    ) {
        sqlx::any::install_default_drivers();
        let pool = sqlx::AnyPool::connect("sqlite::memory:").await.unwrap();
        let dialect: Arc<dyn Dialect> = Arc::new(Sqlite);
        migrate(&pool, &dialect, "txno_outbox").await.unwrap();
        let persistor = Arc::new(SqlxPersistor::new(dialect, PersistorConfig::default()));
        let tm: Arc<dyn TransactionManager> = Arc::new(SqlxTransactionManager::new(pool.clone()));
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        (pool, persistor, tm, clock)
    }

    fn invocation_text(target: &str, method: &str) -> String {
        let inv = Invocation::new(target, method).with_arg("str", ArgValue::Str("x".into()));
        JsonSerializer.serialize(&inv).unwrap()
    }

    #[tokio::test]
    async fn flush_once_dispatches_due_entries_and_ignores_future_ones() {
        let (pool, persistor, tm, clock) = fixture().await;
        let dispatch = DispatchTable::new();
        let (tx_done, rx_done) = tokio::sync::mpsc::unbounded_channel::<()>();
        dispatch.register("T", "m", move |_inv| {
            let tx_done = tx_done.clone();
            async move {
                let _ = tx_done.send(());
                Ok(())
            }
        });

        let runner = Arc::new(Runner::new(
            persistor.clone(),
            tm.clone(),
            JsonSerializer,
            Arc::new(dispatch.clone()),
            Arc::new(CallerThreadExecutor),
            Arc::new(LinearBackoff),
            clock.clone() as Arc<dyn Clock>,
            Arc::new(NoopListener),
            ExecRunnerConfig::default(),
        ));

        let due = Entry::new_pending(
            "e-due".into(),
            invocation_text("T", "m"),
            None,
            clock.now() - chrono::Duration::seconds(1),
        );
        let not_due = Entry::new_pending(
            "e-future".into(),
            invocation_text("T", "m"),
            None,
            clock.now() + chrono::Duration::hours(1),
        );
        persistor.save(&pool, &due).await.unwrap();
        persistor.save(&pool, &not_due).await.unwrap();

        let flusher = Flusher::new(persistor.clone(), tm.clone(), runner, clock.clone() as Arc<dyn Clock>, 10);
        let dispatched = flusher.flush_once().await.unwrap();
        assert_eq!(dispatched, 1);

        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            let mut rx_done = rx_done;
            rx_done.recv().await
        })
        .await
        .expect("handler must run within timeout")
        .expect("channel must yield the completion signal");
    }

    #[tokio::test]
    async fn reaper_sweeps_only_processed_rows_past_retention() {
        let (pool, persistor, tm, clock) = fixture().await;

        let mut processed = Entry::new_pending("e-done".into(), "{}".into(), Some("k1".into()), clock.now());
        processed.processed = true;
        processed.next_attempt_time = clock.now() - chrono::Duration::days(10);
        persistor.save(&pool, &processed).await.unwrap();

        let pending = Entry::new_pending("e-pending".into(), "{}".into(), None, clock.now() - chrono::Duration::days(10));
        persistor.save(&pool, &pending).await.unwrap();

        let reaper = Reaper::new(persistor.clone(), tm.clone(), clock.clone() as Arc<dyn Clock>, chrono::Duration::days(7), 100);
        let reaped = reaper.sweep_once().await.unwrap();
        assert_eq!(reaped, 1);

        let remaining = persistor
            .select_batch(&pool, clock.now() + chrono::Duration::hours(1), 10)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "e-pending");
    }
}
