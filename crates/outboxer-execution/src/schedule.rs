//! The `schedule()` front-end (§4.4 C5). Rust has no reflective proxy to
//! intercept an arbitrary method call the way the source's surrogate does,
//! so per §9 this is the explicit `schedule(target, method)` builder: build
//! the [`Invocation`], persist it in the caller's open transaction, return.
//! Shaped like `mqk-execution::gateway::BrokerGateway`'s "evaluate, then
//! delegate" flow.

use std::sync::Arc;

use uuid::Uuid;

use outboxer_db::{SqlxPersistor, Transaction};
use outboxer_schemas::{Entry, EntryId, Invocation, ScheduleOptions, Serializer};

use crate::clock::Clock;
use crate::listener::{self, OutboxListener};

/// Builds and persists an [`Invocation`] inside the caller's transaction.
/// This is what the runtime crate's public `Outbox::schedule` wraps.
pub struct Scheduler<S: Serializer> {
    persistor: Arc<SqlxPersistor>,
    serializer: S,
    clock: Arc<dyn Clock>,
    listener: Arc<dyn OutboxListener>,
}

impl<S: Serializer> Scheduler<S> {
    pub fn new(
        persistor: Arc<SqlxPersistor>,
        serializer: S,
        clock: Arc<dyn Clock>,
        listener: Arc<dyn OutboxListener>,
    ) -> Self {
        Self {
            persistor,
            serializer,
            clock,
            listener,
        }
    }

    /// Persists `invocation` as a new [`Entry`] on `tx` (§3's "Created by
    /// `schedule()` ... with `attempts=0, blocklisted=false,
    /// processed=false, version=1, nextAttemptTime=now`"), applying
    /// `options`' `uniqueRequestId`/`delayFor`.
    ///
    /// `NoTransactionActive` (§6) has no way to occur in this API: the
    /// caller must already hold an open [`Transaction`] to call this at
    /// all, so the error is structurally prevented rather than checked at
    /// runtime (see DESIGN.md's Open Question resolutions).
    ///
    /// UNIQUE violations and unsupported arguments surface as
    /// `outboxer_schemas::OutboxError::{AlreadyScheduled,
    /// SerializationUnsupported}` wrapped in the returned `anyhow::Error`
    /// — match with `.downcast_ref::<OutboxError>()` to branch on them.
    pub async fn schedule(
        &self,
        tx: &mut Transaction,
        invocation: Invocation,
        options: ScheduleOptions,
    ) -> anyhow::Result<EntryId> {
        let now = self.clock.now();
        let next_attempt_time = now + options.delay.unwrap_or_else(chrono::Duration::zero);
        let id = Uuid::new_v4().to_string();

        let invocation_text = self
            .serializer
            .serialize(&invocation)
            .map_err(anyhow::Error::new)?;

        let entry = Entry::new_pending(
            id.clone(),
            invocation_text,
            options.unique_request_id,
            next_attempt_time,
        );

        self.persistor.save(tx.connection(), &entry).await?;

        let listener = self.listener.clone();
        let scheduled_entry = entry.clone();
        tx.add_post_commit_hook(move || {
            listener::notify("scheduled", move || listener.scheduled(&scheduled_entry));
        });

        Ok(id)
    }
}
