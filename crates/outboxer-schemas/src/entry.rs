use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Primary key of a `TXNO_OUTBOX` row. An opaque unique string (§3) —
/// `Uuid` encoded as text, matching `mqk_db`'s `Uuid` id columns but stored
/// as text so non-UUID dialects (and the serializer round-trip) stay simple.
pub type EntryId = String;

/// A durable row in `TXNO_OUTBOX` (§3).
///
/// `version` implements optimistic concurrency (invariant 2): every
/// successful `update`/`delete` bumps it by exactly one and only succeeds if
/// the caller's copy matches what's in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub unique_request_id: Option<String>,
    pub invocation: String,
    pub next_attempt_time: DateTime<Utc>,
    pub attempts: u32,
    pub blocklisted: bool,
    pub processed: bool,
    pub version: u32,
}

impl Entry {
    /// §3 Lifecycle: "Created by `schedule()` ... with `attempts=0,
    /// blocklisted=false, processed=false, version=1, nextAttemptTime=now`."
    pub fn new_pending(
        id: EntryId,
        invocation: String,
        unique_request_id: Option<String>,
        next_attempt_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            unique_request_id,
            invocation,
            next_attempt_time,
            attempts: 0,
            blocklisted: false,
            processed: false,
            version: 1,
        }
    }

    /// Invariant 1: `(blocklisted=false ∧ processed=false)` is the only
    /// selectable state, additionally gated on `next_attempt_time < now`.
    pub fn is_selectable(&self, now: DateTime<Utc>) -> bool {
        !self.blocklisted && !self.processed && self.next_attempt_time < now
    }

    /// §4.9 state machine: `PENDING` iff not processed and not blocklisted.
    pub fn state(&self) -> EntryState {
        if self.processed {
            EntryState::Done
        } else if self.blocklisted {
            EntryState::Blocklisted
        } else {
            EntryState::Pending
        }
    }
}

/// The persisted projection of §4.9's state machine. `Running` is
/// deliberately absent — it is represented by a held row lock, never
/// written to a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryState {
    Pending,
    Done,
    Blocklisted,
}

/// Per-call options for `schedule(...)` (§4.4): `uniqueRequestId(s)` and
/// `delayFor(duration)`.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    pub unique_request_id: Option<String>,
    pub delay: Option<chrono::Duration>,
}

impl ScheduleOptions {
    pub fn unique_request_id(mut self, id: impl Into<String>) -> Self {
        self.unique_request_id = Some(id.into());
        self
    }

    pub fn delay_for(mut self, delay: chrono::Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}
