//! Everything about *running* an invocation (C1's instantiator half, C5
//! the schedule front-end, C6 the submitter & runner, C8 retry policy &
//! clock, C9 the listener contract).
//!
//! `outboxer-db` owns persistence; this crate owns what happens to an
//! [`outboxer_schemas::Entry`] once it's been locked — resolving a handler,
//! invoking it, and writing back the terminal state.

pub mod clock;
pub mod executor;
pub mod instantiator;
pub mod listener;
pub mod retry;
pub mod schedule;
pub mod submitter;

pub use clock::{Clock, FixedClock, SystemClock};
pub use executor::{BoxFuture, CallerThreadExecutor, Executor, TokioExecutor};
pub use instantiator::{DispatchTable, Handler, HandlerFuture, Instantiator};
pub use listener::{notify, NoopListener, OutboxListener, TracingListener};
pub use retry::{LinearBackoff, RetryPolicy};
pub use schedule::Scheduler;
pub use submitter::{RunOutcome, Runner, RunnerConfig};
