//! Shared data types for the transactional outbox: the invocation model and
//! its serializer contract (C1), the durable entry row (C2), and the public
//! error kinds callers can see (§6/§7).
//!
//! This crate has no database or async dependency on purpose — everything
//! here is plain data so `outboxer-db` and `outboxer-execution` can both
//! depend on it without a cycle.

mod entry;
mod error;
mod invocation;

pub use entry::{Entry, EntryId, ScheduleOptions};
pub use error::OutboxError;
pub use invocation::{ArgValue, Invocation, JsonSerializer, Serializer};
