//! Composition root (C7): the flusher, the reaper, and the
//! [`OutboxBuilder`] assembly point that wires `outboxer-schemas`,
//! `outboxer-db`, and `outboxer-execution` into one handle applications
//! actually hold.
//!
//! Grounded on `mqk-testkit::orchestrator`'s composition-root shape (one
//! struct owning every shared `Arc`, built by a `Builder`) and
//! `mqk-daemon::state::spawn_heartbeat`'s spawn-a-background-loop pattern,
//! neither of which this teacher crate itself filled in (its own
//! `mqk-runtime` carried only a `Cargo.toml`, no source).

pub mod builder;
pub mod flusher;

pub use builder::{Outbox, OutboxBuilder};
pub use flusher::{Flusher, Reaper};
