//! Lifecycle observability sink (§4.8). Delivery is best-effort and
//! synchronous on the thread that performed the state change; a listener
//! that panics must never take down the submitter/flusher with it — see
//! [`notify`], used at every call site instead of invoking the trait
//! methods directly.
//!
//! Grounded on §4.8 plus the corpus's `tracing::info!(field = ?value,
//! "event")` logging idiom (`mqk-daemon/src/routes.rs`'s `info!(run_id =
//! ?run_id, "run/start")`).

use outboxer_schemas::Entry;

pub trait OutboxListener: Send + Sync {
    fn scheduled(&self, _entry: &Entry) {}
    fn success(&self, _entry: &Entry) {}
    fn failure(&self, _entry: &Entry, _cause: &str) {}
    fn blocklisted(&self, _entry: &Entry, _cause: &str) {}
}

/// §6 builder default: `listener` = no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl OutboxListener for NoopListener {}

/// Logs every lifecycle event at `info` (`blocklisted`/`failure` at `warn`),
/// matching the teacher's `tracing`-everywhere style.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl OutboxListener for TracingListener {
    fn scheduled(&self, entry: &Entry) {
        tracing::info!(entry_id = %entry.id, "outbox/scheduled");
    }

    fn success(&self, entry: &Entry) {
        tracing::info!(entry_id = %entry.id, "outbox/success");
    }

    fn failure(&self, entry: &Entry, cause: &str) {
        tracing::warn!(entry_id = %entry.id, attempts = entry.attempts, cause, "outbox/failure");
    }

    fn blocklisted(&self, entry: &Entry, cause: &str) {
        tracing::warn!(entry_id = %entry.id, cause, "outbox/blocklisted");
    }
}

/// Runs `f` and swallows a panic, logging it instead — the mechanism behind
/// §4.8's "listener exceptions are caught and logged but never propagated".
pub fn notify(hook: &str, f: impl FnOnce()) {
    // AssertUnwindSafe is needed because the closures callers pass here
    // capture `Arc<dyn OutboxListener>`, and a bare trait object is not
    // `RefUnwindSafe` (dyn OutboxListener has no such auto-trait impl).
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
        tracing::error!(hook, "outbox listener panicked; ignoring");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct PanickingListener;
    impl OutboxListener for PanickingListener {
        fn success(&self, _entry: &Entry) {
            panic!("boom");
        }
    }

    #[test]
    fn notify_swallows_a_panicking_listener() {
        let listener = PanickingListener;
        let entry = Entry::new_pending("e-1".into(), "{}".into(), None, chrono::Utc::now());
        // Must not unwind out of this test.
        notify("success", || listener.success(&entry));
    }

    #[test]
    fn notify_runs_a_well_behaved_listener() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        notify("scheduled", move || {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
