/// User-visible error kinds (§6/§7 tier 1). Shaped like
/// `mqk-execution::gateway::GateRefusal`: a plain enum with a manual
/// `Display`/`Error` impl rather than `thiserror` (absent from the teacher's
/// dependency stack throughout).
///
/// `OptimisticLock` is tier 2 (§7): it is produced internally by the
/// persistor but the submitter/runner swallows it before it can reach a
/// caller of `schedule()`. It stays in this enum because `Persistor`
/// methods themselves return it — only `schedule()`'s surface filters it
/// out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxError {
    /// UNIQUE violation on `uniqueRequestId` (invariant 3).
    AlreadyScheduled { unique_request_id: String },
    /// A `version`-guarded `update`/`delete` touched zero rows (invariant 2).
    OptimisticLock { entry_id: String },
    /// `schedule()` called outside a business transaction.
    NoTransactionActive,
    /// An invocation argument could not be serialized.
    SerializationUnsupported(String),
}

impl std::fmt::Display for OutboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboxError::AlreadyScheduled { unique_request_id } => {
                write!(f, "already scheduled: uniqueRequestId={unique_request_id}")
            }
            OutboxError::OptimisticLock { entry_id } => {
                write!(f, "optimistic lock failure on entry {entry_id}")
            }
            OutboxError::NoTransactionActive => {
                write!(f, "schedule() called outside an active transaction")
            }
            OutboxError::SerializationUnsupported(reason) => {
                write!(f, "unsupported invocation argument: {reason}")
            }
        }
    }
}

impl std::error::Error for OutboxError {}
