//! Retry/backoff policy (§4.7): "next attempt time is `now +
//! attemptFrequency * f(attempts)`; the default `f` is identity (linear)
//! but `f` is a pluggable policy." Kept as a trait object the way
//! `mqk-execution::order_router::OrderRouter<B: BrokerAdapter>` holds its
//! broker behind a trait rather than hardcoding one implementation.

use chrono::Duration;

pub trait RetryPolicy: Send + Sync {
    /// `f(attempts)` scaled by `attempt_frequency`. `attempts` is the
    /// post-increment count (the attempt that just failed), so the first
    /// retry after one failure uses `attempts=1`.
    fn next_attempt_delay(&self, attempt_frequency: Duration, attempts: u32) -> Duration;
}

/// §4.7's default: `f` is the identity function.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearBackoff;

impl RetryPolicy for LinearBackoff {
    fn next_attempt_delay(&self, attempt_frequency: Duration, attempts: u32) -> Duration {
        attempt_frequency * attempts.max(1) as i32
    }
}
