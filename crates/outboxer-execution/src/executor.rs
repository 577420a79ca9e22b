//! The user-supplied executor contract (§6 builder surface: `executor`,
//! default caller-thread) and the two stock implementations.
//!
//! §9's open question on thread identity ("the executor must never run work
//! on the commit thread synchronously") is resolved here by construction:
//! [`CallerThreadExecutor`] runs the invocation inline on whichever async
//! task called it — there is no distinct "commit thread" to protect in an
//! async runtime the way there is in the source's thread-pool model — while
//! [`TokioExecutor`] decouples execution onto its own spawned task for
//! deployments that want the submitter's task freed immediately.

use std::future::Future;
use std::pin::Pin;

use anyhow::Context;

pub type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// `#[async_trait]` here (not native `async fn in trait`) so this can be held
/// as `Arc<dyn Executor>` — the submitter needs to swap executors without a
/// generic parameter on every struct that holds one.
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    /// Runs `work` to completion (success or failure), however this
    /// executor chooses to schedule it.
    async fn run(&self, work: BoxFuture) -> anyhow::Result<()>;
}

/// §6 builder default. Awaits `work` directly — no thread hop, no queueing.
#[derive(Debug, Default, Clone, Copy)]
pub struct CallerThreadExecutor;

#[async_trait::async_trait]
impl Executor for CallerThreadExecutor {
    async fn run(&self, work: BoxFuture) -> anyhow::Result<()> {
        work.await
    }
}

/// Spawns `work` onto the Tokio runtime and awaits the join handle, so a
/// slow invocation can't hold up whatever task requested the run.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioExecutor;

#[async_trait::async_trait]
impl Executor for TokioExecutor {
    async fn run(&self, work: BoxFuture) -> anyhow::Result<()> {
        tokio::spawn(work)
            .await
            .context("executor task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn caller_thread_executor_runs_inline() {
        let executor = CallerThreadExecutor;
        let result = executor.run(Box::pin(async { Ok(()) })).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn caller_thread_executor_propagates_failure() {
        let executor = CallerThreadExecutor;
        let result = executor
            .run(Box::pin(async { Err(anyhow::anyhow!("invocation failed")) }))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tokio_executor_runs_on_a_spawned_task() {
        let executor = TokioExecutor;
        let result = executor.run(Box::pin(async { Ok(()) })).await;
        assert!(result.is_ok());
    }
}
