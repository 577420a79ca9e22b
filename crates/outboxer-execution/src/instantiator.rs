//! Instantiator / dispatch table (§9 Design Notes): "model this as a tagged
//! invocation record + a dispatch table registered by the instantiator:
//! target names map to a registered handler `(method, args) → future`."
//!
//! The source's reflective-proxy-plus-class-lookup has no static-language
//! equivalent; this is the direct, intentional replacement, shaped like
//! `mqk-execution::order_router`'s `BrokerAdapter` trait-object-behind-a-
//! router pattern generalized from one fixed adapter to a registry keyed by
//! `(target, method)`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use outboxer_schemas::Invocation;

pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A registered handler: takes the full [`Invocation`] (its `args` carry the
/// call's arguments) and returns a future resolving to success/failure.
pub type Handler = Arc<dyn Fn(Invocation) -> HandlerFuture + Send + Sync>;

/// Resolves a target+method pair to a live [`Handler`] (§9's "instantiator
/// resolves a symbolic class name to a live callable", generalized to a
/// target/method pair since there's no reflective method lookup here).
pub trait Instantiator: Send + Sync {
    fn resolve(&self, target_name: &str, method_name: &str) -> Option<Handler>;
}

/// The default, and so far only, [`Instantiator`]: an explicit
/// `register(target, method, handler)` table. §9 requires this exact
/// surface to exist regardless of whether a language-native reflective
/// proxy is also offered — this crate offers no such proxy, so
/// `DispatchTable` is both the default instantiator and the only one.
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: Arc<RwLock<HashMap<(String, String), Handler>>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `(target_name, method_name)`. Re-
    /// registering the same pair replaces the previous handler.
    pub fn register<F, Fut>(&self, target_name: impl Into<String>, method_name: impl Into<String>, handler: F)
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let wrapped: Handler = Arc::new(move |invocation| Box::pin(handler(invocation)));
        self.handlers
            .write()
            .unwrap()
            .insert((target_name.into(), method_name.into()), wrapped);
    }
}

impl Instantiator for DispatchTable {
    fn resolve(&self, target_name: &str, method_name: &str) -> Option<Handler> {
        self.handlers
            .read()
            .unwrap()
            .get(&(target_name.to_string(), method_name.to_string()))
            .cloned()
    }
}
