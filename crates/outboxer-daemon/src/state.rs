//! Shared runtime state for `outboxer-daemon`.
//!
//! Grounded near-verbatim on `mqk-daemon/src/state.rs`: a `Clone`-able
//! `AppState` built around a `broadcast::Sender<BusMsg>`, handed to every
//! Axum handler as `State<Arc<AppState>>`. The bus here carries outbox
//! lifecycle events instead of trading-run status (§11.4).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use outboxer_execution::OutboxListener;
use outboxer_runtime::Outbox;
use outboxer_schemas::{Entry, JsonSerializer};

/// One lifecycle event, carrying just enough of an [`Entry`] to be useful
/// over the wire without re-serializing its (possibly large) invocation
/// payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntryEvent {
    pub entry_id: String,
    pub attempts: u32,
    pub cause: Option<String>,
}

impl EntryEvent {
    fn from_entry(entry: &Entry, cause: Option<&str>) -> Self {
        Self {
            entry_id: entry.id.clone(),
            attempts: entry.attempts,
            cause: cause.map(ToString::to_string),
        }
    }
}

/// Messages broadcast over the internal event bus and surfaced as SSE
/// events (§11.4).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Scheduled(EntryEvent),
    Success(EntryEvent),
    Failure(EntryEvent),
    Blocklisted(EntryEvent),
}

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Forwards every [`OutboxListener`] callback onto the bus as a [`BusMsg`]
/// (§11.4: "fed by an `OutboxListener` implementation that forwards onto
/// the bus"). A dropped or full bus is not an error — `broadcast::Sender::
/// send` failing just means no subscriber is currently listening.
pub struct BusListener {
    bus: broadcast::Sender<BusMsg>,
}

impl BusListener {
    pub fn new(bus: broadcast::Sender<BusMsg>) -> Self {
        Self { bus }
    }
}

impl OutboxListener for BusListener {
    fn scheduled(&self, entry: &Entry) {
        let _ = self.bus.send(BusMsg::Scheduled(EntryEvent::from_entry(entry, None)));
    }

    fn success(&self, entry: &Entry) {
        let _ = self.bus.send(BusMsg::Success(EntryEvent::from_entry(entry, None)));
    }

    fn failure(&self, entry: &Entry, cause: &str) {
        let _ = self
            .bus
            .send(BusMsg::Failure(EntryEvent::from_entry(entry, Some(cause))));
    }

    fn blocklisted(&self, entry: &Entry, cause: &str) {
        let _ = self
            .bus
            .send(BusMsg::Blocklisted(EntryEvent::from_entry(entry, Some(cause))));
    }
}

/// Cloneable (`Arc`) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Static build metadata.
    pub build: BuildInfo,
    /// The running outbox, assembled once at startup.
    pub outbox: Arc<Outbox<JsonSerializer>>,
    /// Kept alongside `outbox` for the `/v1/status` count queries, which
    /// run ad hoc SQL the `Persistor` doesn't expose as a typed method.
    pub pool: sqlx::AnyPool,
    pub table_name: String,
}

impl AppState {
    /// Builds state around a freshly created bus — used by tests and anyone
    /// who doesn't need to wire a [`BusListener`] into the outbox's
    /// `OutboxListener` before the outbox itself is built.
    pub fn new(outbox: Arc<Outbox<JsonSerializer>>, pool: sqlx::AnyPool, table_name: String) -> Arc<Self> {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self::with_bus(bus, outbox, pool, table_name)
    }

    /// Builds state around an already-created `bus`. `main.rs` needs this
    /// split so the same `broadcast::Sender` can be handed to a
    /// [`BusListener`] wired into `OutboxBuilder::listener` *before* the
    /// outbox is built, and to this state *after* — both ends must share one
    /// channel or `/v1/stream` would never see outbox lifecycle events.
    pub fn with_bus(
        bus: broadcast::Sender<BusMsg>,
        outbox: Arc<Outbox<JsonSerializer>>,
        pool: sqlx::AnyPool,
        table_name: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            build: BuildInfo {
                service: "outboxer-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            outbox,
            pool,
            table_name,
        })
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START.get_or_init(std::time::Instant::now).elapsed().as_secs()
}

/// Spawns a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
