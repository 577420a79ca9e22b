//! Axum router and all HTTP handlers for `outboxer-daemon`.
//!
//! Grounded near-verbatim on `mqk-daemon/src/routes.rs`'s `build_router` +
//! handler shape; the trading/integrity endpoints have no outbox
//! counterpart and are replaced by the whitelist/status operations §12
//! adds.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    api_types::{ErrorResponse, HealthResponse, StatusResponse, WhitelistResponse},
    state::{uptime_secs, AppState, BusMsg},
};

/// Builds the complete application router wired to the given shared state.
/// Middleware layers (CORS, tracing) are attached by `main.rs`, not here, so
/// tests can exercise the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/v1/outbox/:id/whitelist", post(whitelist))
        .with_state(state)
}

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

/// GET /v1/status (§12.2): connectivity/schema check plus entry counts by
/// state, run as three small `COUNT(*)` queries against the shared pool.
pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> Response {
    let db_status = match outboxer_db::status(&st.pool, &st.table_name).await {
        Ok(status) => status,
        Err(err) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse { error: err.to_string() }),
            )
                .into_response();
        }
    };

    let pending = count_where(&st.pool, &st.table_name, "blocklisted = 0 AND processed = 0")
        .await
        .unwrap_or(0);
    let blocklisted = count_where(&st.pool, &st.table_name, "blocklisted = 1")
        .await
        .unwrap_or(0);
    let processed_awaiting_reap = count_where(&st.pool, &st.table_name, "processed = 1")
        .await
        .unwrap_or(0);

    let body = StatusResponse {
        ok: db_status.ok && db_status.has_outbox_table,
        daemon_uptime_secs: uptime_secs(),
        schema_version: db_status.schema_version,
        pending,
        blocklisted,
        processed_awaiting_reap,
    };
    (StatusCode::OK, Json(body)).into_response()
}

async fn count_where(pool: &sqlx::AnyPool, table: &str, predicate: &str) -> anyhow::Result<i64> {
    let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table} WHERE {predicate}"))
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// POST /v1/outbox/:id/whitelist (§12.1).
pub(crate) async fn whitelist(State(st): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match st.outbox.whitelist(&id).await {
        Ok(whitelisted) => (StatusCode::OK, Json(WhitelistResponse { whitelisted })).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse { error: err.to_string() }),
        )
            .into_response(),
    }
}

/// GET /v1/stream (SSE), grounded on `mqk-daemon/src/routes.rs`'s
/// `broadcast_to_sse`.
pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(rx: broadcast::Receiver<BusMsg>) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Scheduled(_) => "scheduled",
                    BusMsg::Success(_) => "success",
                    BusMsg::Failure(_) => "failure",
                    BusMsg::Blocklisted(_) => "blocklisted",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
