//! `outboxer-daemon` entry point.
//!
//! Thin by design, matching `mqk-daemon/src/main.rs`: load env, connect,
//! migrate, assemble the outbox, wire it to the HTTP surface, serve. All
//! route handlers live in `routes.rs`; all shared state lives in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use outboxer_daemon::{routes, state};
use outboxer_db::{dialect_for_url, migrate};
use outboxer_runtime::OutboxBuilder;
use tokio::sync::broadcast;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; production injects env vars directly. Silent if the
    // file does not exist.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let db_url = std::env::var(outboxer_db::ENV_DB_URL)
        .with_context(|| format!("missing env var {}", outboxer_db::ENV_DB_URL))?;
    let dialect = dialect_for_url(&db_url);
    let pool = outboxer_db::connect(&db_url).await?;
    migrate(&pool, &dialect, "txno_outbox").await?;

    let (bus, _rx) = broadcast::channel::<state::BusMsg>(1024);
    let listener = Arc::new(state::BusListener::new(bus.clone()));

    let outbox = Arc::new(
        OutboxBuilder::new(dialect, pool.clone())
            .attempt_frequency(attempt_frequency_from_env())
            .listener(listener)
            .build(),
    );
    outbox.spawn_background_tasks();

    let shared = state::AppState::with_bus(bus.clone(), outbox, pool, "txno_outbox".to_string());
    state::spawn_heartbeat(bus, Duration::from_secs(1));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("outboxer-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("OUTBOXER_DAEMON_ADDR").ok()?.parse().ok()
}

fn attempt_frequency_from_env() -> Duration {
    std::env::var("OUTBOXER_ATTEMPT_FREQUENCY_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(2))
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
