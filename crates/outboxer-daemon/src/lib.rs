//! Example service binary wiring a running [`outboxer_runtime::Outbox`] into
//! an Axum HTTP surface (§11.4): health/status/SSE plus the whitelist
//! recovery route (§12).
//!
//! This file is intentionally thin, matching `mqk-daemon/src/lib.rs`: route
//! handlers live in `routes.rs`, shared state in `state.rs`, wire types in
//! `api_types.rs`.

pub mod api_types;
pub mod routes;
pub mod state;
