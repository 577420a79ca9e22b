//! Request and response types for the outbox HTTP endpoints.
//!
//! Grounded on `mqk-daemon/src/api_types.rs`'s plain serde-derive style: no
//! business logic, just the wire shapes `routes.rs` serializes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

/// §12.2: entry counts by state, plus the connectivity/schema check
/// `outboxer_db::status` already performs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub ok: bool,
    pub daemon_uptime_secs: u64,
    pub schema_version: Option<i64>,
    pub pending: i64,
    pub blocklisted: i64,
    pub processed_awaiting_reap: i64,
}

/// §12.1: result of a whitelist request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistResponse {
    pub whitelisted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
