//! HTTP API for operators.
//!
//! Read-only observability; no chat functionality is exposed here.
//!
//! Endpoints:
//! - GET /api/stats — connection, queue, pairing, and ban counts

use std::sync::Arc;
use std::time::Instant;

use axum::{Json, extract::State};
use serde::Serialize;

use crate::relay::RelayState;

/// Response for GET /api/stats.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Live connections.
    pub online: usize,
    /// Connections waiting for a partner.
    pub waiting: usize,
    /// Active conversations.
    pub paired: usize,
    /// Identities with an unexpired ban.
    pub banned_identities: usize,
}

/// GET /api/stats — current relay counters.
pub async fn get_stats(State(state): State<Arc<RelayState>>) -> Json<StatsResponse> {
    let chat = state.chat.lock().await;
    let now = Instant::now();
    Json(StatsResponse {
        online: chat.online(),
        waiting: chat.waiting_len(),
        paired: chat.paired_count(),
        banned_identities: chat.banned_count(now),
    })
}
