//! Drift relay server.
//!
//! A WebSocket relay that anonymously pairs concurrent visitors into
//! ephemeral one-to-one chats, relays text and media offers between
//! paired peers, and enforces community-reporting-based temporary bans.
//! All state is in memory; a restart clears every session and ban.

mod api;
mod relay;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router,
    extract::ws::{WebSocket, WebSocketUpgrade},
    extract::{ConnectInfo, State},
    http::{HeaderMap, header},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use drift_core::identity::Fingerprinter;
use relay::RelayState;

/// How often expired bans and stale report tallies are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let state = Arc::new(RelayState::new(Arc::new(Fingerprinter)));

    // Periodic hardening sweep: lazy expiry alone would let the ban table
    // and report tallies grow for the life of the process.
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            sweep_state.chat.lock().await.sweep(Instant::now());
        }
    });

    let client_dir = std::env::var("DRIFT_CLIENT_DIR").unwrap_or_else(|_| "client".to_string());
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/stats", get(api::get_stats))
        .fallback_service(
            tower_http::services::ServeDir::new(&client_dir).fallback(
                tower_http::services::ServeFile::new(format!("{client_dir}/index.html")),
            ),
        )
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = std::env::var("DRIFT_ADDR").unwrap_or_else(|_| "0.0.0.0:3210".to_string());
    tracing::info!("Drift relay listening on {addr}");
    tracing::info!("WebSocket: ws://{addr}/ws");
    tracing::info!("Stats:     http://{addr}/api/stats");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    // The User-Agent is the client signature input to the fingerprint.
    let client_sig = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr, client_sig))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<RelayState>,
    addr: SocketAddr,
    client_sig: String,
) {
    relay::handle_connection(socket, state, addr, client_sig).await;
}
