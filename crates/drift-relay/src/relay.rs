//! Connection handling and effect delivery.
//!
//! Each WebSocket gets an opaque connection id and a bounded outbound
//! channel. All chat logic lives in [`ChatState`]; this module only owns
//! the transport plumbing: it parses inbound frames, runs exactly one
//! state operation per frame behind the coarse lock, and delivers the
//! resulting effects through the sender registry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use drift_core::identity::IdentityResolver;
use drift_core::protocol::{self, ClientEvent, MediaKind, ServerEvent};
use drift_core::session::{ChatState, ConnId, Effect};

/// Outbound channel capacity per connection.
const OUTBOUND_CAPACITY: usize = 32;

/// A frame for the per-connection send loop.
#[derive(Debug)]
enum Outbound {
    Event(ServerEvent),
    /// Close the socket after draining. Used for moderation closes.
    Close,
}

/// Shared relay state: the chat state machine behind one coarse lock,
/// plus the sender registry the dispatcher delivers through.
pub struct RelayState {
    pub chat: Mutex<ChatState>,
    senders: RwLock<HashMap<ConnId, mpsc::Sender<Outbound>>>,
    resolver: Arc<dyn IdentityResolver>,
}

impl RelayState {
    pub fn new(resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            chat: Mutex::new(ChatState::new()),
            senders: RwLock::new(HashMap::new()),
            resolver,
        }
    }

    /// Deliver effects produced by a state operation.
    ///
    /// A target whose sender is already gone is silently skipped; the
    /// state machine never assumes delivery. Must be called with the chat
    /// lock released.
    async fn deliver(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send { to, event } => {
                    let tx = self.senders.read().await.get(&to).cloned();
                    if let Some(tx) = tx {
                        let _ = tx.send(Outbound::Event(event)).await;
                    }
                }
                Effect::Close { conn } => {
                    let tx = self.senders.write().await.remove(&conn);
                    if let Some(tx) = tx {
                        let _ = tx.send(Outbound::Close).await;
                    }
                }
            }
        }
    }
}

/// Handle a single WebSocket connection from upgrade to teardown.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<RelayState>,
    addr: SocketAddr,
    client_sig: String,
) {
    let id: ConnId = Uuid::new_v4();
    let identity = state.resolver.resolve(&addr.ip().to_string(), &client_sig);
    info!(%id, %identity, "connection opened");

    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);
    state.senders.write().await.insert(id, tx);

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Drain the outbound channel onto the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            match out {
                Outbound::Event(event) => {
                    let Ok(json) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if ws_tx.send(WsMessage::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_tx.close().await;
                    break;
                }
            }
        }
    });

    // Ban check + registration. A banned identity gets the notice and a
    // forced close before any further state exists for this connection.
    let effects = {
        let mut chat = state.chat.lock().await;
        chat.connect(id, identity, Instant::now())
    };
    let refused = was_refused(&effects, id);
    state.deliver(effects).await;

    // A refused connection never gets a recv loop: frames pipelined in
    // right after the upgrade must not race the socket close.
    if refused {
        let _ = send_task.await;
        state.senders.write().await.remove(&id);
        let effects = {
            let mut chat = state.chat.lock().await;
            chat.disconnect(id)
        };
        state.deliver(effects).await;
        info!(%id, "connection refused");
        return;
    }

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let event = match protocol::decode_client_event(&text) {
                        Ok(event) => event,
                        Err(e) => {
                            // Malformed input is dropped, not surfaced.
                            debug!(%id, "dropping frame: {e}");
                            continue;
                        }
                    };
                    let effects = {
                        let mut chat = recv_state.chat.lock().await;
                        dispatch(&mut chat, id, event)
                    };
                    recv_state.deliver(effects).await;
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either side to finish.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Full teardown. Safe even when a moderation close got here first.
    state.senders.write().await.remove(&id);
    let effects = {
        let mut chat = state.chat.lock().await;
        chat.disconnect(id)
    };
    state.deliver(effects).await;
    info!(%id, "connection closed");
}

/// Whether the connect effects forcibly closed this connection.
fn was_refused(effects: &[Effect], id: ConnId) -> bool {
    effects
        .iter()
        .any(|e| matches!(e, Effect::Close { conn } if *conn == id))
}

/// Route one inbound event to its state operation.
fn dispatch(chat: &mut ChatState, id: ConnId, event: ClientEvent) -> Vec<Effect> {
    match event {
        ClientEvent::Agree => chat.agree(id),
        ClientEvent::Find => chat.find(id),
        ClientEvent::Stop => chat.stop(id),
        ClientEvent::Next => chat.next(id),
        ClientEvent::Message { text } => chat.message(id, &text),
        ClientEvent::Report => chat.report(id, Instant::now()),
        ClientEvent::PhotoOffer { data } => chat.media_offer(id, MediaKind::Photo, data),
        ClientEvent::VideoOffer { data } => chat.media_offer(id, MediaKind::Video, data),
        ClientEvent::PhotoAccept => chat.media_accept(id, MediaKind::Photo),
        ClientEvent::PhotoDecline => chat.media_decline(id, MediaKind::Photo),
        ClientEvent::VideoAccept => chat.media_accept(id, MediaKind::Video),
        ClientEvent::VideoDecline => chat.media_decline(id, MediaKind::Video),
    }
}
