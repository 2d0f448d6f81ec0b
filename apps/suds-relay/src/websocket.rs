use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use suds_core::{ClientMessage, ServerMessage};

use crate::handlers::SharedGateway;

/// Registry of live subscriptions: session code -> (subscriber -> sender).
#[derive(Default)]
pub struct Subscribers {
    sessions: DashMap<String, DashMap<Uuid, mpsc::UnboundedSender<ServerMessage>>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, code: &str, id: Uuid, tx: mpsc::UnboundedSender<ServerMessage>) {
        self.sessions
            .entry(code.to_string())
            .or_default()
            .insert(id, tx);
    }

    fn remove(&self, code: &str, id: &Uuid) {
        let mut remove_session = false;

        if let Some(peers) = self.sessions.get(code) {
            peers.remove(id);
            // Avoid holding the guard when deciding to drop the session entry.
            remove_session = peers.is_empty();
        }

        if remove_session {
            self.sessions.remove(code);
        }
    }

    /// Fan a message out to every subscriber of a session. Senders whose
    /// pump has gone away are evicted lazily here.
    pub fn publish(&self, code: &str, message: &ServerMessage) {
        let Some(peers) = self.sessions.get(code) else {
            return;
        };

        let mut closed = Vec::new();
        for entry in peers.iter() {
            if entry.value().send(message.clone()).is_err() {
                closed.push(*entry.key());
            }
        }
        for id in closed {
            peers.remove(&id);
        }
    }

    pub fn subscriber_count(&self, code: &str) -> usize {
        self.sessions.get(code).map(|peers| peers.len()).unwrap_or(0)
    }
}

/// GET /ws/{code} - subscribe to change events for one session.
pub async fn subscribe_handler(
    State(gateway): State<SharedGateway>,
    Path(code): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(gateway, code, socket))
}

async fn handle_socket(gateway: SharedGateway, raw_code: String, socket: WebSocket) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let session = match gateway.resolve_by_code(&raw_code).await {
        Ok(session) => session,
        Err(err) => {
            let reply = ServerMessage::Error {
                message: err.to_string(),
            };
            if let Ok(json) = serde_json::to_string(&reply) {
                let _ = ws_sender.send(Message::Text(json)).await;
            }
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    let code = session.code.clone();
    let subscriber_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Snapshot goes through the channel before registration so no
    // concurrent update can be delivered ahead of it.
    let _ = tx.send(ServerMessage::Subscribed { session });
    gateway.subscribers().add(&code, subscriber_id, tx.clone());
    debug!(%code, %subscriber_id, "subscriber attached");

    let pump = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&message) else {
                continue;
            };
            if ws_sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Ping) => {
                    let _ = tx.send(ServerMessage::Pong);
                }
                Err(err) => warn!(%code, "ignoring unparseable client frame: {err}"),
            },
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    gateway.subscribers().remove(&code, &subscriber_id);
    pump.abort();
    debug!(%code, %subscriber_id, "subscriber detached");
}
