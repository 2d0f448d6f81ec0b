use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use suds_core::{ClientMessage, ServerMessage, Session};

/// Live update feed for one session over the relay's WebSocket.
pub struct Subscription {
    tx: mpsc::UnboundedSender<ClientMessage>,
    rx: mpsc::UnboundedReceiver<ServerMessage>,
    task_handle: tokio::task::JoinHandle<()>,
    heartbeat_handle: tokio::task::JoinHandle<()>,
}

impl Subscription {
    /// Connect and wait for the initial snapshot. The relay always sends
    /// the snapshot before any update, so the first message decides
    /// whether the subscription stands.
    pub async fn connect(ws_url: &str) -> Result<(Self, Session)> {
        let (ws_stream, _) = connect_async(ws_url).await?;

        let (tx_client, rx_client) = mpsc::unbounded_channel::<ClientMessage>();
        let (tx_server, mut rx_server) = mpsc::unbounded_channel::<ServerMessage>();

        let task_handle = tokio::spawn(async move {
            handle_websocket(ws_stream, rx_client, tx_server).await;
        });

        // Send ping every 30 seconds to keep the connection alive
        let tx_heartbeat = tx_client.clone();
        let heartbeat_handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                if tx_heartbeat.send(ClientMessage::Ping).is_err() {
                    break;
                }
            }
        });

        let first = timeout(Duration::from_secs(5), rx_server.recv()).await;
        let snapshot = match first {
            Ok(Some(ServerMessage::Subscribed { session })) => Ok(session),
            Ok(Some(ServerMessage::Error { message })) => {
                Err(anyhow!("subscription refused: {}", message))
            }
            Ok(Some(_)) => Err(anyhow!("unexpected message before snapshot")),
            Ok(None) => Err(anyhow!("connection closed before snapshot")),
            Err(_) => Err(anyhow!("timed out waiting for snapshot")),
        };

        let snapshot = match snapshot {
            Ok(session) => session,
            Err(err) => {
                heartbeat_handle.abort();
                task_handle.abort();
                return Err(err);
            }
        };

        Ok((
            Self {
                tx: tx_client,
                rx: rx_server,
                task_handle,
                heartbeat_handle,
            },
            snapshot,
        ))
    }

    /// Next message from the relay, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }

    /// Tear down the connection and wait for the socket task to finish.
    pub async fn close(self) {
        self.heartbeat_handle.abort();
        drop(self.tx);
        let _ = self.task_handle.await;
    }
}

async fn handle_websocket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_client: mpsc::UnboundedReceiver<ClientMessage>,
    tx_server: mpsc::UnboundedSender<ServerMessage>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx_client.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Ok(server_msg) = serde_json::from_str::<ServerMessage>(&text) {
                    let _ = tx_server.send(server_msg);
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    send_task.abort();
}
