use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Messages sent from a subscribed device to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Heartbeat keep-alive.
    Ping,
}

/// Messages pushed from the relay to a subscribed device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Subscription accepted; carries the current row as a snapshot.
    Subscribed { session: Session },
    /// The row changed; carries the full updated row.
    SessionUpdated { session: Session },
    /// Heartbeat response.
    Pong,
    /// Fatal subscription error; the relay closes after sending this.
    Error { message: String },
}
