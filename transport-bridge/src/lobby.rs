//! Holds the rooms bridged connections pass through: a host registers a
//! room, clients join it, and every message crosses the relay rather than
//! going peer-to-peer. Grounded on the relay server's `AppState`/`Room`
//! bookkeeping, adapted from websocket channel pairs to an in-process
//! broadcast bus since this bridge relays between local endpoints (for
//! example two ends of a `postMessage` bridge) rather than terminating TCP
//! sockets itself.

use protocol::WireMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};

/// An envelope is what actually travels over the broadcast bus: the
/// intended recipient (`None` means "every client") plus the message.
#[derive(Debug, Clone)]
pub struct BridgeEnvelope {
    pub to: Option<String>,
    pub message: WireMessage,
}

/// What a client sends upstream: its own id (injected by the relay, never
/// trusted from the client) plus the message.
#[derive(Debug, Clone)]
pub struct ClientEnvelope {
    pub from: String,
    pub message: WireMessage,
}

/// One bridged room: a host fan-out channel and a client fan-in channel,
/// plus the roster every endpoint needs for `Transport::peer_ids`.
pub struct Room {
    pub to_host_sender: mpsc::Sender<ClientEnvelope>,
    pub host_to_client_broadcaster: broadcast::Sender<BridgeEnvelope>,
    pub player_ids: Vec<String>,
    pub locked: bool,
}

/// The buffer size for the bridge's internal channels, matching the
/// relay's own inter-task buffer sizing.
pub const CHANNEL_BUFFER_SIZE: usize = 256;

/// The bridge-wide room registry. One process may host any number of
/// bridged rooms concurrently.
#[derive(Default)]
pub struct AppState {
    pub rooms: Mutex<HashMap<String, Room>>,
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(AppState::default())
    }
}
