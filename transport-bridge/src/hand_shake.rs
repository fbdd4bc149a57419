//! Joining and leaving a bridged room. The general protocol of connecting
//! is: a host registers the room first, then clients join an existing room
//! by id; there is no wire handshake here because both hops of the bridge
//! already live in the same process — see [`crate::BridgeTransport`] for
//! what crosses an actual bridge boundary.

use crate::lobby::{AppState, BridgeEnvelope, CHANNEL_BUFFER_SIZE, ClientEnvelope, Room};
use protocol::{MessageKind, PeerIdPayload, WireMessage};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use transport_core::TransportError;

/// Channel endpoints handed to a freshly joined bridge transport; which
/// variant depends on whether it joined as host or as a regular client.
pub enum ClientServerSpecificData {
    /// The host receives every client's outbound message on this receiver
    /// and fans its own messages out on this sender.
    Server(
        mpsc::Receiver<crate::lobby::ClientEnvelope>,
        broadcast::Sender<BridgeEnvelope>,
    ),
    /// A client receives the host's fan-out on this receiver and sends its
    /// own messages upstream on this sender.
    Client(
        broadcast::Receiver<BridgeEnvelope>,
        mpsc::Sender<crate::lobby::ClientEnvelope>,
    ),
}

/// The result of successfully joining (or opening) a bridged room.
pub struct HandshakeResult {
    pub room_id: String,
    pub player_id: String,
    pub specific_data: ClientServerSpecificData,
}

/// Opens a new room and registers the caller as its host. Fails if a room
/// with this id already exists.
pub async fn register_host(
    state: &Arc<AppState>,
    room_id: &str,
    player_id: &str,
) -> Result<HandshakeResult, TransportError> {
    let mut rooms = state.rooms.lock().await;
    if rooms.contains_key(room_id) {
        return Err(TransportError::Backend(format!(
            "room {room_id} already exists"
        )));
    }
    let (to_host_sender, to_host_receiver) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let (to_client_sender, _) = broadcast::channel(CHANNEL_BUFFER_SIZE);
    rooms.insert(
        room_id.to_string(),
        Room {
            to_host_sender,
            host_to_client_broadcaster: to_client_sender.clone(),
            player_ids: vec![player_id.to_string()],
            locked: false,
        },
    );
    Ok(HandshakeResult {
        room_id: room_id.to_string(),
        player_id: player_id.to_string(),
        specific_data: ClientServerSpecificData::Server(to_host_receiver, to_client_sender),
    })
}

/// Joins an existing room by id. Fails if the room doesn't exist or has
/// been locked against new joins.
pub async fn join_room(
    state: &Arc<AppState>,
    room_id: &str,
    player_id: &str,
) -> Result<HandshakeResult, TransportError> {
    let (to_host_sender, broadcaster, receiver) = {
        let mut rooms = state.rooms.lock().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return Err(TransportError::Backend(format!(
                "room {room_id} does not exist"
            )));
        };
        if room.locked {
            return Err(TransportError::RoomLocked);
        }
        room.player_ids.push(player_id.to_string());
        (
            room.to_host_sender.clone(),
            room.host_to_client_broadcaster.clone(),
            room.host_to_client_broadcaster.subscribe(),
        )
    };

    // Notify the host (via its inbox, like any other client message) and
    // any already-connected clients (via the fan-out broadcast) that this
    // peer joined, so `Transport::on_peer_join` fires on both sides.
    let join_message = WireMessage::new(
        MessageKind::PlayerJoin,
        &PeerIdPayload {
            player_id: player_id.to_string(),
        },
    );
    if let Err(err) = to_host_sender
        .send(ClientEnvelope {
            from: player_id.to_string(),
            message: join_message.clone(),
        })
        .await
    {
        tracing::warn!(?err, "failed to notify host of peer join");
    }
    let _ = broadcaster.send(BridgeEnvelope {
        to: None,
        message: join_message,
    });

    Ok(HandshakeResult {
        room_id: room_id.to_string(),
        player_id: player_id.to_string(),
        specific_data: ClientServerSpecificData::Client(receiver, to_host_sender),
    })
}

/// Removes `player_id` from the room's roster, drops the room entirely once
/// its host leaves, and notifies the host and remaining clients so
/// `Transport::on_peer_leave` fires on both sides.
pub async fn leave_room(state: &Arc<AppState>, room_id: &str, player_id: &str, is_host: bool) {
    let notify = {
        let mut rooms = state.rooms.lock().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return;
        };
        let broadcaster = room.host_to_client_broadcaster.clone();
        if is_host {
            let to_host_sender = None;
            rooms.remove(room_id);
            (broadcaster, to_host_sender)
        } else {
            room.player_ids.retain(|id| id != player_id);
            (broadcaster, Some(room.to_host_sender.clone()))
        }
    };

    let (broadcaster, to_host_sender) = notify;
    let leave_message = WireMessage::new(
        MessageKind::PlayerLeave,
        &PeerIdPayload {
            player_id: player_id.to_string(),
        },
    );
    let _ = broadcaster.send(BridgeEnvelope {
        to: None,
        message: leave_message.clone(),
    });
    if let Some(to_host_sender) = to_host_sender {
        if let Err(err) = to_host_sender
            .send(ClientEnvelope {
                from: player_id.to_string(),
                message: leave_message,
            })
            .await
        {
            tracing::warn!(?err, "failed to notify host of peer leave");
        }
    }
}
