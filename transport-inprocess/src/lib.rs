//! A same-process [`Transport`] that delivers messages synchronously
//! through a shared room registry, for local multiplayer and tests. Grounded
//! on the relay server's `AppState`/`Room` bookkeeping, minus the socket
//! plumbing: joining and leaving a room happens by registering and
//! dropping a handle rather than opening a websocket.

use protocol::{MessageKind, PeerIdPayload, WireMessage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use transport_core::{PeerEvent, SubscriptionId, Transport, TransportError, TransportMetrics};

type MessageListener = Box<dyn FnMut(&WireMessage) + Send>;
type PeerListener = Box<dyn FnMut(&PeerEvent) + Send>;

struct RoomMember {
    player_id: String,
    inbox: Arc<Mutex<Vec<WireMessage>>>,
}

/// One room's worth of joined peers, shared by every [`InProcessTransport`]
/// pointing at the same `room_id`.
struct Room {
    members: Vec<RoomMember>,
    locked: bool,
}

impl Room {
    fn new() -> Self {
        Room {
            members: Vec::new(),
            locked: false,
        }
    }
}

/// The process-wide `room_id -> Room` registry, mirroring the relay
/// server's `AppState.rooms` map but living in-process instead of behind a
/// websocket handler.
fn registry() -> &'static Mutex<HashMap<String, Arc<Mutex<Room>>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<Mutex<Room>>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn room_handle(room_id: &str) -> Arc<Mutex<Room>> {
    let mut rooms = registry().lock().expect("room registry poisoned");
    rooms
        .entry(room_id.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(Room::new())))
        .clone()
}

/// A [`Transport`] implementation that connects peers living in the same
/// process via a shared room registry. Useful for local-multiplayer builds
/// and integration tests that need several peers without any networking.
pub struct InProcessTransport {
    room: Arc<Mutex<Room>>,
    player_id: String,
    is_host: bool,
    inbox: Arc<Mutex<Vec<WireMessage>>>,
    message_listeners: HashMap<u64, MessageListener>,
    join_listeners: HashMap<u64, PeerListener>,
    leave_listeners: HashMap<u64, PeerListener>,
    next_sub_id: u64,
    metrics: TransportMetrics,
}

impl InProcessTransport {
    /// Joins `room_id`, registering `player_id` as a new room member.
    /// Fails with [`TransportError::RoomLocked`] if the room has been
    /// locked by its host.
    pub fn join(room_id: &str, player_id: &str, is_host: bool) -> Result<Self, TransportError> {
        let room = room_handle(room_id);
        {
            let mut guard = room.lock().expect("room poisoned");
            if guard.locked {
                return Err(TransportError::RoomLocked);
            }
            let join_message = WireMessage::new(
                MessageKind::PlayerJoin,
                &PeerIdPayload {
                    player_id: player_id.to_string(),
                },
            );
            for existing in &guard.members {
                existing
                    .inbox
                    .lock()
                    .expect("inbox poisoned")
                    .push(join_message.clone());
            }
            guard.members.push(RoomMember {
                player_id: player_id.to_string(),
                inbox: Arc::new(Mutex::new(Vec::new())),
            });
        }
        let inbox = room
            .lock()
            .expect("room poisoned")
            .members
            .last()
            .expect("member just pushed")
            .inbox
            .clone();

        let mut transport = InProcessTransport {
            room,
            player_id: player_id.to_string(),
            is_host,
            inbox,
            message_listeners: HashMap::new(),
            join_listeners: HashMap::new(),
            leave_listeners: HashMap::new(),
            next_sub_id: 0,
            metrics: TransportMetrics::default(),
        };
        transport.metrics.peers_connected = transport.peer_ids().len() as u32;
        Ok(transport)
    }

    fn allocate_id(&mut self) -> SubscriptionId {
        let id = self.next_sub_id;
        self.next_sub_id += 1;
        SubscriptionId(id)
    }
}

impl Drop for InProcessTransport {
    fn drop(&mut self) {
        let mut guard = self.room.lock().expect("room poisoned");
        guard.members.retain(|m| m.player_id != self.player_id);
        let leave_message = WireMessage::new(
            MessageKind::PlayerLeave,
            &PeerIdPayload {
                player_id: self.player_id.clone(),
            },
        );
        for remaining in &guard.members {
            remaining
                .inbox
                .lock()
                .expect("inbox poisoned")
                .push(leave_message.clone());
        }
    }
}

impl Transport for InProcessTransport {
    fn send(&mut self, to: Option<&str>, message: WireMessage) -> Result<(), TransportError> {
        let guard = self.room.lock().expect("room poisoned");
        let mut delivered = false;
        for member in &guard.members {
            if member.player_id == self.player_id {
                continue;
            }
            if let Some(target) = to {
                if member.player_id != target {
                    continue;
                }
            }
            member
                .inbox
                .lock()
                .expect("inbox poisoned")
                .push(message.clone());
            delivered = true;
        }
        drop(guard);
        if let Some(target) = to {
            if !delivered {
                return Err(TransportError::UnknownPeer(target.to_string()));
            }
        }
        self.metrics.messages_sent += 1;
        Ok(())
    }

    fn on_message(&mut self, listener: MessageListener) -> SubscriptionId {
        let id = self.allocate_id();
        self.message_listeners.insert(id.0, listener);
        id
    }

    fn off_message(&mut self, id: SubscriptionId) {
        self.message_listeners.remove(&id.0);
    }

    fn on_peer_join(&mut self, listener: PeerListener) -> SubscriptionId {
        let id = self.allocate_id();
        self.join_listeners.insert(id.0, listener);
        id
    }

    fn off_peer_join(&mut self, id: SubscriptionId) {
        self.join_listeners.remove(&id.0);
    }

    fn on_peer_leave(&mut self, listener: PeerListener) -> SubscriptionId {
        let id = self.allocate_id();
        self.leave_listeners.insert(id.0, listener);
        id
    }

    fn off_peer_leave(&mut self, id: SubscriptionId) {
        self.leave_listeners.remove(&id.0);
    }

    fn player_id(&self) -> &str {
        &self.player_id
    }

    fn peer_ids(&self) -> Vec<String> {
        self.room
            .lock()
            .expect("room poisoned")
            .members
            .iter()
            .map(|m| m.player_id.clone())
            .filter(|id| id != &self.player_id)
            .collect()
    }

    fn is_host(&self) -> bool {
        self.is_host
    }

    fn lock(&mut self) -> Result<(), TransportError> {
        self.room.lock().expect("room poisoned").locked = true;
        Ok(())
    }

    fn metrics(&self) -> TransportMetrics {
        self.metrics
    }

    /// Drains this peer's inbox and invokes every registered listener.
    /// `PlayerJoin`/`PlayerLeave` messages are synthesized by
    /// [`InProcessTransport::join`] and [`Drop`] rather than sent by a
    /// game, so they're routed to the peer listeners instead of the
    /// message listeners. The runtime calls this once per tick.
    fn poll(&mut self) {
        let drained: Vec<WireMessage> = {
            let mut inbox = self.inbox.lock().expect("inbox poisoned");
            std::mem::take(&mut *inbox)
        };
        for message in &drained {
            match message.kind {
                protocol::MessageKind::PlayerJoin => {
                    if let Ok(payload) = message.decode::<PeerIdPayload>() {
                        let event = PeerEvent {
                            player_id: payload.player_id,
                        };
                        for listener in self.join_listeners.values_mut() {
                            listener(&event);
                        }
                    }
                }
                protocol::MessageKind::PlayerLeave => {
                    if let Ok(payload) = message.decode::<PeerIdPayload>() {
                        let event = PeerEvent {
                            player_id: payload.player_id,
                        };
                        for listener in self.leave_listeners.values_mut() {
                            listener(&event);
                        }
                    }
                }
                _ => {
                    self.metrics.messages_received += 1;
                    for listener in self.message_listeners.values_mut() {
                        listener(message);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::MessageKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn two_peers_exchange_a_message() {
        let room_id = "room-exchange";
        let mut host = InProcessTransport::join(room_id, "host", true).unwrap();
        let mut client = InProcessTransport::join(room_id, "client", false).unwrap();

        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();
        client.on_message(Box::new(move |_msg| {
            received_clone.fetch_add(1, Ordering::SeqCst);
        }));

        host.send(
            None,
            WireMessage::new(MessageKind::Heartbeat, &serde_json::json!({})),
        )
        .unwrap();
        client.poll();

        assert_eq!(received.load(Ordering::SeqCst), 1);
        assert_eq!(host.peer_ids(), vec!["client".to_string()]);
    }

    #[test]
    fn existing_member_observes_join_and_leave_events() {
        let room_id = "room-presence";
        let mut host = InProcessTransport::join(room_id, "host", true).unwrap();

        let joined = Arc::new(Mutex::new(Vec::new()));
        let joined_clone = joined.clone();
        host.on_peer_join(Box::new(move |event| {
            joined_clone.lock().unwrap().push(event.player_id.clone());
        }));
        let left = Arc::new(Mutex::new(Vec::new()));
        let left_clone = left.clone();
        host.on_peer_leave(Box::new(move |event| {
            left_clone.lock().unwrap().push(event.player_id.clone());
        }));

        let client = InProcessTransport::join(room_id, "client", false).unwrap();
        host.poll();
        assert_eq!(*joined.lock().unwrap(), vec!["client".to_string()]);

        drop(client);
        host.poll();
        assert_eq!(*left.lock().unwrap(), vec!["client".to_string()]);
    }

    #[test]
    fn locked_room_rejects_new_joins() {
        let room_id = "room-locked";
        let mut host = InProcessTransport::join(room_id, "host", true).unwrap();
        host.lock().unwrap();
        let result = InProcessTransport::join(room_id, "late", false);
        assert!(matches!(result, Err(TransportError::RoomLocked)));
    }

    #[test]
    fn send_to_unknown_peer_errors() {
        let room_id = "room-unknown";
        let mut host = InProcessTransport::join(room_id, "host", true).unwrap();
        let result = host.send(
            Some("ghost"),
            WireMessage::new(MessageKind::Heartbeat, &serde_json::json!({})),
        );
        assert!(matches!(result, Err(TransportError::UnknownPeer(_))));
    }
}
