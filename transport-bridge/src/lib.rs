//! A [`Transport`] that relays messages through an in-process bridge
//! rather than peer to peer — the same shape as a `postMessage` bridge
//! between two windows, or a signaling relay that also carries game
//! traffic. Two hops: every message goes client -> bridge -> host, or
//! host -> bridge -> client(s), which is what makes per-message sender-id
//! stamping and sync gating possible without trusting either endpoint.

mod hand_shake;
mod lobby;
mod message_relay;

pub use lobby::AppState;

use hand_shake::ClientServerSpecificData;
use protocol::{MessageKind, PeerIdPayload, WireMessage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use transport_core::{PeerEvent, SubscriptionId, Transport, TransportError, TransportMetrics};

type MessageListener = Box<dyn FnMut(&WireMessage) + Send>;
type PeerListener = Box<dyn FnMut(&PeerEvent) + Send>;
type Inbox = Arc<Mutex<Vec<WireMessage>>>;

enum Endpoint {
    Host {
        broadcaster: broadcast::Sender<lobby::BridgeEnvelope>,
    },
    Client {
        to_host: mpsc::Sender<lobby::ClientEnvelope>,
    },
}

/// A bridged connection to a room hosted on [`AppState`]. Construct one
/// with [`BridgeTransport::host`] or [`BridgeTransport::join`], both of
/// which spawn the background pump that feeds this transport's inbox.
pub struct BridgeTransport {
    state: Arc<AppState>,
    room_id: String,
    player_id: String,
    is_host: bool,
    endpoint: Endpoint,
    inbox: Inbox,
    pump: JoinHandle<()>,
    message_listeners: HashMap<u64, MessageListener>,
    join_listeners: HashMap<u64, PeerListener>,
    leave_listeners: HashMap<u64, PeerListener>,
    next_sub_id: u64,
    metrics: TransportMetrics,
}

impl BridgeTransport {
    /// Opens a new bridged room and returns its host endpoint.
    pub async fn host(
        state: Arc<AppState>,
        room_id: &str,
        player_id: &str,
    ) -> Result<Self, TransportError> {
        let result = hand_shake::register_host(&state, room_id, player_id).await?;
        let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
        let ClientServerSpecificData::Server(to_host_receiver, broadcaster) =
            result.specific_data
        else {
            unreachable!("register_host always returns the Server variant")
        };
        let pump = message_relay::spawn_host_pump(to_host_receiver, inbox.clone());
        Ok(BridgeTransport {
            state,
            room_id: result.room_id,
            player_id: result.player_id,
            is_host: true,
            endpoint: Endpoint::Host { broadcaster },
            inbox,
            pump,
            message_listeners: HashMap::new(),
            join_listeners: HashMap::new(),
            leave_listeners: HashMap::new(),
            next_sub_id: 0,
            metrics: TransportMetrics::default(),
        })
    }

    /// Joins an existing bridged room as a regular client.
    pub async fn join(
        state: Arc<AppState>,
        room_id: &str,
        player_id: &str,
    ) -> Result<Self, TransportError> {
        let result = hand_shake::join_room(&state, room_id, player_id).await?;
        let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
        let ClientServerSpecificData::Client(receiver, to_host) = result.specific_data else {
            unreachable!("join_room always returns the Client variant")
        };
        let pump =
            message_relay::spawn_client_pump(receiver, result.player_id.clone(), inbox.clone());
        Ok(BridgeTransport {
            state,
            room_id: result.room_id,
            player_id: result.player_id,
            is_host: false,
            endpoint: Endpoint::Client { to_host },
            inbox,
            pump,
            message_listeners: HashMap::new(),
            join_listeners: HashMap::new(),
            leave_listeners: HashMap::new(),
            next_sub_id: 0,
            metrics: TransportMetrics::default(),
        })
    }

    fn allocate_id(&mut self) -> SubscriptionId {
        let id = self.next_sub_id;
        self.next_sub_id += 1;
        SubscriptionId(id)
    }
}

impl Drop for BridgeTransport {
    fn drop(&mut self) {
        self.pump.abort();
        let state = self.state.clone();
        let room_id = self.room_id.clone();
        let player_id = self.player_id.clone();
        let is_host = self.is_host;
        tokio::spawn(async move {
            hand_shake::leave_room(&state, &room_id, &player_id, is_host).await;
        });
    }
}

impl Transport for BridgeTransport {
    fn send(&mut self, to: Option<&str>, message: WireMessage) -> Result<(), TransportError> {
        match &self.endpoint {
            Endpoint::Host { broadcaster } => {
                let envelope = lobby::BridgeEnvelope {
                    to: to.map(str::to_string),
                    message,
                };
                broadcaster
                    .send(envelope)
                    .map_err(|_| TransportError::Disconnected)?;
            }
            Endpoint::Client { to_host } => {
                let envelope = lobby::ClientEnvelope {
                    from: self.player_id.clone(),
                    message,
                };
                to_host
                    .try_send(envelope)
                    .map_err(|_| TransportError::Disconnected)?;
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
        // The registry lock is async; peer_ids() isn't, so this is a
        // best-effort snapshot that skips the roster rather than blocking
        // when the lock is briefly held elsewhere.
        let Ok(rooms) = self.state.rooms.try_lock() else {
            return Vec::new();
        };
        rooms
            .get(&self.room_id)
            .map(|room| {
                room.player_ids
                    .iter()
                    .filter(|id| id.as_str() != self.player_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn is_host(&self) -> bool {
        self.is_host
    }

    fn metrics(&self) -> TransportMetrics {
        self.metrics
    }

    /// Drains this endpoint's inbox and invokes every registered listener.
    /// `PlayerJoin`/`PlayerLeave` messages are relayed by
    /// [`hand_shake::join_room`]/[`hand_shake::leave_room`] like any other
    /// message, so they're routed to the peer listeners here instead of the
    /// message listeners. The runtime calls this once per tick.
    fn poll(&mut self) {
        let drained: Vec<WireMessage> = {
            let mut inbox = self.inbox.lock().expect("inbox poisoned");
            std::mem::take(&mut *inbox)
        };
        for message in &drained {
            match message.kind {
                MessageKind::PlayerJoin => {
                    if let Ok(payload) = message.decode::<PeerIdPayload>() {
                        let event = PeerEvent {
                            player_id: payload.player_id,
                        };
                        for listener in self.join_listeners.values_mut() {
                            listener(&event);
                        }
                    }
                }
                MessageKind::PlayerLeave => {
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn host_and_client_exchange_messages_through_the_bridge() {
        let state = AppState::new();
        let mut host = BridgeTransport::host(state.clone(), "room-a", "host")
            .await
            .unwrap();
        let mut client = BridgeTransport::join(state.clone(), "room-a", "p1")
            .await
            .unwrap();

        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();
        client.on_message(Box::new(move |_msg| {
            received_clone.fetch_add(1, Ordering::SeqCst);
        }));

        host.send(None, full_sync_message()).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        client.poll();
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn host_observes_peer_join_and_leave() {
        let state = AppState::new();
        let mut host = BridgeTransport::host(state.clone(), "room-presence", "host")
            .await
            .unwrap();

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

        let client = BridgeTransport::join(state.clone(), "room-presence", "p1")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        host.poll();
        assert_eq!(*joined.lock().unwrap(), vec!["p1".to_string()]);

        drop(client);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        host.poll();
        assert_eq!(*left.lock().unwrap(), vec!["p1".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_room_registration_is_rejected() {
        let state = AppState::new();
        let _host = BridgeTransport::host(state.clone(), "room-b", "host")
            .await
            .unwrap();
        let result = BridgeTransport::host(state.clone(), "room-b", "other-host").await;
        assert!(result.is_err());
    }

    fn full_sync_message() -> WireMessage {
        use protocol::StateSyncPayload;
        WireMessage::new(
            MessageKind::StateSync,
            &StateSyncPayload {
                patches: vec![],
                action_seed: None,
                action_name: None,
                full_state: Some(serde_json::json!({})),
                base_seed: Some(1),
            },
        )
    }
}
