//! A [`Transport`] backed by a direct WebRTC mesh: every peer holds a data
//! channel straight to every other peer, with no relay in the middle once
//! connections are up. Grounded on the teacher's own native/wasm cfg split
//! for its websocket layer, carried over here for WebRTC: `webrtc` (webrtc-rs)
//! on native targets, `web-sys`'s `RtcPeerConnection` directly on wasm32.

mod health;
pub mod signaling;

#[cfg(not(target_arch = "wasm32"))]
mod native;
#[cfg(target_arch = "wasm32")]
mod wasm;

use health::HealthMonitor;
use protocol::{MessageKind, TimestampPayload, WireMessage};
use std::collections::HashMap;
use transport_core::{PeerEvent, SubscriptionId, Transport, TransportError, TransportMetrics};

#[cfg(not(target_arch = "wasm32"))]
use native::NativeMesh as MeshBackend;
#[cfg(target_arch = "wasm32")]
use wasm::WasmMesh as MeshBackend;

#[cfg(not(target_arch = "wasm32"))]
fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(target_arch = "wasm32")]
fn now_ms() -> u64 {
    js_sys::Date::now() as u64
}

type MessageListener = Box<dyn FnMut(&WireMessage) + Send>;
type PeerListener = Box<dyn FnMut(&PeerEvent) + Send>;

/// The direct peer-to-peer mesh transport. One instance per local peer;
/// `mesh` holds the cfg-selected native/wasm backend, and `health`
/// layers the application-level ping/pong liveness protocol over it, since
/// WebRTC's own connection-state transitions are too slow and too coarse
/// to use for gameplay-relevant peer-timeout decisions.
pub struct P2pTransport {
    mesh: MeshBackend,
    health: HealthMonitor,
    last_ping_ms: u64,
    player_id: String,
    is_host: bool,
    message_listeners: HashMap<u64, MessageListener>,
    join_listeners: HashMap<u64, PeerListener>,
    leave_listeners: HashMap<u64, PeerListener>,
    next_sub_id: u64,
    metrics: TransportMetrics,
}

impl P2pTransport {
    /// Creates a mesh endpoint with no peers connected yet. Use the
    /// cfg-selected backend (`native`/`wasm` modules) together with a
    /// [`signaling::Signaler`] to bring peers online.
    pub fn new(player_id: impl Into<String>, is_host: bool) -> Self {
        P2pTransport {
            mesh: MeshBackend::new(),
            health: HealthMonitor::new(),
            last_ping_ms: 0,
            player_id: player_id.into(),
            is_host,
            message_listeners: HashMap::new(),
            join_listeners: HashMap::new(),
            leave_listeners: HashMap::new(),
            next_sub_id: 0,
            metrics: TransportMetrics::default(),
        }
    }

    /// Registers `peer_id` as freshly connected: starts health tracking and
    /// fires join listeners. Called once the mesh backend's own connection
    /// setup (offer/answer/ICE through a [`signaling::Signaler`]) completes.
    pub fn note_peer_connected(&mut self, peer_id: &str) {
        self.health.track(peer_id, now_ms());
        let event = PeerEvent {
            player_id: peer_id.to_string(),
        };
        for listener in self.join_listeners.values_mut() {
            listener(&event);
        }
        self.metrics.peers_connected = self.mesh.peer_ids().len() as u32;
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn send_raw(&mut self, peer_id: &str, message: WireMessage) -> Result<(), TransportError> {
        // The native backend's send is async; mesh sends happen on the
        // tokio runtime driving poll(), so this blocks only as long as it
        // takes to hand the frame to the data channel's internal queue.
        futures_lite_block_on(self.mesh.send_to(peer_id, &message))
    }

    #[cfg(target_arch = "wasm32")]
    fn send_raw(&mut self, peer_id: &str, message: WireMessage) -> Result<(), TransportError> {
        self.mesh.send_to(peer_id, &message)
    }

    fn allocate_id(&mut self) -> SubscriptionId {
        let id = self.next_sub_id;
        self.next_sub_id += 1;
        SubscriptionId(id)
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn futures_lite_block_on<F: std::future::Future<Output = Result<(), TransportError>>>(
    fut: F,
) -> Result<(), TransportError> {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
}

impl Transport for P2pTransport {
    fn send(&mut self, to: Option<&str>, message: WireMessage) -> Result<(), TransportError> {
        match to {
            Some(target) => self.send_raw(target, message),
            None => {
                for peer_id in self.mesh.peer_ids() {
                    self.send_raw(&peer_id, message.clone())?;
                }
                Ok(())
            }
        }?;
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
        self.mesh.peer_ids()
    }

    fn is_host(&self) -> bool {
        self.is_host
    }

    fn metrics(&self) -> TransportMetrics {
        self.metrics
    }

    /// Drains inbound mesh traffic to registered listeners, answers pings,
    /// records pongs, sends overdue pings, and evicts peers that have gone
    /// silent past the timeout. The runtime calls this once per tick.
    fn poll(&mut self) {
        while let Ok((peer_id, message)) = self.mesh.inbound_rx.try_recv() {
            self.health.record_seen(&peer_id, now_ms());
            match message.kind {
                MessageKind::HealthPing => {
                    let pong = WireMessage::new(
                        MessageKind::HealthPong,
                        &TimestampPayload {
                            timestamp: now_ms(),
                        },
                    );
                    let _ = self.send_raw(&peer_id, pong);
                }
                MessageKind::HealthPong => {}
                _ => {
                    self.metrics.messages_received += 1;
                    for listener in self.message_listeners.values_mut() {
                        listener(&message);
                    }
                }
            }
        }

        let now = now_ms();
        if self.health.should_ping(self.last_ping_ms, now) {
            let ping = WireMessage::new(
                MessageKind::HealthPing,
                &TimestampPayload { timestamp: now },
            );
            for peer_id in self.mesh.peer_ids() {
                let _ = self.send_raw(&peer_id, ping.clone());
            }
            self.last_ping_ms = now;
        }

        for peer_id in self.health.timed_out_peers(now) {
            tracing::warn!(peer = %peer_id, "mesh peer timed out, evicting");
            self.mesh.remove_peer(&peer_id);
            self.health.forget(&peer_id);
            let event = PeerEvent {
                player_id: peer_id,
            };
            for listener in self.leave_listeners.values_mut() {
                listener(&event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::health::{HealthMonitor, PEER_TIMEOUT_MS};

    #[test]
    fn a_fresh_monitor_has_no_timeouts() {
        let monitor = HealthMonitor::new();
        assert!(monitor.timed_out_peers(PEER_TIMEOUT_MS).is_empty());
    }
}
