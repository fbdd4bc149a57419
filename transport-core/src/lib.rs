//! The transport contract every backend (in-process, bridged relay, P2P
//! mesh) implements identically, so the runtime never knows which one it is
//! talking to.

use protocol::WireMessage;
use std::fmt;
use thiserror::Error;

/// A monotonically increasing handle returned by `on_*` subscriptions, used
/// to remove the listener later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A peer joining or leaving the room, as observed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEvent {
    pub player_id: String,
}

/// Errors a [`Transport`] implementation can report back to the runtime.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("room is locked against new joins")]
    RoomLocked,
    #[error("peer {0} is not known to this transport")]
    UnknownPeer(String),
    #[error("transport is disconnected")]
    Disconnected,
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("transport-specific failure: {0}")]
    Backend(String),
}

/// Point-in-time counters a transport may expose for diagnostics. Every
/// field is best-effort; implementations that can't track a counter leave
/// it at zero rather than omitting the struct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportMetrics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub peers_connected: u32,
}

/// The single contract every transport backend satisfies. All three
/// implementations in this workspace (in-process, bridged relay, WebRTC
/// mesh) are interchangeable behind this trait; the runtime depends on
/// nothing else.
pub trait Transport: Send {
    /// Sends a message to one peer, or broadcasts it when `to` is `None`.
    fn send(&mut self, to: Option<&str>, message: WireMessage) -> Result<(), TransportError>;

    /// Registers a listener invoked for every inbound [`WireMessage`].
    /// Returns a handle usable with [`Transport::off_message`].
    fn on_message(&mut self, listener: Box<dyn FnMut(&WireMessage) + Send>) -> SubscriptionId;

    /// Removes a previously registered message listener.
    fn off_message(&mut self, id: SubscriptionId);

    /// Registers a listener invoked when a peer joins the room.
    fn on_peer_join(&mut self, listener: Box<dyn FnMut(&PeerEvent) + Send>) -> SubscriptionId;

    /// Removes a previously registered join listener.
    fn off_peer_join(&mut self, id: SubscriptionId);

    /// Registers a listener invoked when a peer leaves the room.
    fn on_peer_leave(&mut self, listener: Box<dyn FnMut(&PeerEvent) + Send>) -> SubscriptionId;

    /// Removes a previously registered leave listener.
    fn off_peer_leave(&mut self, id: SubscriptionId);

    /// This transport's own player id.
    fn player_id(&self) -> &str;

    /// The ids of every peer currently known to be connected.
    fn peer_ids(&self) -> Vec<String>;

    /// Whether this endpoint is acting as the authoritative host.
    fn is_host(&self) -> bool;

    /// Prevents further joins, when the transport supports it. The default
    /// implementation reports the room as unlockable rather than silently
    /// accepting the call.
    fn lock(&mut self) -> Result<(), TransportError> {
        Err(TransportError::Backend(
            "this transport does not support locking".into(),
        ))
    }

    /// Drains whatever this transport has buffered internally (an inbox, a
    /// channel receiver, a data-channel callback queue) out to the
    /// registered listeners. The runtime calls this once per `tick()`
    /// before reading its own queues, so it never needs the concrete
    /// transport type to pump it. Transports with nothing to drain can
    /// leave this as a no-op.
    fn poll(&mut self) {}

    /// Best-effort diagnostic counters. The default returns all zeros.
    fn metrics(&self) -> TransportMetrics {
        TransportMetrics::default()
    }
}

impl fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("player_id", &self.player_id())
            .field("is_host", &self.is_host())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_messages_are_stable() {
        assert_eq!(
            TransportError::RoomLocked.to_string(),
            "room is locked against new joins"
        );
        assert_eq!(
            TransportError::UnknownPeer("p1".into()).to_string(),
            "peer p1 is not known to this transport"
        );
    }
}
