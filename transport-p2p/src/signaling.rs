//! The signaling contract this transport needs from its caller.
//!
//! WebRTC peers can't discover each other on their own: someone still has
//! to carry SDP offers/answers and ICE candidates between peers before a
//! data channel exists. This crate doesn't run that exchange itself (it has
//! no opinion on whether it rides over the bridge relay, a websocket, or a
//! lobby service) — callers provide a [`Signaler`] and this crate only
//! speaks the mesh's own application protocol once a channel is open.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One hop of the offer/answer/ICE exchange, addressed to a specific peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalPacket {
    pub from: String,
    pub to: String,
    pub body: SignalBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SignalBody {
    Offer(String),
    Answer(String),
    IceCandidate(String),
}

/// Supplied by the embedder to carry [`SignalPacket`]s between peers during
/// connection setup, out of band from the mesh itself.
#[async_trait]
pub trait Signaler: Send + Sync {
    async fn send(&self, packet: SignalPacket) -> Result<(), String>;
    async fn recv(&mut self) -> Option<SignalPacket>;
}
