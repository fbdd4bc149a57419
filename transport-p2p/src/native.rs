//! The native mesh backend, built on `webrtc` (webrtc-rs). Each peer is a
//! full [`RTCPeerConnection`] with one reliable, ordered data channel
//! carrying [`WireMessage`]s as JSON text frames.

use crate::signaling::{SignalBody, SignalPacket, Signaler};
use protocol::WireMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use transport_core::TransportError;
use webrtc::api::APIBuilder;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// One established mesh peer: its connection and the data channel used for
/// all mesh traffic.
struct PeerLink {
    #[allow(dead_code)]
    connection: Arc<RTCPeerConnection>,
    channel: Arc<RTCDataChannel>,
}

/// The native WebRTC mesh: a set of direct peer connections, each carrying
/// its own data channel, fed into one shared inbound queue. `links` is
/// shared behind a lock because the answerer side learns its data channel
/// from webrtc-rs's `on_data_channel` callback, which fires later and off
/// the call stack that set up the connection.
pub struct NativeMesh {
    links: Arc<Mutex<HashMap<String, PeerLink>>>,
    inbound_tx: mpsc::UnboundedSender<(String, WireMessage)>,
    pub inbound_rx: mpsc::UnboundedReceiver<(String, WireMessage)>,
}

impl NativeMesh {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        NativeMesh {
            links: Arc::new(Mutex::new(HashMap::new())),
            inbound_tx,
            inbound_rx,
        }
    }

    async fn build_connection() -> Result<Arc<RTCPeerConnection>, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        let api = APIBuilder::new().with_media_engine(media_engine).build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };

        let connection = api
            .new_peer_connection(config)
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        Ok(Arc::new(connection))
    }

    fn wire_channel(&self, channel: Arc<RTCDataChannel>, peer_id: String) {
        let tx = self.inbound_tx.clone();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let tx = tx.clone();
            let peer_id = peer_id.clone();
            Box::pin(async move {
                if let Ok(text) = String::from_utf8(msg.data.to_vec()) {
                    if let Ok(message) = serde_json::from_str::<WireMessage>(&text) {
                        let _ = tx.send((peer_id, message));
                    }
                }
            })
        }));
    }

    /// Initiates a connection to `peer_id` as the offering side, exchanging
    /// SDP/ICE through `signaler` and opening the mesh data channel.
    pub async fn connect_as_offerer(
        &mut self,
        peer_id: &str,
        local_id: &str,
        signaler: &Mutex<dyn Signaler>,
    ) -> Result<(), TransportError> {
        let connection = Self::build_connection().await?;
        let channel = connection
            .create_data_channel("mesh", None)
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        self.wire_channel(channel.clone(), peer_id.to_string());

        let offer = connection
            .create_offer(None)
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?;

        signaler
            .lock()
            .await
            .send(SignalPacket {
                from: local_id.to_string(),
                to: peer_id.to_string(),
                body: SignalBody::Offer(offer.sdp),
            })
            .await
            .map_err(TransportError::Backend)?;

        self.links.lock().await.insert(
            peer_id.to_string(),
            PeerLink {
                connection,
                channel,
            },
        );
        Ok(())
    }

    /// Accepts a remote SDP offer as the answering side: applies it, crafts
    /// an answer, and sends that answer back through `signaler`. The data
    /// channel itself arrives asynchronously through webrtc-rs's
    /// `on_data_channel` callback (the offering side created it), so this
    /// registers that callback before setting the remote description and
    /// lets it populate `links` once the channel opens.
    pub async fn connect_as_answerer(
        &mut self,
        peer_id: &str,
        local_id: &str,
        offer_sdp: String,
        signaler: &Mutex<dyn Signaler>,
    ) -> Result<(), TransportError> {
        let connection = Self::build_connection().await?;

        let links = self.links.clone();
        let tx = self.inbound_tx.clone();
        let peer_id_owned = peer_id.to_string();
        let connection_for_link = connection.clone();
        connection.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let links = links.clone();
            let tx = tx.clone();
            let peer_id = peer_id_owned.clone();
            let connection = connection_for_link.clone();
            Box::pin(async move {
                let tx_inner = tx.clone();
                let peer_id_inner = peer_id.clone();
                channel.on_message(Box::new(move |msg: DataChannelMessage| {
                    let tx_inner = tx_inner.clone();
                    let peer_id_inner = peer_id_inner.clone();
                    Box::pin(async move {
                        if let Ok(text) = String::from_utf8(msg.data.to_vec()) {
                            if let Ok(message) = serde_json::from_str::<WireMessage>(&text) {
                                let _ = tx_inner.send((peer_id_inner, message));
                            }
                        }
                    })
                }));
                links
                    .lock()
                    .await
                    .insert(peer_id.clone(), PeerLink { connection, channel });
            })
        }));

        let offer = RTCSessionDescription::offer(offer_sdp)
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        connection
            .set_remote_description(offer)
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?;

        let answer = connection
            .create_answer(None)
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?;

        signaler
            .lock()
            .await
            .send(SignalPacket {
                from: local_id.to_string(),
                to: peer_id.to_string(),
                body: SignalBody::Answer(answer.sdp),
            })
            .await
            .map_err(TransportError::Backend)
    }

    /// Applies a remote SDP answer received through signaling to complete a
    /// connection this mesh offered.
    pub async fn apply_answer(&self, peer_id: &str, sdp: String) -> Result<(), TransportError> {
        let links = self.links.lock().await;
        let link = links
            .get(peer_id)
            .ok_or_else(|| TransportError::UnknownPeer(peer_id.to_string()))?;
        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        link.connection
            .set_remote_description(answer)
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))
    }

    /// Sends a [`WireMessage`] over `peer_id`'s data channel.
    pub async fn send_to(
        &self,
        peer_id: &str,
        message: &WireMessage,
    ) -> Result<(), TransportError> {
        let links = self.links.lock().await;
        let link = links
            .get(peer_id)
            .ok_or_else(|| TransportError::UnknownPeer(peer_id.to_string()))?;
        let text = serde_json::to_string(message)?;
        link.channel
            .send_text(text)
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Best-effort snapshot of connected peer ids. `links` is normally
    /// uncontended; if it's briefly held by the `on_data_channel` callback
    /// wiring up a just-accepted peer, this returns what it already had
    /// rather than blocking the poll loop.
    pub fn peer_ids(&self) -> Vec<String> {
        self.links
            .try_lock()
            .map(|links| links.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove_peer(&mut self, peer_id: &str) {
        if let Ok(mut links) = self.links.try_lock() {
            links.remove(peer_id);
        }
    }
}

impl Default for NativeMesh {
    fn default() -> Self {
        Self::new()
    }
}
