//! The wasm mesh backend, built directly on the browser's `RTCPeerConnection`
//! via `web-sys`, mirroring the native backend's shape (one data channel per
//! peer, JSON text frames) but through the browser's own APIs instead of a
//! Rust WebRTC stack.

use crate::signaling::{SignalBody, SignalPacket, Signaler};
use protocol::WireMessage;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tokio::sync::mpsc;
use transport_core::TransportError;
use wasm_bindgen::JsCast;
use wasm_bindgen::closure::Closure;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    MessageEvent, RtcConfiguration, RtcDataChannel, RtcDataChannelEvent, RtcIceServer,
    RtcPeerConnection, RtcSdpType, RtcSessionDescriptionInit,
};

struct PeerLink {
    #[allow(dead_code)]
    connection: RtcPeerConnection,
    channel: RtcDataChannel,
}

/// The browser-backed WebRTC mesh. Not `Send` (wasm is single-threaded),
/// so this lives behind `Rc<RefCell<_>>` rather than the `Arc<Mutex<_>>`
/// the native backend uses. `links` itself is also behind an `Rc<RefCell<_>>`
/// since the answerer side learns its data channel through `ondatachannel`,
/// a callback that can't hold `&mut self`.
pub struct WasmMesh {
    links: Rc<RefCell<HashMap<String, PeerLink>>>,
    inbound_tx: mpsc::UnboundedSender<(String, WireMessage)>,
    pub inbound_rx: mpsc::UnboundedReceiver<(String, WireMessage)>,
    _listeners: Vec<Closure<dyn FnMut(MessageEvent)>>,
    _data_channel_listeners: Vec<Closure<dyn FnMut(RtcDataChannelEvent)>>,
}

impl WasmMesh {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        WasmMesh {
            links: Rc::new(RefCell::new(HashMap::new())),
            inbound_tx,
            inbound_rx,
            _listeners: Vec::new(),
            _data_channel_listeners: Vec::new(),
        }
    }

    fn build_connection() -> Result<RtcPeerConnection, TransportError> {
        let mut config = RtcConfiguration::new();
        let ice_server = RtcIceServer::new();
        ice_server.set_urls(&wasm_bindgen::JsValue::from_str(
            "stun:stun.l.google.com:19302",
        ));
        let servers = js_sys::Array::new();
        servers.push(&ice_server);
        config.set_ice_servers(&servers);
        RtcPeerConnection::new_with_configuration(&config)
            .map_err(|e| TransportError::Backend(format!("{e:?}")))
    }

    fn wire_channel(&mut self, channel: &RtcDataChannel, peer_id: String) {
        let tx = self.inbound_tx.clone();
        let closure = Closure::wrap(Box::new(move |event: MessageEvent| {
            if let Some(text) = event.data().as_string() {
                if let Ok(message) = serde_json::from_str::<WireMessage>(&text) {
                    let _ = tx.send((peer_id.clone(), message));
                }
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        channel.set_onmessage(Some(closure.as_ref().unchecked_ref()));
        self._listeners.push(closure);
    }

    /// Initiates a connection to `peer_id`, exchanging SDP/ICE through
    /// `signaler` and opening the mesh data channel.
    pub async fn connect_as_offerer(
        &mut self,
        peer_id: &str,
        local_id: &str,
        signaler: Rc<RefCell<dyn Signaler>>,
    ) -> Result<(), TransportError> {
        let connection = Self::build_connection()?;
        let channel = connection.create_data_channel("mesh");
        self.wire_channel(&channel, peer_id.to_string());

        let offer = JsFuture::from(connection.create_offer())
            .await
            .map_err(|e| TransportError::Backend(format!("{e:?}")))?;
        let offer_init: RtcSessionDescriptionInit = offer.unchecked_into();
        JsFuture::from(connection.set_local_description(&offer_init))
            .await
            .map_err(|e| TransportError::Backend(format!("{e:?}")))?;

        let sdp = connection
            .local_description()
            .map(|d| d.sdp())
            .unwrap_or_default();

        signaler
            .borrow_mut()
            .send(SignalPacket {
                from: local_id.to_string(),
                to: peer_id.to_string(),
                body: SignalBody::Offer(sdp),
            })
            .await
            .map_err(TransportError::Backend)?;

        self.links.borrow_mut().insert(
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
    /// channel itself arrives through the connection's `ondatachannel`
    /// event (the offering side created it), so that listener is wired
    /// before the remote description is set.
    pub async fn connect_as_answerer(
        &mut self,
        peer_id: &str,
        local_id: &str,
        offer_sdp: String,
        signaler: Rc<RefCell<dyn Signaler>>,
    ) -> Result<(), TransportError> {
        let connection = Self::build_connection()?;

        let links = self.links.clone();
        let tx = self.inbound_tx.clone();
        let peer_id_owned = peer_id.to_string();
        let connection_for_link = connection.clone();
        let on_data_channel = Closure::wrap(Box::new(move |event: RtcDataChannelEvent| {
            let channel = event.channel();
            let tx = tx.clone();
            let peer_id = peer_id_owned.clone();
            let closure = Closure::wrap(Box::new(move |event: MessageEvent| {
                if let Some(text) = event.data().as_string() {
                    if let Ok(message) = serde_json::from_str::<WireMessage>(&text) {
                        let _ = tx.send((peer_id.clone(), message));
                    }
                }
            }) as Box<dyn FnMut(MessageEvent)>);
            channel.set_onmessage(Some(closure.as_ref().unchecked_ref()));
            closure.forget();
            links.borrow_mut().insert(
                peer_id_owned.clone(),
                PeerLink {
                    connection: connection_for_link.clone(),
                    channel,
                },
            );
        }) as Box<dyn FnMut(RtcDataChannelEvent)>);
        connection.set_ondatachannel(Some(on_data_channel.as_ref().unchecked_ref()));
        self._data_channel_listeners.push(on_data_channel);

        let mut offer_init = RtcSessionDescriptionInit::new(RtcSdpType::Offer);
        offer_init.set_sdp(&offer_sdp);
        JsFuture::from(connection.set_remote_description(&offer_init))
            .await
            .map_err(|e| TransportError::Backend(format!("{e:?}")))?;

        let answer = JsFuture::from(connection.create_answer())
            .await
            .map_err(|e| TransportError::Backend(format!("{e:?}")))?;
        let answer_init: RtcSessionDescriptionInit = answer.unchecked_into();
        JsFuture::from(connection.set_local_description(&answer_init))
            .await
            .map_err(|e| TransportError::Backend(format!("{e:?}")))?;

        let sdp = connection
            .local_description()
            .map(|d| d.sdp())
            .unwrap_or_default();

        signaler
            .borrow_mut()
            .send(SignalPacket {
                from: local_id.to_string(),
                to: peer_id.to_string(),
                body: SignalBody::Answer(sdp),
            })
            .await
            .map_err(TransportError::Backend)
    }

    /// Applies a remote SDP answer received through signaling.
    pub async fn apply_answer(&self, peer_id: &str, sdp: String) -> Result<(), TransportError> {
        let links = self.links.borrow();
        let link = links
            .get(peer_id)
            .ok_or_else(|| TransportError::UnknownPeer(peer_id.to_string()))?;
        let mut init = RtcSessionDescriptionInit::new(RtcSdpType::Answer);
        init.set_sdp(&sdp);
        JsFuture::from(link.connection.set_remote_description(&init))
            .await
            .map_err(|e| TransportError::Backend(format!("{e:?}")))?;
        Ok(())
    }

    /// Sends a [`WireMessage`] over `peer_id`'s data channel.
    pub fn send_to(&self, peer_id: &str, message: &WireMessage) -> Result<(), TransportError> {
        let links = self.links.borrow();
        let link = links
            .get(peer_id)
            .ok_or_else(|| TransportError::UnknownPeer(peer_id.to_string()))?;
        let text = serde_json::to_string(message)?;
        link.channel
            .send_with_str(&text)
            .map_err(|e| TransportError::Backend(format!("{e:?}")))
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.links.borrow().keys().cloned().collect()
    }

    pub fn remove_peer(&mut self, peer_id: &str) {
        self.links.borrow_mut().remove(peer_id);
    }
}

impl Default for WasmMesh {
    fn default() -> Self {
        Self::new()
    }
}

// Safety valve for the shared `Transport` trait bound (`Send`): wasm is
// single-threaded, so there is no actual cross-thread sharing happening.
// This mirrors the same unsafe impl the teacher's wasm FFI layer relies on
// implicitly by never spawning off-thread.
unsafe impl Send for WasmMesh {}
