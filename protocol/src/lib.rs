//! The wire types shared by the runtime and every transport implementation.
//! They will be used consistently across host, client and relay.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved top-level state key the lobby subsystem injects. Author state
/// must never use this key.
pub const LOBBY_STATE_KEY: &str = "__lobby";

/// Default synchronization rate assumed by batching transports, in
/// milliseconds, used when [`RuntimeConfig::sync_rate_ms`] is unset.
pub const DEFAULT_SYNC_RATE_MS: u32 = 50;

/// A single structural edit to a state tree.
///
/// `path` is an ordered sequence of keys rooting at the state: object keys
/// are literal strings, array indices are their decimal string form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub op: PatchOp,
    pub path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// The kind of structural edit a [`Patch`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOp {
    Replace,
    Add,
    Remove,
}

/// An ordered batch of patches, applied left to right.
pub type PatchList = Vec<Patch>;

/// A request to mutate state, submitted by a peer and, once seeded, applied
/// only on the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(default)]
    pub input: Value,
    pub player_id: String,
    pub target_id: String,
    /// Chosen by the host at apply time, absent on the client->host hop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
}

/// One player's presence record, stored at `state.__lobby.players[playerId]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerPresence {
    pub player_id: String,
    pub ready: bool,
    pub joined_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// The lobby's phase. Transitions follow `Lobby -> Playing -> Ended` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyPhase {
    Lobby,
    Playing,
    Ended,
}

/// Declared lobby configuration, snapshotted into `state.__lobby.config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyConfig {
    pub min_players: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_players: Option<u32>,
    #[serde(default)]
    pub require_all_ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_start_timeout_ms: Option<u64>,
    #[serde(default = "default_allow_late_join")]
    pub allow_late_join: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_timeout_ms: Option<u64>,
}

fn default_allow_late_join() -> bool {
    true
}

/// Reason a phase transition happened, surfaced to the lobby's phase-change
/// listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseChangeReason {
    Manual,
    AllReady,
    Timeout,
}

/// Runtime construction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub is_host: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
    #[serde(default = "default_sync_rate_ms")]
    pub sync_rate_ms: u32,
}

fn default_sync_rate_ms() -> u32 {
    DEFAULT_SYNC_RATE_MS
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            is_host: false,
            player_ids: None,
            seed: None,
            sync_rate_ms: DEFAULT_SYNC_RATE_MS,
        }
    }
}

/// The payload carried by a [`WireMessage`] of kind [`MessageKind::StateSync`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSyncPayload {
    pub patches: PatchList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_seed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_name: Option<String>,
    /// Full state snapshot. Populated for the first sync a client receives
    /// so it can adopt `base_seed` and the current world without replaying
    /// every prior patch, empty for ordinary incremental syncs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_seed: Option<u32>,
}

/// The payload carried by a [`WireMessage`] of kind [`MessageKind::Event`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// The payload carried by a [`WireMessage`] of kind [`MessageKind::PlayerJoin`]
/// or [`MessageKind::PlayerLeave`]. Transports that relay these as ordinary
/// messages (in-process registry, bridge) decode this to build the
/// [`PeerEvent`](../transport_core/struct.PeerEvent.html) they hand to the
/// runtime's `on_peer_join`/`on_peer_leave` listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerIdPayload {
    pub player_id: String,
}

/// Heartbeat / liveness payload, transport-internal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimestampPayload {
    pub timestamp: u64,
}

/// The category of a [`WireMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    StateSync,
    Action,
    PlayerJoin,
    PlayerLeave,
    Event,
    Heartbeat,
    HealthPing,
    HealthPong,
}

/// Every message exchanged between peers carries this envelope. `payload` is
/// left as a generic JSON value; call sites decode it against the shape
/// implied by `kind` ([`Action`], [`StateSyncPayload`], [`EventPayload`], or
/// [`TimestampPayload`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl WireMessage {
    /// Builds a message of the given kind with a JSON-serializable payload.
    pub fn new<T: Serialize>(kind: MessageKind, payload: &T) -> Self {
        WireMessage {
            kind,
            payload: serde_json::to_value(payload).ok(),
            sender_id: None,
            timestamp: None,
        }
    }

    /// Decodes `payload` as `T`, failing if absent or shaped wrong.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        match &self.payload {
            Some(value) => serde_json::from_value(value.clone()),
            None => serde_json::from_value(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_message_round_trips_action_payload() {
        let action = Action {
            name: "move".into(),
            input: serde_json::json!({"x": 1}),
            player_id: "p1".into(),
            target_id: "p1".into(),
            seed: Some(42),
        };
        let msg = WireMessage::new(MessageKind::Action, &action);
        let decoded: Action = msg.decode().unwrap();
        assert_eq!(decoded.name, "move");
        assert_eq!(decoded.seed, Some(42));
    }

    #[test]
    fn lobby_config_defaults_allow_late_join() {
        let json = r#"{"min_players": 2}"#;
        let cfg: LobbyConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.allow_late_join);
        assert!(!cfg.require_all_ready);
    }
}
