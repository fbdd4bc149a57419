//! The runtime: action dispatch, host-only application, patch broadcast,
//! client patch application, change/patch/event listeners, and lifecycle.
//! Generalizes `backbone-lib`'s `TransportLayer` driving loop (itself
//! generic over `ServerRpcPayload`/`DeltaInformation`/`ViewState`) into one
//! concrete loop over `GameDefinition` + `serde_json::Value` state, with
//! the lobby phase machine folded in as built-in actions rather than a
//! separate per-game concern.

use crate::diff;
use crate::error::RuntimeError;
use crate::game::{ActionContext, GameDefinition, PhaseChangeEvent, SetupContext};
use crate::lobby::{self, LobbySnapshot, RECONCILIATION_INTERVAL_MS};
use crate::logger::Logger;
use crate::rng::{SeededRandom, lcg_step};
use protocol::{
    Action, EventPayload, LobbyPhase, MessageKind, PatchList, PhaseChangeReason, RuntimeConfig,
    StateSyncPayload, TimestampPayload, WireMessage, LOBBY_STATE_KEY,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use transport_core::{PeerEvent, SubscriptionId, Transport};

/// The golden-ratio 32-bit mixing constant used so sequential action
/// counters never produce visibly correlated seeds.
const GOLDEN_RATIO_32: u32 = 0x9E3779B9;

/// How often the host emits a transport-internal heartbeat.
const HEARTBEAT_INTERVAL_MS: u64 = 1_000;

type ChangeListener = Box<dyn FnMut(&Value)>;
type PatchListener = Box<dyn FnMut(&[protocol::Patch])>;
type EventListener = Box<dyn FnMut(&Value)>;

/// The host-authoritative multiplayer game runtime. One instance per peer;
/// owns the authoritative state on the host, a shadow copy on clients.
pub struct Runtime {
    game: GameDefinition,
    transport: Box<dyn Transport>,
    state: Value,
    is_host: bool,
    self_player_id: String,
    base_seed: u32,
    action_counter: u32,
    state_version: u64,
    disposed: bool,
    has_lobby: bool,

    change_listeners: HashMap<u64, ChangeListener>,
    patch_listeners: HashMap<u64, PatchListener>,
    event_listeners: HashMap<String, HashMap<u64, EventListener>>,
    next_sub_id: u64,

    logger: Logger,
    last_heartbeat_ms: u64,
    last_reconciliation_ms: u64,
    /// The clock `tick()` was last called with, reused by `submit_action`
    /// for lobby bookkeeping when it runs between ticks rather than from
    /// inside one.
    current_time_ms: u64,

    inbound_messages: Arc<Mutex<Vec<WireMessage>>>,
    inbound_joins: Arc<Mutex<Vec<PeerEvent>>>,
    inbound_leaves: Arc<Mutex<Vec<PeerEvent>>>,
    message_sub: SubscriptionId,
    join_sub: SubscriptionId,
    leave_sub: SubscriptionId,
}

impl Runtime {
    /// Constructs the runtime: resolves the initial player set, picks or
    /// adopts a base seed, runs `setup()`, injects `__lobby` if configured,
    /// and subscribes to the transport. See spec §4.8 "Construction".
    pub fn new(
        mut game: GameDefinition,
        mut transport: Box<dyn Transport>,
        config: RuntimeConfig,
        now_ms: u64,
    ) -> Result<Self, RuntimeError> {
        let self_player_id = transport.player_id().to_string();
        let is_host = config.is_host;

        let player_ids = if is_host {
            config.player_ids.clone().unwrap_or_else(|| {
                let mut ids = vec![self_player_id.clone()];
                ids.extend(transport.peer_ids());
                ids
            })
        } else {
            let mut ids = vec![self_player_id.clone()];
            ids.extend(transport.peer_ids());
            ids
        };

        // Clients that don't already know the host's seed adopt a
        // placeholder until their first full state_sync replaces it wholesale.
        let base_seed = config.seed.unwrap_or_else(|| {
            if is_host {
                lcg_step(now_ms as u32 ^ 0xA5A5_A5A5)
            } else {
                0
            }
        });

        let mut random = SeededRandom::new(base_seed);
        let mut setup_ctx = SetupContext {
            player_ids: &player_ids,
            random: &mut random,
        };
        let mut state = match &mut game.setup {
            Some(setup) => setup(&mut setup_ctx),
            None => Value::Object(serde_json::Map::new()),
        };

        if state.get(LOBBY_STATE_KEY).is_some() {
            return Err(RuntimeError::ReservedStateKey);
        }

        let has_lobby = if let Some(lobby_config) = game.lobby.clone() {
            let snapshot = LobbySnapshot::new(lobby_config, &player_ids, now_ms);
            snapshot.write(&mut state);
            true
        } else {
            false
        };

        let inbound_messages: Arc<Mutex<Vec<WireMessage>>> = Arc::new(Mutex::new(Vec::new()));
        let inbound_joins: Arc<Mutex<Vec<PeerEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let inbound_leaves: Arc<Mutex<Vec<PeerEvent>>> = Arc::new(Mutex::new(Vec::new()));

        let message_queue = inbound_messages.clone();
        let message_sub = transport.on_message(Box::new(move |message| {
            message_queue
                .lock()
                .expect("inbound message queue poisoned")
                .push(message.clone());
        }));

        let join_queue = inbound_joins.clone();
        let join_sub = transport.on_peer_join(Box::new(move |event| {
            join_queue
                .lock()
                .expect("inbound join queue poisoned")
                .push(event.clone());
        }));

        let leave_queue = inbound_leaves.clone();
        let leave_sub = transport.on_peer_leave(Box::new(move |event| {
            leave_queue
                .lock()
                .expect("inbound leave queue poisoned")
                .push(event.clone());
        }));

        Ok(Runtime {
            game,
            transport,
            state,
            is_host,
            self_player_id,
            base_seed,
            action_counter: 0,
            state_version: 0,
            disposed: false,
            has_lobby,
            change_listeners: HashMap::new(),
            patch_listeners: HashMap::new(),
            event_listeners: HashMap::new(),
            next_sub_id: 0,
            logger: Logger::new("runtime"),
            last_heartbeat_ms: now_ms,
            last_reconciliation_ms: now_ms,
            current_time_ms: now_ms,
            inbound_messages,
            inbound_joins,
            inbound_leaves,
            message_sub,
            join_sub,
            leave_sub,
        })
    }

    /// A read-only reference to the current state.
    pub fn get_state(&self) -> &Value {
        &self.state
    }

    pub fn get_my_player_id(&self) -> &str {
        &self.self_player_id
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_sub_id;
        self.next_sub_id += 1;
        id
    }

    pub fn on_change(&mut self, listener: ChangeListener) -> u64 {
        let id = self.allocate_id();
        self.change_listeners.insert(id, listener);
        id
    }

    pub fn off_change(&mut self, id: u64) {
        self.change_listeners.remove(&id);
    }

    pub fn on_patch(&mut self, listener: PatchListener) -> u64 {
        let id = self.allocate_id();
        self.patch_listeners.insert(id, listener);
        id
    }

    pub fn off_patch(&mut self, id: u64) {
        self.patch_listeners.remove(&id);
    }

    pub fn on_event(&mut self, name: impl Into<String>, listener: EventListener) -> u64 {
        let id = self.allocate_id();
        self.event_listeners
            .entry(name.into())
            .or_default()
            .insert(id, listener);
        id
    }

    pub fn off_event(&mut self, name: &str, id: u64) {
        if let Some(listeners) = self.event_listeners.get_mut(name) {
            listeners.remove(&id);
        }
    }

    /// Derives this action's seed from the runtime's base seed and the
    /// monotonic action counter, then mixes it through one LCG step so
    /// sequential counters don't yield sequential seeds.
    fn alloc_seed(&mut self) -> u32 {
        self.action_counter = self.action_counter.wrapping_add(1);
        let mixed = self.base_seed ^ self.action_counter.wrapping_mul(GOLDEN_RATIO_32);
        lcg_step(mixed)
    }

    /// Submits an action. Hosts apply it immediately and broadcast the
    /// resulting patches; clients forward it to the host and do not
    /// predict locally.
    pub fn submit_action(
        &mut self,
        name: &str,
        input: Value,
        target_id: Option<&str>,
    ) -> Result<(), RuntimeError> {
        if self.disposed {
            return Ok(());
        }
        let action = Action {
            name: name.to_string(),
            input,
            player_id: self.self_player_id.clone(),
            target_id: target_id.unwrap_or(&self.self_player_id).to_string(),
            seed: Some(self.alloc_seed()),
        };

        if self.is_host {
            let now_ms = self.current_time_ms;
            self.apply_action_on_host(&action, now_ms);
        } else {
            let message = WireMessage::new(MessageKind::Action, &action);
            self.transport.send(None, message)?;
        }
        Ok(())
    }

    /// Host-side application: validate, snapshot, apply, diff, broadcast.
    /// Matches spec §4.8 "Host action application" steps 1-7.
    fn apply_action_on_host(&mut self, action: &Action, now_ms: u64) {
        if self.has_lobby && Self::is_builtin_lobby_action(&action.name) {
            self.apply_builtin_lobby_action(action, now_ms);
            return;
        }

        let Some(action_def) = self.game.actions.get_mut(&action.name) else {
            self.logger.warn(
                "unknown action submitted",
                serde_json::json!({"name": action.name}),
            );
            return;
        };

        if let Some(validator) = &action_def.validate_input {
            if !validator(&action.input) {
                self.logger.warn(
                    "action input failed validation",
                    serde_json::json!({"name": action.name}),
                );
                return;
            }
        }

        let snapshot = self.state.clone();
        let seed = action.seed.unwrap_or(0);
        let mut events = Vec::new();
        let apply_fn = &mut action_def.apply;
        let state = &mut self.state;
        let outcome = {
            let mut ctx = ActionContext::new(
                &action.player_id,
                &action.target_id,
                true,
                SeededRandom::new(seed),
                &mut events,
            );
            let input = &action.input;
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                (apply_fn)(state, &mut ctx, input);
            }))
        };

        if let Err(payload) = outcome {
            self.state = snapshot;
            self.logger.error(
                "action apply panicked; state rolled back",
                serde_json::json!({"name": action.name, "message": panic_payload_message(&payload)}),
            );
            return;
        }

        let patches = diff::diff(&snapshot, &self.state);
        self.state_version += 1;
        self.broadcast_patches(patches, action.seed, Some(action.name.clone()));
        self.broadcast_events(&events);
    }

    /// Whether `name` is one of the three built-in lobby actions the runtime
    /// handles itself rather than dispatching to `game.actions`.
    fn is_builtin_lobby_action(name: &str) -> bool {
        matches!(name, "__lobbyReady" | "__lobbyStart" | "__lobbyEnd")
    }

    /// Applies one of the three built-in lobby actions, then diffs and
    /// broadcasts exactly like an ordinary action so presence and phase
    /// changes reach clients over the same `state_sync` path (spec §8.2,
    /// §9). Dispatch is keyed purely on the action name, not on whether it
    /// happened to cause a phase change: a ready-up that doesn't trigger a
    /// start is still a built-in action, not an unknown one.
    fn apply_builtin_lobby_action(&mut self, action: &Action, now_ms: u64) {
        let snapshot = self.state.clone();

        match action.name.as_str() {
            "__lobbyReady" => {
                let ready = action
                    .input
                    .get("ready")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                self.set_player_ready(&action.target_id, ready);
                self.check_and_apply_start_conditions(now_ms);
            }
            // Host-only effective: a client-forwarded __lobbyStart must not
            // be able to force the phase transition (spec §4.9).
            "__lobbyStart" => {
                if action.player_id == self.self_player_id {
                    self.force_phase_transition(
                        LobbyPhase::Playing,
                        PhaseChangeReason::Manual,
                        now_ms,
                    );
                } else {
                    self.logger.warn(
                        "ignored __lobbyStart submitted by a non-host player",
                        serde_json::json!({"player_id": action.player_id}),
                    );
                }
            }
            "__lobbyEnd" => {
                self.force_phase_transition(LobbyPhase::Ended, PhaseChangeReason::Manual, now_ms);
            }
            _ => {}
        }

        let patches = diff::diff(&snapshot, &self.state);
        self.state_version += 1;
        self.broadcast_patches(patches, action.seed, Some(action.name.clone()));
    }

    /// Diffs and broadcasts are shared by ordinary actions, built-in lobby
    /// actions, and host-side presence bookkeeping (peer join/leave,
    /// reconciliation), so every state mutation the host makes reaches
    /// clients the same way.
    fn broadcast_patches(
        &mut self,
        patches: PatchList,
        action_seed: Option<u32>,
        action_name: Option<String>,
    ) {
        if patches.is_empty() {
            return;
        }
        self.notify_patch_listeners(&patches);
        self.notify_change_listeners();

        let payload = StateSyncPayload {
            patches,
            action_seed,
            action_name,
            full_state: None,
            base_seed: None,
        };
        let message = WireMessage::new(MessageKind::StateSync, &payload);
        if let Err(err) = self.transport.send(None, message) {
            self.logger.warn(
                "failed to broadcast state sync",
                serde_json::json!({"error": err.to_string()}),
            );
        }
    }

    /// Sends the host's authoritative state wholesale plus `base_seed`, so
    /// a newly joined client adopts both instead of running with its
    /// placeholder seed (spec §4.8 step 2). Broadcast to everyone rather
    /// than targeted at the joiner — already-synced peers just get a
    /// redundant but harmless resync — mirroring the teacher's own
    /// `server_send_full_sync` on client join.
    fn broadcast_full_sync(&mut self) {
        let payload = StateSyncPayload {
            patches: Vec::new(),
            action_seed: None,
            action_name: None,
            full_state: Some(self.state.clone()),
            base_seed: Some(self.base_seed),
        };
        let message = WireMessage::new(MessageKind::StateSync, &payload);
        if let Err(err) = self.transport.send(None, message) {
            self.logger.warn(
                "failed to broadcast full state sync",
                serde_json::json!({"error": err.to_string()}),
            );
        }
    }

    fn set_player_ready(&mut self, player_id: &str, ready: bool) {
        let Some(mut snapshot) = LobbySnapshot::read(&self.state) else {
            return;
        };
        if let Some(presence) = snapshot.players.get_mut(player_id) {
            presence.ready = ready;
        }
        snapshot.write(&mut self.state);
        if let Some(hook) = &mut self.game.on_player_ready {
            hook(&mut self.state, player_id, ready);
        }
    }

    fn check_and_apply_start_conditions(&mut self, now_ms: u64) -> Option<PhaseChangeReason> {
        let snapshot = LobbySnapshot::read(&self.state)?;
        let reason = lobby::check_start_conditions(&snapshot, now_ms)?;
        self.force_phase_transition(LobbyPhase::Playing, reason, now_ms);
        Some(reason)
    }

    fn force_phase_transition(&mut self, to: LobbyPhase, reason: PhaseChangeReason, now_ms: u64) {
        let Some(mut snapshot) = LobbySnapshot::read(&self.state) else {
            return;
        };
        let from = snapshot.phase;
        if from == to {
            return;
        }
        let should_lock = lobby::transition_phase(&mut snapshot, to, now_ms);
        snapshot.write(&mut self.state);

        if should_lock {
            if let Err(err) = self.transport.lock() {
                self.logger.warn(
                    "failed to lock transport on phase transition",
                    serde_json::json!({"error": err.to_string()}),
                );
            }
        }

        if let Some(hook) = &mut self.game.on_phase_change {
            hook(
                &mut self.state,
                &PhaseChangeEvent {
                    from,
                    to,
                    reason,
                    timestamp: now_ms,
                },
            );
        }
    }

    fn broadcast_events(&mut self, events: &[(String, Value)]) {
        for (name, payload) in events {
            let message = WireMessage::new(
                MessageKind::Event,
                &EventPayload {
                    name: name.clone(),
                    payload: Some(payload.clone()),
                },
            );
            if let Err(err) = self.transport.send(None, message) {
                self.logger.warn(
                    "failed to broadcast event",
                    serde_json::json!({"name": name, "error": err.to_string()}),
                );
            }
            self.dispatch_local_event(name, payload);
        }
    }

    fn dispatch_local_event(&mut self, name: &str, payload: &Value) {
        if let Some(listeners) = self.event_listeners.get_mut(name) {
            for listener in listeners.values_mut() {
                listener(payload);
            }
        }
    }

    fn notify_change_listeners(&mut self) {
        let state = self.state.clone();
        for listener in self.change_listeners.values_mut() {
            listener(&state);
        }
    }

    fn notify_patch_listeners(&mut self, patches: &[protocol::Patch]) {
        for listener in self.patch_listeners.values_mut() {
            listener(patches);
        }
    }

    /// Drains inbound transport traffic and advances host-only timers.
    /// Callers (the embedding adapter) call this once per tick/frame.
    pub fn tick(&mut self, now_ms: u64) {
        if self.disposed {
            return;
        }
        self.current_time_ms = now_ms;
        self.transport.poll();

        let joins: Vec<PeerEvent> = {
            let mut guard = self.inbound_joins.lock().expect("join queue poisoned");
            std::mem::take(&mut *guard)
        };
        for event in joins {
            self.handle_peer_join(&event.player_id, now_ms);
        }

        let leaves: Vec<PeerEvent> = {
            let mut guard = self.inbound_leaves.lock().expect("leave queue poisoned");
            std::mem::take(&mut *guard)
        };
        for event in leaves {
            self.handle_peer_leave(&event.player_id);
        }

        let messages: Vec<WireMessage> = {
            let mut guard = self
                .inbound_messages
                .lock()
                .expect("message queue poisoned");
            std::mem::take(&mut *guard)
        };
        for message in messages {
            self.handle_message(message, now_ms);
        }

        if self.is_host {
            if now_ms.saturating_sub(self.last_heartbeat_ms) >= HEARTBEAT_INTERVAL_MS {
                let message = WireMessage::new(
                    MessageKind::Heartbeat,
                    &TimestampPayload { timestamp: now_ms },
                );
                let _ = self.transport.send(None, message);
                self.last_heartbeat_ms = now_ms;
            }
            if self.has_lobby
                && now_ms.saturating_sub(self.last_reconciliation_ms) >= RECONCILIATION_INTERVAL_MS
            {
                self.reconcile();
                self.last_reconciliation_ms = now_ms;
            }
        }
    }

    fn handle_message(&mut self, message: WireMessage, now_ms: u64) {
        match message.kind {
            MessageKind::Action => {
                if self.is_host {
                    if let Ok(action) = message.decode::<Action>() {
                        self.apply_action_on_host(&action, now_ms);
                    }
                }
            }
            MessageKind::StateSync => {
                if !self.is_host {
                    self.apply_state_sync(message);
                }
            }
            MessageKind::Event => {
                if let Ok(payload) = message.decode::<EventPayload>() {
                    let name = payload.name.clone();
                    let value = payload.payload.unwrap_or(Value::Null);
                    self.dispatch_local_event(&name, &value);
                }
            }
            MessageKind::PlayerJoin
            | MessageKind::PlayerLeave
            | MessageKind::Heartbeat
            | MessageKind::HealthPing
            | MessageKind::HealthPong => {
                // Transport-internal; the runtime receives joins/leaves as
                // peer events, not inbound messages.
            }
        }
    }

    fn apply_state_sync(&mut self, message: WireMessage) {
        let Ok(payload) = message.decode::<StateSyncPayload>() else {
            self.logger.error(
                "received malformed state_sync payload",
                serde_json::json!({}),
            );
            return;
        };

        if let Some(full_state) = payload.full_state {
            self.state = full_state;
            if let Some(base_seed) = payload.base_seed {
                self.base_seed = base_seed;
            }
        } else {
            diff::apply(&mut self.state, &payload.patches, &self.logger);
        }
        self.state_version += 1;
        self.notify_patch_listeners(&payload.patches);
        self.notify_change_listeners();
    }

    fn handle_peer_join(&mut self, player_id: &str, now_ms: u64) {
        if !self.has_lobby {
            if let Some(hook) = &mut self.game.on_player_join {
                hook(&mut self.state, player_id);
            }
            if self.is_host {
                self.broadcast_full_sync();
            }
            return;
        }

        if !self.is_host {
            if let Some(hook) = &mut self.game.on_player_join {
                hook(&mut self.state, player_id);
            }
            return;
        }

        let snapshot = self.state.clone();
        let Some(mut lobby_snapshot) = LobbySnapshot::read(&self.state) else {
            return;
        };
        if lobby::should_reject_join(&lobby_snapshot) {
            self.logger.log(
                "rejected peer join: lobby closed or full",
                serde_json::json!({"player_id": player_id}),
            );
            return;
        }
        lobby_snapshot.players.insert(
            player_id.to_string(),
            protocol::PlayerPresence {
                player_id: player_id.to_string(),
                ready: false,
                joined_at: now_ms,
                metadata: None,
            },
        );
        lobby_snapshot.write(&mut self.state);

        if let Some(hook) = &mut self.game.on_player_join {
            hook(&mut self.state, player_id);
        }
        self.check_and_apply_start_conditions(now_ms);

        let patches = diff::diff(&snapshot, &self.state);
        self.state_version += 1;
        self.broadcast_patches(patches, None, None);
        self.broadcast_full_sync();
    }

    fn handle_peer_leave(&mut self, player_id: &str) {
        let snapshot = self.state.clone();
        let mut mutated = false;
        if self.has_lobby {
            if let Some(mut lobby_snapshot) = LobbySnapshot::read(&self.state) {
                lobby_snapshot.players.remove(player_id);
                lobby_snapshot.write(&mut self.state);
                mutated = true;
            }
        }
        if let Some(hook) = &mut self.game.on_player_leave {
            hook(&mut self.state, player_id);
        }
        if self.is_host && mutated {
            let patches = diff::diff(&snapshot, &self.state);
            self.state_version += 1;
            self.broadcast_patches(patches, None, None);
        }
    }

    /// Host-only periodic sweep: removes declared `__lobby.players` not
    /// present in the transport's observed peer set, backstopping any
    /// missed `peer_leave` event.
    fn reconcile(&mut self) {
        let Some(mut lobby_snapshot) = LobbySnapshot::read(&self.state) else {
            return;
        };
        let observed: std::collections::HashSet<String> = std::iter::once(self.self_player_id.clone())
            .chain(self.transport.peer_ids())
            .collect();
        let stale: Vec<String> = lobby_snapshot
            .players
            .keys()
            .filter(|id| !observed.contains(*id))
            .cloned()
            .collect();
        if stale.is_empty() {
            return;
        }
        let snapshot = self.state.clone();
        for player_id in &stale {
            lobby_snapshot.players.remove(player_id);
        }
        lobby_snapshot.write(&mut self.state);
        for player_id in &stale {
            self.logger.log(
                "reconciliation removed stale lobby player",
                serde_json::json!({"player_id": player_id}),
            );
            if let Some(hook) = &mut self.game.on_player_leave {
                hook(&mut self.state, player_id);
            }
        }

        let patches = diff::diff(&snapshot, &self.state);
        self.state_version += 1;
        self.broadcast_patches(patches, None, None);
    }

    /// Unsubscribes from transport, clears all listener storage, and marks
    /// this runtime disposed so any message already in flight is ignored.
    pub fn destroy(&mut self) {
        if self.disposed {
            return;
        }
        self.transport.off_message(self.message_sub);
        self.transport.off_peer_join(self.join_sub);
        self.transport.off_peer_leave(self.leave_sub);
        self.change_listeners.clear();
        self.patch_listeners.clear();
        self.event_listeners.clear();
        self.disposed = true;
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Extracts a human-readable message from a caught panic payload, for the
/// `ActionApplyThrew` log line. Panics carry either a `&str` or `String`
/// payload in the overwhelming majority of cases; anything else falls back
/// to a generic label rather than failing to report at all.
fn panic_payload_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "action apply panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ActionDef;
    use protocol::LobbyConfig;
    use serde_json::json;
    use transport_inprocess::InProcessTransport;

    fn counter_game() -> GameDefinition {
        GameDefinition::new()
            .with_setup(|_ctx| json!({"counter": 0}))
            .with_action(
                "increment",
                ActionDef::new(|state, _ctx, _input| {
                    let current = state["counter"].as_i64().unwrap_or(0);
                    state["counter"] = json!(current + 1);
                }),
            )
    }

    #[test]
    fn host_applies_action_and_updates_state_version() {
        let transport = InProcessTransport::join("room-x", "host", true).unwrap();
        let mut runtime = Runtime::new(
            counter_game(),
            Box::new(transport),
            RuntimeConfig {
                is_host: true,
                player_ids: Some(vec!["host".into()]),
                seed: Some(1),
                sync_rate_ms: 50,
            },
            0,
        )
        .unwrap();

        runtime.submit_action("increment", Value::Null, None).unwrap();
        assert_eq!(runtime.get_state()["counter"], json!(1));
        assert_eq!(runtime.state_version, 1);
    }

    #[test]
    fn action_panic_rolls_back_state_and_does_not_broadcast() {
        let transport = InProcessTransport::join("room-panic", "host", true).unwrap();
        let game = counter_game().with_action(
            "explode",
            ActionDef::new(|_state, _ctx, _input| {
                panic!("deliberate failure in action body");
            }),
        );
        let previous_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));
        let mut runtime = Runtime::new(
            game,
            Box::new(transport),
            RuntimeConfig {
                is_host: true,
                player_ids: Some(vec!["host".into()]),
                seed: Some(1),
                sync_rate_ms: 50,
            },
            0,
        )
        .unwrap();

        runtime.submit_action("explode", Value::Null, None).unwrap();
        std::panic::set_hook(previous_hook);

        assert_eq!(runtime.get_state()["counter"], json!(0));
        assert_eq!(runtime.state_version, 0);
    }

    #[test]
    fn unknown_action_is_ignored_not_fatal() {
        let transport = InProcessTransport::join("room-y", "host", true).unwrap();
        let mut runtime = Runtime::new(
            counter_game(),
            Box::new(transport),
            RuntimeConfig {
                is_host: true,
                player_ids: Some(vec!["host".into()]),
                seed: Some(1),
                sync_rate_ms: 50,
            },
            0,
        )
        .unwrap();
        runtime.submit_action("does-not-exist", Value::Null, None).unwrap();
        assert_eq!(runtime.get_state()["counter"], json!(0));
    }

    #[test]
    fn reserved_lobby_key_in_author_state_fails_construction() {
        let transport = InProcessTransport::join("room-z", "host", true).unwrap();
        let game = GameDefinition::new()
            .with_setup(|_ctx| json!({"__lobby": {"myField": 1}}))
            .with_lobby(LobbyConfig {
                min_players: 2,
                max_players: None,
                require_all_ready: false,
                auto_start_timeout_ms: None,
                allow_late_join: true,
                ready_timeout_ms: None,
            });
        let result = Runtime::new(
            game,
            Box::new(transport),
            RuntimeConfig {
                is_host: true,
                player_ids: Some(vec!["host".into()]),
                seed: Some(1),
                sync_rate_ms: 50,
            },
            0,
        );
        assert!(matches!(result, Err(RuntimeError::ReservedStateKey)));
    }

    #[test]
    fn lobby_auto_starts_once_both_peers_ready() {
        let transport = InProcessTransport::join("room-lobby", "host", true).unwrap();
        let game = GameDefinition::new().with_setup(|_ctx| json!({})).with_lobby(
            LobbyConfig {
                min_players: 1,
                max_players: None,
                require_all_ready: true,
                auto_start_timeout_ms: None,
                allow_late_join: true,
                ready_timeout_ms: None,
            },
        );
        let mut runtime = Runtime::new(
            game,
            Box::new(transport),
            RuntimeConfig {
                is_host: true,
                player_ids: Some(vec!["host".into()]),
                seed: Some(1),
                sync_rate_ms: 50,
            },
            0,
        )
        .unwrap();

        runtime
            .submit_action("__lobbyReady", json!({"ready": true}), None)
            .unwrap();

        let snapshot = LobbySnapshot::read(runtime.get_state()).unwrap();
        assert_eq!(snapshot.phase, LobbyPhase::Playing);
    }

    fn two_player_lobby_config() -> LobbyConfig {
        LobbyConfig {
            min_players: 2,
            max_players: None,
            require_all_ready: true,
            auto_start_timeout_ms: None,
            allow_late_join: true,
            ready_timeout_ms: None,
        }
    }

    #[test]
    fn joining_client_adopts_hosts_base_seed_via_full_sync() {
        let host_transport = InProcessTransport::join("room-seed-sync", "host", true).unwrap();
        let mut host = Runtime::new(
            GameDefinition::new().with_setup(|_ctx| json!({})),
            Box::new(host_transport),
            RuntimeConfig {
                is_host: true,
                player_ids: Some(vec!["host".into()]),
                seed: Some(777),
                sync_rate_ms: 50,
            },
            0,
        )
        .unwrap();

        let client_transport = InProcessTransport::join("room-seed-sync", "client", false).unwrap();
        let mut client = Runtime::new(
            GameDefinition::new().with_setup(|_ctx| json!({})),
            Box::new(client_transport),
            RuntimeConfig {
                is_host: false,
                player_ids: None,
                seed: None,
                sync_rate_ms: 50,
            },
            0,
        )
        .unwrap();

        host.tick(10);
        client.tick(10);

        assert_eq!(client.base_seed, host.base_seed);
    }

    #[test]
    fn lobby_ready_up_broadcasts_to_clients_without_starting() {
        let host_transport = InProcessTransport::join("room-ready-sync", "host", true).unwrap();
        let mut host = Runtime::new(
            GameDefinition::new()
                .with_setup(|_ctx| json!({}))
                .with_lobby(two_player_lobby_config()),
            Box::new(host_transport),
            RuntimeConfig {
                is_host: true,
                player_ids: Some(vec!["host".into()]),
                seed: Some(1),
                sync_rate_ms: 50,
            },
            0,
        )
        .unwrap();

        let client_transport = InProcessTransport::join("room-ready-sync", "client", false).unwrap();
        let mut client = Runtime::new(
            GameDefinition::new().with_setup(|_ctx| json!({})),
            Box::new(client_transport),
            RuntimeConfig {
                is_host: false,
                player_ids: None,
                seed: None,
                sync_rate_ms: 50,
            },
            0,
        )
        .unwrap();

        // Drain the peer-join traffic (lobby presence insert + full sync).
        host.tick(10);
        client.tick(10);

        client
            .submit_action("__lobbyReady", json!({"ready": true}), None)
            .unwrap();
        host.tick(20);
        client.tick(20);

        let client_snapshot = LobbySnapshot::read(client.get_state()).unwrap();
        assert_eq!(client_snapshot.phase, LobbyPhase::Lobby);
        assert!(client_snapshot.players.get("client").unwrap().ready);
    }

    #[test]
    fn client_forwarded_lobby_start_is_ignored() {
        let host_transport = InProcessTransport::join("room-start-guard", "host", true).unwrap();
        let mut host = Runtime::new(
            GameDefinition::new()
                .with_setup(|_ctx| json!({}))
                .with_lobby(two_player_lobby_config()),
            Box::new(host_transport),
            RuntimeConfig {
                is_host: true,
                player_ids: Some(vec!["host".into()]),
                seed: Some(1),
                sync_rate_ms: 50,
            },
            0,
        )
        .unwrap();

        let client_transport = InProcessTransport::join("room-start-guard", "client", false).unwrap();
        let mut client = Runtime::new(
            GameDefinition::new().with_setup(|_ctx| json!({})),
            Box::new(client_transport),
            RuntimeConfig {
                is_host: false,
                player_ids: None,
                seed: None,
                sync_rate_ms: 50,
            },
            0,
        )
        .unwrap();

        host.tick(10);
        client.tick(10);

        client
            .submit_action("__lobbyStart", Value::Null, None)
            .unwrap();
        host.tick(20);
        client.tick(20);

        let snapshot = LobbySnapshot::read(host.get_state()).unwrap();
        assert_eq!(snapshot.phase, LobbyPhase::Lobby);
    }

    #[test]
    fn host_broadcasts_presence_update_on_peer_leave() {
        let host_transport = InProcessTransport::join("room-leave-sync", "host", true).unwrap();
        let mut host = Runtime::new(
            GameDefinition::new()
                .with_setup(|_ctx| json!({}))
                .with_lobby(two_player_lobby_config()),
            Box::new(host_transport),
            RuntimeConfig {
                is_host: true,
                player_ids: Some(vec!["host".into()]),
                seed: Some(1),
                sync_rate_ms: 50,
            },
            0,
        )
        .unwrap();

        let client_transport = InProcessTransport::join("room-leave-sync", "client", false).unwrap();
        let mut client = Runtime::new(
            GameDefinition::new().with_setup(|_ctx| json!({})),
            Box::new(client_transport),
            RuntimeConfig {
                is_host: false,
                player_ids: None,
                seed: None,
                sync_rate_ms: 50,
            },
            0,
        )
        .unwrap();

        host.tick(10);
        client.tick(10);
        assert!(
            LobbySnapshot::read(host.get_state())
                .unwrap()
                .players
                .contains_key("client")
        );

        drop(client);
        host.tick(20);

        assert!(
            !LobbySnapshot::read(host.get_state())
                .unwrap()
                .players
                .contains_key("client")
        );
    }
}
