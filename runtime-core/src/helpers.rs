//! Small generators games reach for repeatedly instead of hand-rolling:
//! a player-manager for presence bookkeeping outside the lobby, an
//! input-store action that just records the latest input per target, a
//! tick action for host-only per-frame logic, and an iterator over players
//! with a pending input. None of these are required by [`crate::Runtime`]
//! itself — they're convenience constructors over [`crate::game::ActionDef`]
//! and plain `Value` state, grounded on the teacher's per-game action
//! modules (`games::tic_tac_toe::actions`) generalized away from any one
//! game's state shape.

use crate::game::ActionDef;
use serde_json::{Map, Value};

/// Where a player-manager stores one player's record, keyed by player id
/// under an author-chosen top-level state key.
pub struct PlayerManagerConfig {
    pub state_key: String,
    pub roles: Vec<String>,
    pub spawn_points: Vec<Value>,
    pub bounds: Option<Value>,
    pub factory: Option<Box<dyn Fn(&str, usize) -> Value>>,
}

impl PlayerManagerConfig {
    pub fn new(state_key: impl Into<String>) -> Self {
        PlayerManagerConfig {
            state_key: state_key.into(),
            roles: Vec::new(),
            spawn_points: Vec::new(),
            bounds: None,
            factory: None,
        }
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_spawn_points(mut self, spawn_points: Vec<Value>) -> Self {
        self.spawn_points = spawn_points;
        self
    }

    pub fn with_bounds(mut self, bounds: Value) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_factory(mut self, factory: impl Fn(&str, usize) -> Value + 'static) -> Self {
        self.factory = Some(Box::new(factory));
        self
    }

    fn build_record(&self, player_id: &str, index: usize) -> Value {
        if let Some(factory) = &self.factory {
            return factory(player_id, index);
        }
        let mut record = Map::new();
        record.insert("playerId".into(), Value::String(player_id.to_string()));
        if let Some(role) = self.roles.get(index % self.roles.len().max(1)) {
            record.insert("role".into(), Value::String(role.clone()));
        }
        if let Some(spawn) = self.spawn_points.get(index % self.spawn_points.len().max(1)) {
            record.insert("spawn".into(), spawn.clone());
        }
        Value::Object(record)
    }
}

/// Presence bookkeeping for a `state[stateKey][playerId]` map, independent
/// of the `__lobby` subsystem. Useful for games that track per-player
/// records (score, role, spawn point) outside of lobby presence.
pub struct PlayerManager {
    config: PlayerManagerConfig,
}

impl PlayerManager {
    pub fn new(config: PlayerManagerConfig) -> Self {
        PlayerManager { config }
    }

    /// Populates `state[stateKey]` with one record per id in `player_ids`,
    /// assigning roles/spawn points round-robin by index. Intended to run
    /// inside `setup()`.
    pub fn initialize(&self, state: &mut Value, player_ids: &[String]) {
        let mut map = Map::new();
        for (index, player_id) in player_ids.iter().enumerate() {
            map.insert(player_id.clone(), self.config.build_record(player_id, index));
        }
        if let Value::Object(root) = state {
            root.insert(self.config.state_key.clone(), Value::Object(map));
        }
        if let Some(bounds) = &self.config.bounds {
            if let Value::Object(root) = state {
                root.insert(format!("{}Bounds", self.config.state_key), bounds.clone());
            }
        }
    }

    /// Adds a record for a newly joined player, intended for
    /// `on_player_join`.
    pub fn handle_join(&self, state: &mut Value, player_id: &str) {
        let index = self.player_count(state);
        let record = self.config.build_record(player_id, index);
        if let Some(Value::Object(map)) = state.get_mut(&self.config.state_key) {
            map.insert(player_id.to_string(), record);
        }
    }

    /// Removes a departed player's record, intended for `on_player_leave`.
    pub fn handle_leave(&self, state: &mut Value, player_id: &str) {
        if let Some(Value::Object(map)) = state.get_mut(&self.config.state_key) {
            map.remove(player_id);
        }
    }

    fn player_count(&self, state: &Value) -> usize {
        state
            .get(&self.config.state_key)
            .and_then(Value::as_object)
            .map(Map::len)
            .unwrap_or(0)
    }
}

/// Builds an [`ActionDef`] whose `apply` writes `state[key][targetId] =
/// input` verbatim — the common shape for "record the latest input for a
/// target and let per-tick logic read it back".
pub fn input_store_action(key: impl Into<String>) -> ActionDef {
    let key = key.into();
    ActionDef::new(move |state, ctx, input| {
        if !state.get(&key).map(Value::is_object).unwrap_or(false) {
            if let Value::Object(root) = state {
                root.insert(key.clone(), Value::Object(Map::new()));
            }
        }
        if let Some(Value::Object(map)) = state.get_mut(&key) {
            map.insert(ctx.target_id.to_string(), input.clone());
        }
    })
}

/// Builds an [`ActionDef`] for a host-only per-frame tick. `body` receives
/// `(state, delta_ms, ctx)`; the runtime already guarantees actions only
/// apply on the host, but `is_host` is threaded through anyway so the body
/// can assert its own invariant independent of that guarantee.
pub fn tick_action(
    mut body: impl FnMut(&mut Value, f64, &mut crate::game::ActionContext) + 'static,
) -> ActionDef {
    ActionDef::new(move |state, ctx, input| {
        if !ctx.is_host {
            return;
        }
        let delta = input.get("delta").and_then(Value::as_f64).unwrap_or(0.0);
        body(state, delta, ctx);
    })
}

/// Iterates over every player id present in `state[inputKey]` whose
/// recorded input is a non-null, non-empty value — the generalized
/// replacement for per-game "for each player with a queued move" loops.
pub fn players_with_pending_input<'a>(
    state: &'a Value,
    input_key: &str,
) -> impl Iterator<Item = (&'a str, &'a Value)> {
    state
        .get(input_key)
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|map| map.iter())
        .filter(|(_, value)| !is_empty_input(value))
        .map(|(id, value)| (id.as_str(), value))
}

fn is_empty_input(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ActionContext;
    use crate::rng::SeededRandom;
    use serde_json::json;

    #[test]
    fn player_manager_initializes_round_robin_roles() {
        let config = PlayerManagerConfig::new("players")
            .with_roles(vec!["x".into(), "o".into()]);
        let manager = PlayerManager::new(config);
        let mut state = json!({});
        manager.initialize(&mut state, &["p1".into(), "p2".into(), "p3".into()]);

        assert_eq!(state["players"]["p1"]["role"], json!("x"));
        assert_eq!(state["players"]["p2"]["role"], json!("o"));
        assert_eq!(state["players"]["p3"]["role"], json!("x"));
    }

    #[test]
    fn player_manager_handles_join_and_leave() {
        let manager = PlayerManager::new(PlayerManagerConfig::new("players"));
        let mut state = json!({"players": {}});
        manager.handle_join(&mut state, "p1");
        assert!(state["players"].get("p1").is_some());
        manager.handle_leave(&mut state, "p1");
        assert!(state["players"].get("p1").is_none());
    }

    #[test]
    fn input_store_action_writes_target_keyed_input() {
        let mut action = input_store_action("inputs");
        let mut state = json!({});
        let mut events = Vec::new();
        let mut ctx = ActionContext::new("p1", "p1", false, SeededRandom::new(1), &mut events);
        (action.apply)(&mut state, &mut ctx, &json!({"move": "up"}));
        assert_eq!(state["inputs"]["p1"], json!({"move": "up"}));
    }

    #[test]
    fn tick_action_only_runs_on_host() {
        let mut ticked = Vec::new();
        let mut action = tick_action(move |state, delta, _ctx| {
            let current = state["elapsed"].as_f64().unwrap_or(0.0);
            state["elapsed"] = json!(current + delta);
        });
        let mut state = json!({"elapsed": 0.0});
        let mut events = Vec::new();

        let mut client_ctx =
            ActionContext::new("p1", "p1", false, SeededRandom::new(1), &mut events);
        (action.apply)(&mut state, &mut client_ctx, &json!({"delta": 16.0}));
        assert_eq!(state["elapsed"], json!(0.0));

        let mut host_events = Vec::new();
        let mut host_ctx =
            ActionContext::new("p1", "p1", true, SeededRandom::new(1), &mut host_events);
        (action.apply)(&mut state, &mut host_ctx, &json!({"delta": 16.0}));
        assert_eq!(state["elapsed"], json!(16.0));
        ticked.push(());
        assert_eq!(ticked.len(), 1);
    }

    #[test]
    fn players_with_pending_input_skips_empty_slots() {
        let state = json!({"inputs": {"p1": {"move": "up"}, "p2": null, "p3": {}}});
        let pending: Vec<&str> = players_with_pending_input(&state, "inputs")
            .map(|(id, _)| id)
            .collect();
        assert_eq!(pending, vec!["p1"]);
    }
}
