//! The declarative shape an author writes instead of networking code: a
//! `setup()` function, a map of named actions, and lifecycle hooks. This is
//! the generalized replacement for the teacher's `BackEndArchitecture`
//! trait — where that trait was implemented once per game and bound to a
//! fixed `ViewState`/`DeltaInformation`/`ServerRpcPayload` triple, a
//! `GameDefinition` is plain data the same `Runtime` interprets for any
//! game, and state is always a `serde_json::Value` tree rather than a
//! per-game Rust type.

use crate::rng::SeededRandom;
use protocol::LobbyConfig;
use serde_json::Value;
use std::collections::HashMap;

/// Inputs available to `setup()`.
pub struct SetupContext<'a> {
    pub player_ids: &'a [String],
    pub random: &'a mut SeededRandom,
}

/// Inputs available to an action's `apply`, the generalized replacement
/// for `BackEndArchitecture`'s per-call `player`/`payload` arguments.
pub struct ActionContext<'a> {
    pub player_id: &'a str,
    pub target_id: &'a str,
    pub is_host: bool,
    pub random: SeededRandom,
    events: &'a mut Vec<(String, Value)>,
}

impl<'a> ActionContext<'a> {
    pub(crate) fn new(
        player_id: &'a str,
        target_id: &'a str,
        is_host: bool,
        random: SeededRandom,
        events: &'a mut Vec<(String, Value)>,
    ) -> Self {
        ActionContext {
            player_id,
            target_id,
            is_host,
            random,
            events,
        }
    }

    /// Queues a side-channel event fan-out to every peer. Events do not
    /// affect state and are delivered at-most-once per peer, the
    /// generalized replacement for `BackendCommand::Delta`.
    pub fn emit(&mut self, name: impl Into<String>, payload: Value) {
        self.events.push((name.into(), payload));
    }
}

/// One named action: an optional input validator plus the mutation it
/// performs. `apply` mutates state in place; the runtime snapshots before
/// and after and diffs, so action bodies never construct patches
/// themselves.
pub struct ActionDef {
    pub validate_input: Option<Box<dyn Fn(&Value) -> bool>>,
    pub apply: Box<dyn FnMut(&mut Value, &mut ActionContext, &Value)>,
}

impl ActionDef {
    pub fn new(apply: impl FnMut(&mut Value, &mut ActionContext, &Value) + 'static) -> Self {
        ActionDef {
            validate_input: None,
            apply: Box::new(apply),
        }
    }

    pub fn with_validator(
        mut self,
        validate_input: impl Fn(&Value) -> bool + 'static,
    ) -> Self {
        self.validate_input = Some(Box::new(validate_input));
        self
    }
}

/// Reason and timestamp passed to `on_phase_change`, matching
/// `protocol::PhaseChangeReason` plus the `from`/`to` phases.
pub struct PhaseChangeEvent {
    pub from: protocol::LobbyPhase,
    pub to: protocol::LobbyPhase,
    pub reason: protocol::PhaseChangeReason,
    pub timestamp: u64,
}

/// The full declarative game shape a host application builds and passes to
/// [`crate::Runtime::new`].
#[derive(Default)]
pub struct GameDefinition {
    pub setup: Option<Box<dyn FnMut(&mut SetupContext) -> Value>>,
    pub actions: HashMap<String, ActionDef>,
    pub on_player_join: Option<Box<dyn FnMut(&mut Value, &str)>>,
    pub on_player_leave: Option<Box<dyn FnMut(&mut Value, &str)>>,
    pub on_phase_change: Option<Box<dyn FnMut(&mut Value, &PhaseChangeEvent)>>,
    pub on_player_ready: Option<Box<dyn FnMut(&mut Value, &str, bool)>>,
    pub lobby: Option<LobbyConfig>,
}

impl GameDefinition {
    pub fn new() -> Self {
        GameDefinition::default()
    }

    pub fn with_setup(mut self, setup: impl FnMut(&mut SetupContext) -> Value + 'static) -> Self {
        self.setup = Some(Box::new(setup));
        self
    }

    pub fn with_action(mut self, name: impl Into<String>, action: ActionDef) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    pub fn with_lobby(mut self, lobby: LobbyConfig) -> Self {
        self.lobby = Some(lobby);
        self
    }

    pub fn with_on_player_join(
        mut self,
        hook: impl FnMut(&mut Value, &str) + 'static,
    ) -> Self {
        self.on_player_join = Some(Box::new(hook));
        self
    }

    pub fn with_on_player_leave(
        mut self,
        hook: impl FnMut(&mut Value, &str) + 'static,
    ) -> Self {
        self.on_player_leave = Some(Box::new(hook));
        self
    }

    pub fn with_on_phase_change(
        mut self,
        hook: impl FnMut(&mut Value, &PhaseChangeEvent) + 'static,
    ) -> Self {
        self.on_phase_change = Some(Box::new(hook));
        self
    }

    pub fn with_on_player_ready(
        mut self,
        hook: impl FnMut(&mut Value, &str, bool) + 'static,
    ) -> Self {
        self.on_player_ready = Some(Box::new(hook));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_assembles_setup_and_actions() {
        let game = GameDefinition::new()
            .with_setup(|_ctx| json!({"counter": 0}))
            .with_action(
                "increment",
                ActionDef::new(|state, _ctx, _input| {
                    state["counter"] = json!(state["counter"].as_i64().unwrap() + 1);
                }),
            );

        assert!(game.setup.is_some());
        assert!(game.actions.contains_key("increment"));
    }
}
