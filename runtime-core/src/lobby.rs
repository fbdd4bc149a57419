//! The phase machine, presence tracking, and reconciliation layered over
//! `state.__lobby`. `Runtime` owns the scheduling (when to reconcile, when
//! a peer event arrives); this module is the pure logic those call sites
//! drive, kept separate so the start-condition/phase-transition rules have
//! one place to read and test independent of transport wiring.

use protocol::{LobbyConfig, LobbyPhase, PhaseChangeReason, PlayerPresence};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// How often the host reconciles declared lobby players against the
/// transport's observed peer set.
pub const RECONCILIATION_INTERVAL_MS: u64 = 30_000;

/// The typed shape of `state.__lobby`, read out of / written back into the
/// author's JSON state around each lobby operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbySnapshot {
    pub phase: LobbyPhase,
    pub players: BTreeMap<String, PlayerPresence>,
    pub config: LobbyConfig,
    #[serde(default)]
    pub started_at: Option<u64>,
    #[serde(default)]
    pub ended_at: Option<u64>,
    /// When the lobby entered the `lobby` phase, used for `autoStartTimeout`.
    #[serde(default)]
    pub lobby_entered_at: u64,
}

impl LobbySnapshot {
    pub fn new(config: LobbyConfig, player_ids: &[String], now_ms: u64) -> Self {
        let players = player_ids
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    PlayerPresence {
                        player_id: id.clone(),
                        ready: false,
                        joined_at: now_ms,
                        metadata: None,
                    },
                )
            })
            .collect();
        LobbySnapshot {
            phase: LobbyPhase::Lobby,
            players,
            config,
            started_at: None,
            ended_at: None,
            lobby_entered_at: now_ms,
        }
    }

    pub fn read(state: &Value) -> Option<Self> {
        state
            .get(protocol::LOBBY_STATE_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn write(&self, state: &mut Value) {
        if let Value::Object(map) = state {
            map.insert(
                protocol::LOBBY_STATE_KEY.to_string(),
                serde_json::to_value(self).expect("LobbySnapshot is always JSON-serializable"),
            );
        }
    }
}

/// Evaluates start conditions after any presence or ready change. Returns
/// the reason to transition to `playing`, if any.
pub fn check_start_conditions(lobby: &LobbySnapshot, now_ms: u64) -> Option<PhaseChangeReason> {
    if lobby.phase != LobbyPhase::Lobby {
        return None;
    }
    let player_count = lobby.players.len() as u32;
    if player_count < lobby.config.min_players {
        return auto_start_on_timeout(lobby, now_ms, player_count);
    }
    let all_ready = !lobby.config.require_all_ready || lobby.players.values().all(|p| p.ready);
    if all_ready {
        return Some(PhaseChangeReason::AllReady);
    }
    auto_start_on_timeout(lobby, now_ms, player_count)
}

fn auto_start_on_timeout(
    lobby: &LobbySnapshot,
    now_ms: u64,
    player_count: u32,
) -> Option<PhaseChangeReason> {
    let timeout = lobby.config.auto_start_timeout_ms?;
    if player_count >= lobby.config.min_players
        && now_ms.saturating_sub(lobby.lobby_entered_at) >= timeout
    {
        Some(PhaseChangeReason::Timeout)
    } else {
        None
    }
}

/// Transitions the lobby to `to`, stamping `startedAt`/`endedAt` as
/// appropriate. Returns whether the transport should be locked (entering
/// `playing` with `allow_late_join == false`).
pub fn transition_phase(lobby: &mut LobbySnapshot, to: LobbyPhase, now_ms: u64) -> bool {
    let mut should_lock = false;
    match to {
        LobbyPhase::Playing => {
            lobby.started_at = Some(now_ms);
            should_lock = !lobby.config.allow_late_join;
        }
        LobbyPhase::Ended => {
            lobby.ended_at = Some(now_ms);
        }
        LobbyPhase::Lobby => {}
    }
    lobby.phase = to;
    should_lock
}

/// Whether a joining peer should be rejected per §4.9 "Peer join handling".
pub fn should_reject_join(lobby: &LobbySnapshot) -> bool {
    if lobby.phase == LobbyPhase::Playing && !lobby.config.allow_late_join {
        return true;
    }
    if let Some(max_players) = lobby.config.max_players {
        if lobby.players.len() as u32 >= max_players {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min: u32, require_ready: bool) -> LobbyConfig {
        LobbyConfig {
            min_players: min,
            max_players: None,
            require_all_ready: require_ready,
            auto_start_timeout_ms: None,
            allow_late_join: true,
            ready_timeout_ms: None,
        }
    }

    #[test]
    fn starts_once_min_players_and_all_ready() {
        let mut lobby = LobbySnapshot::new(config(2, true), &["h".into(), "c".into()], 0);
        assert!(check_start_conditions(&lobby, 0).is_none());
        for player in lobby.players.values_mut() {
            player.ready = true;
        }
        assert_eq!(
            check_start_conditions(&lobby, 0),
            Some(PhaseChangeReason::AllReady)
        );
    }

    #[test]
    fn auto_start_timeout_fires_even_if_not_all_ready() {
        let mut cfg = config(2, true);
        cfg.auto_start_timeout_ms = Some(30_000);
        let lobby = LobbySnapshot::new(cfg, &["h".into(), "c".into()], 0);
        assert!(check_start_conditions(&lobby, 29_999).is_none());
        assert_eq!(
            check_start_conditions(&lobby, 30_000),
            Some(PhaseChangeReason::Timeout)
        );
    }

    #[test]
    fn late_join_rejected_once_playing_and_disallowed() {
        let mut cfg = config(2, false);
        cfg.allow_late_join = false;
        let mut lobby = LobbySnapshot::new(cfg, &["h".into(), "c".into()], 0);
        transition_phase(&mut lobby, LobbyPhase::Playing, 0);
        assert!(should_reject_join(&lobby));
    }

    #[test]
    fn full_room_rejected_even_pre_game() {
        let mut cfg = config(1, false);
        cfg.max_players = Some(1);
        let lobby = LobbySnapshot::new(cfg, &["h".into()], 0);
        assert!(should_reject_join(&lobby));
    }

    #[test]
    fn transitioning_to_playing_locks_when_late_join_disallowed() {
        let mut cfg = config(1, false);
        cfg.allow_late_join = false;
        let mut lobby = LobbySnapshot::new(cfg, &["h".into()], 0);
        assert!(transition_phase(&mut lobby, LobbyPhase::Playing, 100));
        assert_eq!(lobby.started_at, Some(100));
    }
}
