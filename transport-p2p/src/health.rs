//! The application-level liveness protocol layered over the mesh's data
//! channels. WebRTC data channels don't reliably surface a remote peer
//! going dark (a laptop closing its lid leaves the channel "open" until a
//! much longer transport-level timeout), so the mesh pings every peer on
//! its own clock and declares one gone if it stops answering.

use std::collections::HashMap;

/// How often each peer is pinged.
pub const PING_INTERVAL_MS: u64 = 5_000;

/// How long a peer may go without a pong before it's declared timed out.
pub const PEER_TIMEOUT_MS: u64 = 15_000;

/// Tracks the last time each peer was heard from (a pong, or any other
/// traffic) and decides who has gone quiet.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    last_seen_ms: HashMap<String, u64>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        HealthMonitor::default()
    }

    /// Records that `peer_id` was heard from at `now_ms`.
    pub fn record_seen(&mut self, peer_id: &str, now_ms: u64) {
        self.last_seen_ms.insert(peer_id.to_string(), now_ms);
    }

    /// Starts tracking a newly joined peer as seen right now.
    pub fn track(&mut self, peer_id: &str, now_ms: u64) {
        self.last_seen_ms.entry(peer_id.to_string()).or_insert(now_ms);
    }

    /// Stops tracking a peer, e.g. once it has been declared gone.
    pub fn forget(&mut self, peer_id: &str) {
        self.last_seen_ms.remove(peer_id);
    }

    /// Returns the ids of every peer that hasn't been heard from within
    /// [`PEER_TIMEOUT_MS`] of `now_ms`.
    pub fn timed_out_peers(&self, now_ms: u64) -> Vec<String> {
        self.last_seen_ms
            .iter()
            .filter(|(_, &seen)| now_ms.saturating_sub(seen) >= PEER_TIMEOUT_MS)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether `now_ms` is at least one ping interval past the last
    /// recorded send, i.e. it's time to send another round of pings.
    pub fn should_ping(&self, last_ping_ms: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(last_ping_ms) >= PING_INTERVAL_MS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_not_seen_within_timeout_is_reported() {
        let mut monitor = HealthMonitor::new();
        monitor.track("p1", 0);
        assert!(monitor.timed_out_peers(PEER_TIMEOUT_MS - 1).is_empty());
        assert_eq!(monitor.timed_out_peers(PEER_TIMEOUT_MS), vec!["p1".to_string()]);
    }

    #[test]
    fn recording_a_pong_resets_the_clock() {
        let mut monitor = HealthMonitor::new();
        monitor.track("p1", 0);
        monitor.record_seen("p1", 10_000);
        assert!(monitor.timed_out_peers(10_000 + PEER_TIMEOUT_MS - 1).is_empty());
    }

    #[test]
    fn forgetting_a_peer_stops_tracking_it() {
        let mut monitor = HealthMonitor::new();
        monitor.track("p1", 0);
        monitor.forget("p1");
        assert!(monitor.timed_out_peers(PEER_TIMEOUT_MS).is_empty());
    }
}
