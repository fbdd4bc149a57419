//! The runtime's explicit error types, one enum per spec §7 error table row
//! that can actually fail a call rather than just being logged and
//! swallowed.

use thiserror::Error;

/// Errors [`crate::Runtime::new`] and [`crate::Runtime::submit_action`] can
/// return. Everything in spec §7 marked "log warning, discard" is handled
/// internally via [`crate::Logger`] instead of surfacing here — only
/// construction-time validation is fatal to the caller.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Author `setup()` state used the reserved `__lobby` key.
    #[error("author state may not use the reserved \"__lobby\" key")]
    ReservedStateKey,
    /// An action's `apply` panicked or returned an error; state was rolled
    /// back to the pre-action snapshot.
    #[error("action \"{0}\" failed to apply and was rolled back")]
    ActionApplyFailed(String),
    /// The underlying transport rejected a send or subscribe call.
    #[error("transport error: {0}")]
    Transport(#[from] transport_core::TransportError),
    /// State failed to (de)serialize to `serde_json::Value`, which should
    /// only happen if author state contains something non-JSON-safe.
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors specific to the lobby subsystem (spec §4.9), surfaced only where
/// the lobby fails closed rather than logging and continuing.
#[derive(Debug, Error)]
pub enum LobbyError {
    #[error("player {0} attempted to join a room locked against late joins")]
    LateJoinRejected(String),
    #[error("room is full ({0} players)")]
    RoomFull(u32),
}
