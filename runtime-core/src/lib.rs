//! Host-authoritative multiplayer state synchronization, transport-agnostic.
//!
//! An author builds a [`game::GameDefinition`] (setup, named actions,
//! lifecycle hooks, optional lobby config), hands it to [`runtime::Runtime`]
//! together with a [`transport_core::Transport`] implementation, and drives
//! the result by calling [`runtime::Runtime::tick`] once per frame and
//! [`runtime::Runtime::submit_action`] whenever a local player acts. Every
//! peer runs the same runtime; only the host actually applies actions and
//! computes patches, everyone else applies patches that arrive over the
//! transport.

pub mod diff;
pub mod error;
pub mod game;
pub mod helpers;
pub mod lobby;
pub mod logger;
pub mod rng;
pub mod runtime;

pub use error::{LobbyError, RuntimeError};
pub use game::{ActionContext, ActionDef, GameDefinition, PhaseChangeEvent, SetupContext};
pub use lobby::LobbySnapshot;
pub use logger::{Level, LogEvent, Logger};
pub use rng::SeededRandom;
pub use runtime::Runtime;
