//! npcman – connection lifecycle manager for synthetic session participants
//!
//! This crate drives bot-controlled participants ("NPCs") through:
//! - Unique name allocation against both human and synthetic holders
//! - A cancellable, time-bounded connection handshake
//! - A derived-flag lifecycle state machine with single-fire ready/closed signals
//! - Orderly teardown of every participant when the manager is disposed

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Runtime core modules implementing the participant lifecycle
pub mod runtime;

// Re-export key types for convenience
pub use runtime::{ManagerConfig, NpcManager, Participant, Phase};

/// Current version of the npcman crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
