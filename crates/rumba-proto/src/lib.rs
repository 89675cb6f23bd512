//! Types shared between the orchestration engine and out-of-process
//! observers: action identifiers, the event vocabulary, the shared state
//! snapshot, the framed socket protocol and the TOML configuration.

pub mod action;
pub mod config;
pub mod platform;
pub mod protocol;
pub mod state;

pub use action::{ActionId, ActionParseError, Target};
pub use protocol::{Event, Notification};
pub use state::{Confirmation, MenuState, PlaybackMirror, SharedState, Track};

/// Namespace of the built-in module that owns control when no external
/// program is running.
pub const BUILTIN_MODULE: &str = "JUKEBOX";
