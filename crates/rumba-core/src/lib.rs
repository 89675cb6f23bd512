//! Orchestration engine of the remote: routes device input to the jukebox or
//! to pluggable modules, keeps a mirror of the jukebox's playback state and
//! fans every state change out to observers.

pub mod bus;
pub mod confirm;
pub mod controller;
pub mod keys;
mod mode;
pub mod module;
pub mod modules;
mod poll;
mod router;
pub mod session;
pub mod timer;

pub use bus::{EventBus, Observer, SubscriptionId};
pub use confirm::Gate;
pub use controller::{Controller, ControllerSettings};
pub use keys::{KeyInjector, LoggingInjector};
pub use module::{ConfirmPolicy, Module, ModuleError, ModuleRegistry};
pub use session::{Change, SessionCall, SessionClient, SessionError, SessionSettings, Transport};
pub use timer::Timer;
