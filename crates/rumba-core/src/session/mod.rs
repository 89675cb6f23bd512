pub mod client;
pub mod error;
pub mod transport;
pub mod wire;

pub use client::{Change, SavedSession, SessionCall, SessionClient, SessionSettings};
pub use error::SessionError;
pub use transport::{HttpTransport, Params, Reply, Transport};
