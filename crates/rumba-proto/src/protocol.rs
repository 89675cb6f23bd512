use crate::action::ActionId;
use crate::state::{SharedState, Track};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame accepted from a device.
pub const MAX_COMMAND_LEN: usize = 64 * 1024;

// ── Events ────────────────────────────────────────────────────────────────────

/// Every state change the controller announces.  The payload carries the
/// fields that changed; the full state travels alongside in `Notification`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Event {
    UserInput,
    MenuToggled {
        page: Option<usize>,
        items: Vec<ActionId>,
    },
    VideoToggled {
        enabled: bool,
    },
    TrackChanged {
        position: i64,
        track: Option<Track>,
    },
    /// Rate limited (once per second by default) and only emitted while the
    /// page menu is closed.
    PositionChanged {
        position: i64,
        track: Track,
    },
    BusyChanged {
        busy: bool,
    },
    ConnectivityChanged {
        connected: bool,
    },
    ModeChanged {
        module: String,
    },
    PlayingChanged {
        playing: bool,
    },
    /// Empty `text` hides the alert.
    AlertToggled {
        text: String,
    },
    ConfirmationToggled {
        action: Option<ActionId>,
        prompt: Option<String>,
        blocking: bool,
    },
    Shutdown,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::UserInput => "user-input",
            Event::MenuToggled { .. } => "menu-toggled",
            Event::VideoToggled { .. } => "video-toggled",
            Event::TrackChanged { .. } => "track-changed",
            Event::PositionChanged { .. } => "position-changed",
            Event::BusyChanged { .. } => "busy-changed",
            Event::ConnectivityChanged { .. } => "connectivity-changed",
            Event::ModeChanged { .. } => "mode-changed",
            Event::PlayingChanged { .. } => "playing-changed",
            Event::AlertToggled { .. } => "alert-toggled",
            Event::ConfirmationToggled { .. } => "confirmation-toggled",
            Event::Shutdown => "shutdown",
        }
    }
}

/// One published event.  `seq` increases by one per publish so observers can
/// detect gaps; `state` is the snapshot taken together with the mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub seq: u64,
    pub event: Event,
    pub state: Arc<SharedState>,
}

// ── Socket messages ───────────────────────────────────────────────────────────

/// Messages sent from devices to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Input {
        action: String,
        #[serde(default)]
        value: Option<serde_json::Value>,
    },
    GetState,
}

/// Messages sent from the daemon to devices
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full state snapshot.
    Hello {
        protocol_version: u32,
        seq: u64,
        state: SharedState,
    },
    State {
        data: SharedState,
    },
    Event {
        seq: u64,
        event: Event,
    },
    Error {
        message: String,
    },
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Payload length announced by the header at the start of `data`, once
    /// the header is complete.
    pub fn frame_len(data: &[u8]) -> Option<usize> {
        let header: [u8; 4] = data.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(header) as usize)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
