use crate::action::ActionId;
use crate::BUILTIN_MODULE;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

// ── Track ─────────────────────────────────────────────────────────────────────

/// One playlist entry as reported by the jukebox server.
///
/// Server ids arrive as numbers or strings depending on the server build, so
/// every id field is normalised to a string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    /// Directory (album folder) containing the track.
    #[serde(default, deserialize_with = "de_opt_id")]
    pub parent: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub album_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub artist_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub cover_art: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
    /// Subsonic reports a timestamp when starred; anything truthy counts.
    #[serde(default, deserialize_with = "de_starred")]
    pub starred: bool,
    /// Resolved path of the scaled cover image, filled in asynchronously.
    #[serde(default)]
    pub cover_path: Option<PathBuf>,
    /// Set once a cover fetch has been issued so it is never issued twice.
    #[serde(default)]
    pub cover_requested: bool,
}

impl Track {
    /// Album id if the server assigned a real one (`0` means none).
    pub fn album_key(&self) -> Option<&str> {
        self.album_id
            .as_deref()
            .filter(|id| !id.is_empty() && *id != "0")
    }

    /// Id used for cover requests; falls back to the track id.
    pub fn cover_key(&self) -> &str {
        self.cover_art.as_deref().unwrap_or(&self.id)
    }
}

fn value_to_id(v: serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn de_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let v = serde_json::Value::deserialize(d)?;
    value_to_id(v).ok_or_else(|| serde::de::Error::custom("id must be a string or number"))
}

fn de_opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(v.and_then(value_to_id))
}

fn de_starred<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(match v {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::Bool(b)) => b,
        Some(serde_json::Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    })
}

// ── Playback mirror ───────────────────────────────────────────────────────────

/// Local copy of the remote playback state, kept in sync by diffing every
/// server response against it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybackMirror {
    pub playing: bool,
    /// Always `None` or a valid index into `playlist`.
    pub current_index: Option<usize>,
    pub position_secs: i64,
    /// Server "last modified" stamp of the playlist.  Only ever moves forward
    /// except on `reset()`.
    pub playlist_version: i64,
    pub playlist: Arc<Vec<Track>>,
}

impl PlaybackMirror {
    /// The track the server is positioned on.  Before the server reports an
    /// index the first entry stands in for it.
    pub fn current_track(&self) -> Option<&Track> {
        match self.current_index {
            Some(idx) => self.playlist.get(idx),
            None => self.playlist.first(),
        }
    }

    /// Map a server-reported index onto the mirrored playlist.
    pub fn normalize_index(&self, raw: i64) -> Option<usize> {
        usize::try_from(raw).ok().filter(|idx| *idx < self.playlist.len())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ── Menu / confirmation ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MenuState {
    /// `None` while the page menu is hidden.
    pub active_page: Option<usize>,
    pub visible_items: Vec<ActionId>,
}

/// An armed confirmation.  `awaiting_any_key` marks the blocking variant
/// where any key answers the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    pub target_action: ActionId,
    pub prompt_text: Option<String>,
    pub awaiting_any_key: bool,
}

// ── Shared state ──────────────────────────────────────────────────────────────

/// Everything observers may look at.  Written only by the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedState {
    pub playback: PlaybackMirror,
    pub menu: MenuState,
    /// Namespace of the module owning exclusive control.
    pub active_module: String,
    pub busy: bool,
    pub confirmation: Option<Confirmation>,
    /// Non-empty while a recoverable error is surfaced.
    pub alert_text: String,
    pub connected: bool,
    pub video_enabled: Option<bool>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            playback: PlaybackMirror::default(),
            menu: MenuState::default(),
            active_module: BUILTIN_MODULE.to_string(),
            busy: false,
            confirmation: None,
            alert_text: String::new(),
            connected: false,
            video_enabled: None,
        }
    }
}

impl SharedState {
    pub fn builtin_active(&self) -> bool {
        self.active_module == BUILTIN_MODULE
    }

    /// What the toggle button does right now.
    pub fn toggle_action(&self) -> ActionId {
        if self.builtin_active() {
            ActionId::new("MENU", "TOGGLE")
        } else {
            ActionId::new(BUILTIN_MODULE, "ENABLE")
        }
    }

    pub fn confirm_target(&self) -> Option<&ActionId> {
        self.confirmation.as_ref().map(|c| &c.target_action)
    }
}
