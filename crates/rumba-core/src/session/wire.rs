//! Response bodies of the jukebox REST dialect (Subsonic-style
//! `subsonic-response` envelope plus the `lastMod` playlist stamp).

use rumba_proto::Track;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "subsonic-response")]
    pub body: ResponseBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBody {
    pub status: String,
    #[serde(default)]
    pub error: Option<ApiError>,
    #[serde(default)]
    pub jukebox_status: Option<JukeboxStatus>,
    #[serde(default)]
    pub jukebox_playlist: Option<JukeboxPlaylist>,
    #[serde(default)]
    pub random_songs: Option<SongList>,
    #[serde(default)]
    pub similar_songs: Option<SongList>,
    #[serde(default)]
    pub directory: Option<Directory>,
    #[serde(default)]
    pub img_path: Option<String>,
}

impl ResponseBody {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    pub fn error_message(&self) -> String {
        self.error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| format!("status '{}'", self.status))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JukeboxStatus {
    pub current_index: i64,
    pub playing: bool,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub last_mod: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JukeboxPlaylist {
    #[serde(flatten)]
    pub status: JukeboxStatus,
    #[serde(default)]
    pub entry: Vec<Track>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SongList {
    #[serde(default)]
    pub song: Vec<Track>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Directory {
    #[serde(default)]
    pub child: Vec<Track>,
}
