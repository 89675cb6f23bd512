//! Session client: wraps every jukebox operation and keeps the playback
//! mirror in sync by diffing each response against it.
//!
//! Flow of one call:
//!
//! ```text
//!   operation ──► request(s) ──► response carries a status block?
//!                                    │ no ──► supplementary `status`
//!                                    ▼
//!                     diff position / index / playing   (under the lock)
//!                                    │ lastMod newer?
//!                                    ▼
//!                     `get` playlist ──► replace only if still newer
//! ```
//!
//! The state lock is never held across a request.

use super::error::{Result, SessionError};
use super::transport::{params, Params, Reply, Transport};
use super::wire::{JukeboxStatus, ResponseBody};
use crate::bus::EventBus;
use rumba_proto::config::JukeboxConfig;
use rumba_proto::{Event, SharedState, Track};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

const JUKEBOX: &str = "jukeboxControl";

/// Below this position `prev` jumps to the previous track instead of
/// restarting the current one.
const RESTART_THRESHOLD_SECS: i64 = 10;

/// What a call changed in the mirror.  When several fields moved, the last
/// one checked wins: position, then track, then play state, then playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    None,
    Position,
    Track,
    PlayState,
    PlaylistReplaced,
}

/// Every remote operation the client offers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCall {
    Status,
    StartStop,
    Prev,
    Next,
    Skip { index: usize, offset: i64 },
    Star(bool),
    InsertRandom,
    InsertSimilar,
    ToggleSubtitles,
    ToggleAudioTrack,
    ToggleVideoOut(bool),
    SetPlaylist {
        ids: Vec<String>,
        resume: Option<(usize, i64)>,
    },
}

impl SessionCall {
    pub fn name(&self) -> &'static str {
        match self {
            SessionCall::Status => "status",
            SessionCall::StartStop => "start-stop",
            SessionCall::Prev => "prev",
            SessionCall::Next => "next",
            SessionCall::Skip { .. } => "skip",
            SessionCall::Star(_) => "star",
            SessionCall::InsertRandom => "insert-random",
            SessionCall::InsertSimilar => "insert-similar",
            SessionCall::ToggleSubtitles => "toggle-subtitles",
            SessionCall::ToggleAudioTrack => "toggle-audio-track",
            SessionCall::ToggleVideoOut(_) => "toggle-video-out",
            SessionCall::SetPlaylist { .. } => "set-playlist",
        }
    }
}

/// Playlist position captured before the jukebox is handed to another module.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedSession {
    pub ids: Vec<String>,
    pub index: Option<usize>,
    pub position: i64,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub exclude_folders: Vec<i64>,
    pub similar_count: usize,
    pub random_count: usize,
    pub cache_dir: PathBuf,
}

impl SessionSettings {
    pub fn from_config(config: &JukeboxConfig) -> Self {
        Self {
            exclude_folders: config.exclude_folders.clone(),
            similar_count: config.similar_count,
            random_count: config.random_count,
            cache_dir: config.cache_dir.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&JukeboxConfig::default())
    }
}

pub struct SessionClient {
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<SharedState>>,
    bus: Arc<EventBus>,
    tasks: TaskTracker,
    settings: SessionSettings,
    display_res: std::sync::Mutex<Option<String>>,
    saved: std::sync::Mutex<Option<SavedSession>>,
}

impl SessionClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        state: Arc<Mutex<SharedState>>,
        bus: Arc<EventBus>,
        tasks: TaskTracker,
        settings: SessionSettings,
    ) -> Self {
        Self {
            transport,
            state,
            bus,
            tasks,
            settings,
            display_res: std::sync::Mutex::new(None),
            saved: std::sync::Mutex::new(None),
        }
    }

    /// Enable cover art resolution for a display of the given size
    /// (e.g. `"320"`).  Without it no cover is ever fetched.
    pub fn set_display_resolution(&self, res: impl Into<String>) {
        *self.display_res.lock().unwrap_or_else(|e| e.into_inner()) = Some(res.into());
    }

    pub fn display_resolution(&self) -> Option<String> {
        self.display_res
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ── Operations ────────────────────────────────────────────────────────

    pub async fn get_status(&self) -> Result<Change> {
        self.call(SessionCall::Status).await
    }

    pub async fn start_stop(&self) -> Result<Change> {
        self.call(SessionCall::StartStop).await
    }

    pub async fn prev_track(&self) -> Result<Change> {
        self.call(SessionCall::Prev).await
    }

    pub async fn next_track(&self) -> Result<Change> {
        self.call(SessionCall::Next).await
    }

    pub async fn skip(&self, index: usize, offset: i64) -> Result<Change> {
        self.call(SessionCall::Skip { index, offset }).await
    }

    pub async fn star(&self, starred: bool) -> Result<Change> {
        self.call(SessionCall::Star(starred)).await
    }

    pub async fn insert_random(&self) -> Result<Change> {
        self.call(SessionCall::InsertRandom).await
    }

    pub async fn insert_similar(&self) -> Result<Change> {
        self.call(SessionCall::InsertSimilar).await
    }

    pub async fn toggle_subtitles(&self) -> Result<Change> {
        self.call(SessionCall::ToggleSubtitles).await
    }

    pub async fn toggle_audio_track(&self) -> Result<Change> {
        self.call(SessionCall::ToggleAudioTrack).await
    }

    pub async fn toggle_video_out(&self, enabled: bool) -> Result<Change> {
        self.call(SessionCall::ToggleVideoOut(enabled)).await
    }

    pub async fn set_playlist(
        &self,
        ids: Vec<String>,
        resume: Option<(usize, i64)>,
    ) -> Result<Change> {
        self.call(SessionCall::SetPlaylist { ids, resume }).await
    }

    /// Run one operation and fold its outcome into the mirror.
    pub async fn call(&self, call: SessionCall) -> Result<Change> {
        debug!("jukebox call {}", call.name());
        let is_star = matches!(call, SessionCall::Star(_));

        let body = match self.dispatch(call).await? {
            Some(body) => body,
            None => self.request_body(JUKEBOX, action("status")).await?,
        };

        let change = match body.jukebox_status {
            Some(status) => self.sync(&status).await?,
            None if is_star => Change::Track,
            None => Change::None,
        };
        debug!("jukebox call result: {:?}", change);
        Ok(change)
    }

    // ── Save / restore ────────────────────────────────────────────────────

    /// Remember playlist and position.  Nothing is saved for an empty
    /// playlist.
    pub async fn save_state(&self) {
        let st = self.state.lock().await;
        let pb = &st.playback;
        if pb.playlist.is_empty() {
            return;
        }
        let saved = SavedSession {
            ids: pb.playlist.iter().map(|t| t.id.clone()).collect(),
            index: pb.current_index,
            position: pb.position_secs,
        };
        debug!("jukebox session saved ({} tracks)", saved.ids.len());
        *self.saved.lock().unwrap_or_else(|e| e.into_inner()) = Some(saved);
    }

    pub fn saved_state(&self) -> Option<SavedSession> {
        self.saved.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replay the saved session (stop, set, seek) and forget it.
    pub async fn restore_state(&self) -> Result<Change> {
        let saved = self.saved.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(saved) = saved else {
            return Ok(Change::None);
        };
        if saved.ids.is_empty() {
            return Ok(Change::None);
        }
        let resume = (saved.index.unwrap_or(0), saved.position);
        let change = self.set_playlist(saved.ids, Some(resume)).await?;
        debug!("jukebox session restored");
        Ok(change)
    }

    // ── Request building ──────────────────────────────────────────────────

    async fn dispatch(&self, call: SessionCall) -> Result<Option<ResponseBody>> {
        let (playing, index, position, len) = {
            let st = self.state.lock().await;
            let pb = &st.playback;
            (pb.playing, pb.current_index, pb.position_secs, pb.playlist.len())
        };

        match call {
            SessionCall::Status => self.request_body(JUKEBOX, action("status")).await.map(Some),
            SessionCall::StartStop => {
                let act = if playing { "stop" } else { "start" };
                self.request_body(JUKEBOX, action(act)).await.map(Some)
            }
            SessionCall::Prev => {
                let mut target = index.unwrap_or(0);
                if position < RESTART_THRESHOLD_SECS && target > 0 {
                    target -= 1;
                }
                self.skip_and_hold(target, playing).await.map(Some)
            }
            SessionCall::Next => {
                let target = match index {
                    Some(i) if i + 1 < len => i + 1,
                    _ => 0,
                };
                self.skip_and_hold(target, playing).await.map(Some)
            }
            SessionCall::Skip { index, offset } => {
                if index >= len {
                    debug!("skip to {} ignored, playlist has {} tracks", index, len);
                    return Ok(None);
                }
                self.request_body(JUKEBOX, skip_params(index, offset))
                    .await
                    .map(Some)
            }
            SessionCall::Star(starred) => self.do_star(starred).await,
            SessionCall::InsertRandom => self.do_insert_random().await,
            SessionCall::InsertSimilar => self.do_insert_similar().await,
            SessionCall::ToggleSubtitles => {
                self.request_body(JUKEBOX, action("toggleSubs")).await.map(Some)
            }
            SessionCall::ToggleAudioTrack => {
                self.request_body(JUKEBOX, action("toggleLang")).await.map(Some)
            }
            SessionCall::ToggleVideoOut(enabled) => {
                let p = params([
                    ("action", "toggleVideoOut".to_string()),
                    ("enabled", enabled.to_string()),
                ]);
                self.request_body(JUKEBOX, p).await.map(Some)
            }
            SessionCall::SetPlaylist { ids, resume } => {
                self.do_set_playlist(&ids, resume).await.map(Some)
            }
        }
    }

    /// Skip auto-resumes playback on the server; stop again when we were
    /// paused so the user can scrub through the playlist silently.
    async fn skip_and_hold(&self, index: usize, playing: bool) -> Result<ResponseBody> {
        let resp = self.request_body(JUKEBOX, skip_params(index, 0)).await?;
        if playing {
            return Ok(resp);
        }
        self.request_body(JUKEBOX, action("stop")).await
    }

    async fn do_star(&self, starred: bool) -> Result<Option<ResponseBody>> {
        let id = {
            let st = self.state.lock().await;
            let pb = &st.playback;
            match pb.current_index.and_then(|i| pb.playlist.get(i)) {
                Some(track) => track.id.clone(),
                None => return Ok(None),
            }
        };
        let endpoint = if starred { "star" } else { "unstar" };
        let resp = self.request_body(endpoint, params([("id", id.clone())])).await?;

        let mut st = self.state.lock().await;
        if let Some(track) = Arc::make_mut(&mut st.playback.playlist)
            .iter_mut()
            .find(|t| t.id == id)
        {
            track.starred = starred;
        }
        Ok(Some(resp))
    }

    async fn do_set_playlist(
        &self,
        ids: &[String],
        resume: Option<(usize, i64)>,
    ) -> Result<ResponseBody> {
        let mut set = action("set");
        set.extend(ids.iter().map(|id| ("id".to_string(), id.clone())));

        let resp = match resume {
            None => self.request_body(JUKEBOX, set).await?,
            Some((index, offset)) => {
                self.request_body(JUKEBOX, action("stop")).await?;
                self.request_body(JUKEBOX, set).await?;
                self.request_body(JUKEBOX, skip_params(index, offset)).await?
            }
        };
        debug!("playlist set ({} tracks), resume: {:?}", ids.len(), resume);
        Ok(resp)
    }

    async fn do_insert_random(&self) -> Result<Option<ResponseBody>> {
        let mut p = params([("size", self.settings.random_count.to_string())]);
        p.extend(
            self.settings
                .exclude_folders
                .iter()
                .map(|id| ("excludeFolderIds".to_string(), id.to_string())),
        );
        let resp = self.request_body("getRandomSongs", p).await?;
        let ids = track_ids(resp.random_songs.map(|l| l.song));
        if ids.is_empty() {
            debug!("no random tracks returned");
            return Ok(None);
        }

        let resp = self.do_set_playlist(&ids, None).await?;
        if resp.jukebox_status.is_some_and(|s| s.playing) {
            return Ok(Some(resp));
        }
        self.request_body(JUKEBOX, skip_params(0, 0)).await.map(Some)
    }

    async fn do_insert_similar(&self) -> Result<Option<ResponseBody>> {
        let (index, mut ids, current, album_adjacent) = {
            let st = self.state.lock().await;
            let pb = &st.playback;
            let Some(index) = pb.current_index.filter(|i| *i < pb.playlist.len()) else {
                return Ok(None);
            };
            let current = pb.playlist[index].clone();
            let album_adjacent = current.album_key().is_some_and(|album| {
                let neighbour = |i: Option<usize>| {
                    i.and_then(|i| pb.playlist.get(i))
                        .is_some_and(|t| t.album_key() == Some(album))
                };
                neighbour(index.checked_sub(1)) || neighbour(Some(index + 1))
            });
            let ids: Vec<String> = pb.playlist.iter().map(|t| t.id.clone()).collect();
            (index, ids, current, album_adjacent)
        };

        if current.album_key().is_some() && !album_adjacent {
            let Some(parent) = current.parent.clone() else {
                debug!("track {} has an album but no parent directory", current.id);
                return Ok(None);
            };
            debug!("insert similar: full album of {}", current.id);
            let resp = self
                .request_body("getMusicDirectory", params([("id", parent)]))
                .await?;
            let album = track_ids(resp.directory.map(|d| d.child));
            if album.is_empty() {
                return Ok(None);
            }
            ids.splice(index..=index, album);
        } else {
            let Some(artist) = current.artist_id.clone() else {
                debug!("track {} has no artist id", current.id);
                return Ok(None);
            };
            debug!("insert similar: {} tracks of artist {}", self.settings.similar_count, artist);
            let p = params([
                ("id", format!("ar-{}", artist)),
                ("count", self.settings.similar_count.to_string()),
            ]);
            let resp = self.request_body("getSimilarSongs", p).await?;
            let similar = track_ids(resp.similar_songs.map(|l| l.song));
            if similar.is_empty() {
                return Ok(None);
            }
            ids.splice(index + 1..index + 1, similar);
        }

        self.do_set_playlist(&ids, None).await.map(Some)
    }

    async fn request_body(&self, endpoint: &str, params: Params) -> Result<ResponseBody> {
        self.transport.request(endpoint, params).await?.into_body()
    }

    // ── Diffing ───────────────────────────────────────────────────────────

    async fn sync(&self, status: &JukeboxStatus) -> Result<Change> {
        let mut change = Change::None;
        let needs_playlist = {
            let mut st = self.state.lock().await;
            let pb = &mut st.playback;
            if pb.position_secs != status.position {
                pb.position_secs = status.position;
                change = Change::Position;
            }
            let index = pb.normalize_index(status.current_index);
            if pb.current_index != index {
                pb.current_index = index;
                change = Change::Track;
                self.request_cover(&mut st);
            }
            let pb = &mut st.playback;
            if pb.playing != status.playing {
                pb.playing = status.playing;
                change = Change::PlayState;
            }
            status.last_mod > pb.playlist_version
        };

        if needs_playlist {
            let resp = self.request_body(JUKEBOX, action("get")).await?;
            let Some(fetched) = resp.jukebox_playlist else {
                return Err(SessionError::Unreachable(
                    "playlist response without jukeboxPlaylist".to_string(),
                ));
            };

            let mut st = self.state.lock().await;
            let pb = &mut st.playback;
            if fetched.status.last_mod > pb.playlist_version {
                pb.playlist_version = fetched.status.last_mod;
                pb.playlist = Arc::new(fetched.entry);
                pb.current_index = pb.normalize_index(fetched.status.current_index);
                pb.position_secs = fetched.status.position;
                pb.playing = fetched.status.playing;
                self.request_cover(&mut st);
                change = Change::PlaylistReplaced;
            } else {
                debug!(
                    "stale playlist ignored (got {}, have {})",
                    fetched.status.last_mod, pb.playlist_version
                );
            }
        }
        Ok(change)
    }

    // ── Cover art ─────────────────────────────────────────────────────────

    /// Start a background cover fetch for the current track unless one was
    /// already issued.  Called with the state lock held.
    fn request_cover(&self, st: &mut SharedState) {
        let Some(res) = self.display_resolution() else {
            return;
        };
        let pb = &mut st.playback;
        let index = pb.current_index.unwrap_or(0);
        let version = pb.playlist_version;
        let Some(track) = Arc::make_mut(&mut pb.playlist).get_mut(index) else {
            return;
        };
        if track.cover_requested || track.cover_path.is_some() {
            return;
        }
        track.cover_requested = true;
        let cover_id = track.cover_key().to_string();
        debug!("cover not resolved, fetching (id: {})", cover_id);

        let fetch = CoverFetch {
            transport: self.transport.clone(),
            state: self.state.clone(),
            bus: self.bus.clone(),
            cache_dir: self.settings.cache_dir.clone(),
            cover_id,
            res,
            index,
            version,
        };
        self.tasks.spawn(async move {
            if let Err(e) = fetch.run().await {
                warn!("cover fetch failed: {:#}", e);
            }
        });
    }
}

struct CoverFetch {
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<SharedState>>,
    bus: Arc<EventBus>,
    cache_dir: PathBuf,
    cover_id: String,
    res: String,
    index: usize,
    version: i64,
}

impl CoverFetch {
    async fn run(self) -> anyhow::Result<()> {
        let path = if self.transport.is_local() {
            let p = params([
                ("id", self.cover_id.clone()),
                ("res", self.res.clone()),
                ("returnPath", "true".to_string()),
            ]);
            let body = self.transport.request("getCoverScreen", p).await?.into_body()?;
            let Some(path) = body.img_path else {
                anyhow::bail!("getCoverScreen returned no imgPath for {}", self.cover_id);
            };
            PathBuf::from(path)
        } else {
            let path = self
                .cache_dir
                .join(format!("{}-screen{}.jpg", self.cover_id, self.res));
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                let p = params([
                    ("id", self.cover_id.clone()),
                    ("res", self.res.clone()),
                    ("returnPath", "false".to_string()),
                ]);
                let Reply::Bytes(img) = self.transport.request("getCoverScreen2", p).await? else {
                    anyhow::bail!("getCoverScreen2 returned no image for {}", self.cover_id);
                };
                tokio::fs::create_dir_all(&self.cache_dir).await?;
                tokio::fs::write(&path, img).await?;
            }
            path
        };
        debug!("cover path fetched (path: {})", path.display());

        let mut st = self.state.lock().await;
        if st.playback.playlist_version != self.version {
            debug!("playlist changed while fetching cover {}, dropped", self.cover_id);
            return Ok(());
        }
        let Some(track) = Arc::make_mut(&mut st.playback.playlist).get_mut(self.index) else {
            return Ok(());
        };
        track.cover_path = Some(path);
        let event = Event::TrackChanged {
            position: st.playback.position_secs,
            track: st.playback.current_track().cloned(),
        };
        self.bus.publish(event, &st);
        Ok(())
    }
}

fn action(name: &str) -> Params {
    params([("action", name.to_string())])
}

fn skip_params(index: usize, offset: i64) -> Params {
    params([
        ("action", "skip".to_string()),
        ("index", index.to_string()),
        ("offset", offset.to_string()),
    ])
}

fn track_ids(tracks: Option<Vec<Track>>) -> Vec<String> {
    tracks
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.id)
        .collect()
}
