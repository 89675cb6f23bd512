//! In-memory jukebox server for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use rumba_core::session::wire::{
    Directory, JukeboxPlaylist, JukeboxStatus, ResponseBody, SongList,
};
use rumba_core::keys::KeyTiming;
use rumba_core::session::{Params, Reply, SessionError, Transport};
use rumba_core::{Controller, ControllerSettings, LoggingInjector, ModuleRegistry, SessionSettings};
use rumba_proto::{ActionId, Event, Notification, Track};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

pub fn track(id: &str, album: &str, artist: &str) -> Track {
    Track {
        id: id.to_string(),
        parent: Some(format!("dir-{}", album)),
        title: format!("title {}", id),
        artist: format!("artist {}", artist),
        album: format!("album {}", album),
        album_id: Some(album.to_string()),
        artist_id: Some(artist.to_string()),
        cover_art: Some(format!("cov-{}", id)),
        duration: Some(180),
        ..Default::default()
    }
}

#[derive(Debug, Default)]
pub struct ServerState {
    pub playlist: Vec<Track>,
    pub index: i64,
    pub playing: bool,
    pub position: i64,
    pub last_mod: i64,
    pub catalog: HashMap<String, Track>,
    pub random: Vec<Track>,
    pub similar: Vec<Track>,
    pub directories: HashMap<String, Vec<Track>>,
    /// Serve `get` with this stamp instead of the real one.
    pub stale_get_stamp: Option<i64>,
}

impl ServerState {
    fn status(&self) -> JukeboxStatus {
        JukeboxStatus {
            current_index: self.index,
            playing: self.playing,
            position: self.position,
            last_mod: self.last_mod,
        }
    }
}

/// Simulated jukebox.  Records every request; can be made unreachable or
/// made to hold requests until permits are released.
#[derive(Default)]
pub struct FakeJukebox {
    pub server: Mutex<ServerState>,
    pub requests: Mutex<Vec<(String, Params)>>,
    pub unreachable: AtomicBool,
    pub local: bool,
    /// Held requests: optional endpoint filter plus the gate they wait on.
    gate: Mutex<Option<(Option<String>, Arc<Semaphore>)>>,
}

impl FakeJukebox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn local() -> Arc<Self> {
        Arc::new(Self {
            local: true,
            ..Default::default()
        })
    }

    /// Server with `tracks` loaded, positioned on `index`.
    pub fn with_playlist(tracks: Vec<Track>, index: i64, playing: bool, position: i64) -> Arc<Self> {
        let fake = Self::new();
        fake.load(tracks, index, playing, position);
        fake
    }

    pub fn load(&self, tracks: Vec<Track>, index: i64, playing: bool, position: i64) {
        let mut s = self.server.lock().unwrap();
        for t in &tracks {
            s.catalog.insert(t.id.clone(), t.clone());
        }
        s.playlist = tracks;
        s.index = index;
        s.playing = playing;
        s.position = position;
        s.last_mod += 1;
    }

    pub fn add_to_catalog(&self, tracks: &[Track]) {
        let mut s = self.server.lock().unwrap();
        for t in tracks {
            s.catalog.insert(t.id.clone(), t.clone());
        }
    }

    pub fn set_unreachable(&self, down: bool) {
        self.unreachable.store(down, Ordering::SeqCst);
    }

    /// Hold every following request until `release` is called.
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some((None, Arc::new(Semaphore::new(0))));
    }

    /// Hold only requests to `endpoint`.
    pub fn hold_endpoint(&self, endpoint: &str) {
        *self.gate.lock().unwrap() = Some((Some(endpoint.to_string()), Arc::new(Semaphore::new(0))));
    }

    pub fn release(&self) {
        if let Some((_, gate)) = self.gate.lock().unwrap().take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn requests(&self) -> Vec<(String, Params)> {
        self.requests.lock().unwrap().clone()
    }

    /// `endpoint` or `jukeboxControl:<action>` for every request so far.
    pub fn calls(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|(endpoint, params)| match param(&params, "action") {
                Some(action) => format!("{}:{}", endpoint, action),
                None => endpoint,
            })
            .collect()
    }

    /// Calls other than `status` and `get`.
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c != "jukeboxControl:status" && c != "jukeboxControl:get")
            .collect()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }

    pub fn playlist_ids(&self) -> Vec<String> {
        let s = self.server.lock().unwrap();
        s.playlist.iter().map(|t| t.id.clone()).collect()
    }

    fn handle(&self, endpoint: &str, params: &Params) -> Result<Reply, SessionError> {
        let mut guard = self.server.lock().unwrap();
        let s = &mut *guard;
        let mut body = ResponseBody::ok();
        match endpoint {
            "jukeboxControl" => {
                let action = param(params, "action").unwrap_or_default();
                match action.as_str() {
                    "status" | "toggleSubs" | "toggleLang" | "toggleVideoOut" => {}
                    "get" => {
                        let mut status = s.status();
                        if let Some(stamp) = s.stale_get_stamp {
                            status.last_mod = stamp;
                        }
                        body.jukebox_playlist = Some(JukeboxPlaylist {
                            status,
                            entry: s.playlist.clone(),
                        });
                        return Ok(Reply::Json(body));
                    }
                    "start" => s.playing = true,
                    "stop" => s.playing = false,
                    "skip" => {
                        let index: i64 = param(params, "index")
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(0);
                        if index < 0 || index as usize >= s.playlist.len() {
                            return Err(SessionError::Logic("Invalid index".into()));
                        }
                        s.index = index;
                        s.position = param(params, "offset")
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(0);
                        // skip always resumes playback
                        s.playing = true;
                    }
                    "set" => {
                        let ids: Vec<String> = params
                            .iter()
                            .filter(|(k, _)| k == "id")
                            .map(|(_, v)| v.clone())
                            .collect();
                        s.playlist = ids
                            .iter()
                            .map(|id| {
                                s.catalog.get(id).cloned().unwrap_or(Track {
                                    id: id.clone(),
                                    ..Default::default()
                                })
                            })
                            .collect();
                        if s.index as usize >= s.playlist.len() || s.index < 0 {
                            s.index = if s.playlist.is_empty() { -1 } else { 0 };
                        }
                        s.last_mod += 1;
                    }
                    other => return Err(SessionError::Logic(format!("Unknown action {}", other))),
                }
                body.jukebox_status = Some(s.status());
            }
            "getRandomSongs" => {
                body.random_songs = Some(SongList {
                    song: s.random.clone(),
                });
            }
            "getSimilarSongs" => {
                body.similar_songs = Some(SongList {
                    song: s.similar.clone(),
                });
            }
            "getMusicDirectory" => {
                let id = param(params, "id").unwrap_or_default();
                body.directory = Some(Directory {
                    child: s.directories.get(&id).cloned().unwrap_or_default(),
                });
            }
            "star" | "unstar" => {
                let id = param(params, "id").unwrap_or_default();
                let starred = endpoint == "star";
                for t in s.playlist.iter_mut().filter(|t| t.id == id) {
                    t.starred = starred;
                }
            }
            "getCoverScreen" => {
                let id = param(params, "id").unwrap_or_default();
                let res = param(params, "res").unwrap_or_default();
                body.img_path = Some(format!("/srv/covers/{}-{}.jpg", id, res));
            }
            "getCoverScreen2" => {
                return Ok(Reply::Bytes(vec![0xff, 0xd8, 0xff, 0xe0]));
            }
            other => return Err(SessionError::Logic(format!("Unknown endpoint {}", other))),
        }
        Ok(Reply::Json(body))
    }
}

pub fn param(params: &Params, key: &str) -> Option<String> {
    params.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
}

#[async_trait]
impl Transport for FakeJukebox {
    async fn request(&self, endpoint: &str, params: Params) -> Result<Reply, SessionError> {
        self.requests
            .lock()
            .unwrap()
            .push((endpoint.to_string(), params.clone()));

        let gate = self.gate.lock().unwrap().clone();
        if let Some((filter, gate)) = gate {
            if filter.as_deref().map_or(true, |f| f == endpoint) {
                let permit = gate.acquire().await;
                drop(permit);
            }
        }

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SessionError::Unreachable("Server not found".into()));
        }
        self.handle(endpoint, &params)
    }

    fn is_local(&self) -> bool {
        self.local
    }
}

// ── Controller helpers ────────────────────────────────────────────────────────

pub fn quick_settings() -> ControllerSettings {
    let row = |items: &[&str]| {
        items
            .iter()
            .map(|s| ActionId::parse(s).unwrap())
            .collect::<Vec<_>>()
    };
    ControllerSettings {
        menu_rows: vec![
            row(&["JUKEBOX.PREV", "JUKEBOX.PLAYPAUSE", "JUKEBOX.NEXT", "JUKEBOX.STAR"]),
            row(&["JUKEBOX.RANDOM", "JUKEBOX.APPROX", "SYSTEM.QUIT", "KEY.ESC"]),
        ],
        menu_timeout: Duration::from_millis(300),
        poll_fast: Duration::from_millis(20),
        poll_slow: Duration::from_millis(20),
        startup_retry: Duration::from_millis(10),
        key_timing: KeyTiming {
            after_meta_down: Duration::ZERO,
            hold: Duration::ZERO,
            after_key_up: Duration::ZERO,
            after_meta_up: Duration::ZERO,
        },
        ..ControllerSettings::default()
    }
}

pub fn session_settings(cache_dir: PathBuf) -> SessionSettings {
    SessionSettings {
        cache_dir,
        ..SessionSettings::default()
    }
}

pub fn controller(
    fake: Arc<FakeJukebox>,
    settings: ControllerSettings,
    registry: ModuleRegistry,
    module_configs: HashMap<String, toml::Table>,
) -> Arc<Controller> {
    Controller::new(
        settings,
        session_settings(std::env::temp_dir().join("rumba-core-tests")),
        fake,
        registry,
        module_configs,
        Arc::new(LoggingInjector),
    )
}

/// Everything published so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Arc<Notification>>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(n) = rx.try_recv() {
        events.push(n.event.clone());
    }
    events
}

pub fn names(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(Event::name).collect()
}

/// Receive until an event matches `pred`; `None` after two seconds.
pub async fn wait_for<F: Fn(&Event) -> bool>(
    rx: &mut mpsc::UnboundedReceiver<Arc<Notification>>,
    pred: F,
) -> Option<Event> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(n)) if pred(&n.event) => return Some(n.event.clone()),
            Ok(Some(_)) => continue,
            _ => return None,
        }
    }
}

/// Poll `cond` until it holds or the deadline passes.
pub async fn eventually<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
