//! The controller owns `SharedState` and is the only writer to it.
//!
//! Every mutation happens under the state lock and the matching event is
//! published before the lock is released, so observers always see events in
//! the order the state changed.  Network calls never run under the lock.
//!
//! The methods are spread over several files:
//!
//! - `controller.rs` - construction, busy gate, jukebox calls, lifecycle
//! - `confirm.rs`    - double-action gate and the blocking ask
//! - `mode.rs`       - module resolution, mode switches, menu rendering
//! - `router.rs`     - `on_input`
//! - `poll.rs`       - status poll loop

use crate::bus::EventBus;
use crate::keys::{self, KeyCombo, KeyInjector, KeyTiming};
use crate::module::{LoadedModule, ModuleError, ModuleRegistry};
use crate::modules::JukeboxModule;
use crate::session::{Change, SessionCall, SessionClient, SessionError, SessionSettings, Transport};
use crate::timer::Timer;
use rumba_proto::config::Config;
use rumba_proto::{ActionId, Event, SharedState, BUILTIN_MODULE};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Timing and menu layout the controller runs with.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub menu_rows: Vec<Vec<ActionId>>,
    /// Menu auto-hide delay, also the blocking ask timeout.
    pub menu_timeout: Duration,
    pub enable_video: Option<bool>,
    pub init_modules: Vec<String>,
    pub poll_fast: Duration,
    pub poll_slow: Duration,
    /// Minimum spacing of position events.
    pub position_interval: Duration,
    /// Retry step while waiting for the jukebox to come up.
    pub startup_retry: Duration,
    pub key_timing: KeyTiming,
    /// Brings the jukebox service up when it takes control back.
    pub jukebox_start_command: Option<Vec<String>>,
    pub jukebox_stop_command: Option<Vec<String>>,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        let ctl = &config.controller;
        Self {
            menu_rows: ctl.menu_rows.clone(),
            menu_timeout: ctl.menu_timeout(),
            enable_video: ctl.enable_video,
            init_modules: ctl.init_modules.clone(),
            poll_fast: ctl.poll_fast(),
            poll_slow: ctl.poll_slow(),
            position_interval: Duration::from_secs(1),
            startup_retry: Duration::from_millis(500),
            key_timing: KeyTiming::default(),
            jukebox_start_command: config.jukebox.start_command.clone(),
            jukebox_stop_command: config.jukebox.stop_command.clone(),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct Controller {
    pub(crate) settings: ControllerSettings,
    pub(crate) state: Arc<Mutex<SharedState>>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) session: SessionClient,
    pub(crate) registry: ModuleRegistry,
    pub(crate) module_configs: HashMap<String, toml::Table>,
    pub(crate) modules: std::sync::Mutex<HashMap<String, LoadedModule>>,
    pub(crate) keys: Arc<dyn KeyInjector>,
    pub(crate) menu_timer: Timer,
    pub(crate) confirm_timer: Timer,
    /// Answer channel of a pending blocking ask.
    pub(crate) pending_ask: std::sync::Mutex<Option<oneshot::Sender<bool>>>,
    last_position: std::sync::Mutex<Option<Instant>>,
    pub(crate) token: CancellationToken,
    pub(crate) tasks: TaskTracker,
    fatal: std::sync::Mutex<Option<String>>,
    closed: AtomicBool,
}

impl Controller {
    pub fn new(
        settings: ControllerSettings,
        session_settings: SessionSettings,
        transport: Arc<dyn Transport>,
        registry: ModuleRegistry,
        module_configs: HashMap<String, toml::Table>,
        keys: Arc<dyn KeyInjector>,
    ) -> Arc<Self> {
        let state = Arc::new(Mutex::new(SharedState::default()));
        let bus = Arc::new(EventBus::new());
        let tasks = TaskTracker::new();
        let session = SessionClient::new(
            transport,
            state.clone(),
            bus.clone(),
            tasks.clone(),
            session_settings,
        );

        let jukebox = Arc::new(JukeboxModule::new(
            settings.jukebox_start_command.clone(),
            settings.jukebox_stop_command.clone(),
        ));
        let mut modules = HashMap::new();
        modules.insert(
            BUILTIN_MODULE.to_string(),
            LoadedModule {
                module: jukebox.clone(),
                observer: jukebox,
            },
        );

        let module_configs = module_configs
            .into_iter()
            .map(|(name, table)| (name.to_uppercase(), table))
            .collect();

        Arc::new(Self {
            settings,
            state,
            bus,
            session,
            registry,
            module_configs,
            modules: std::sync::Mutex::new(modules),
            keys,
            menu_timer: Timer::new("menu"),
            confirm_timer: Timer::new("confirm"),
            pending_ask: std::sync::Mutex::new(None),
            last_position: std::sync::Mutex::new(None),
            token: CancellationToken::new(),
            tasks,
            fatal: std::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Build a controller from the loaded configuration file.
    pub fn from_config(
        config: &Config,
        transport: Arc<dyn Transport>,
        registry: ModuleRegistry,
        keys: Arc<dyn KeyInjector>,
    ) -> Arc<Self> {
        Self::new(
            ControllerSettings::from_config(config),
            SessionSettings::from_config(&config.jukebox),
            transport,
            registry,
            config.modules.clone(),
            keys,
        )
    }

    /// Load the startup modules, render the menu and start polling.
    pub async fn start(self: &Arc<Self>) -> Result<(), ModuleError> {
        for name in &self.settings.init_modules {
            self.get_module(name).await?;
        }
        self.update_menu(None).await;

        let ctl = self.clone();
        self.tasks.spawn(async move { ctl.run_status_poll().await });
        info!("controller started");
        Ok(())
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn session(&self) -> &SessionClient {
        &self.session
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn snapshot(&self) -> SharedState {
        self.state.lock().await.clone()
    }

    /// Publish with the current state.
    pub async fn publish(&self, event: Event) {
        let st = self.state.lock().await;
        self.bus.publish(event, &st);
    }

    pub fn set_display_resolution(&self, res: impl Into<String>) {
        let res = res.into();
        debug!("cover resolution changed ({})", res);
        self.session.set_display_resolution(res);
    }

    // ── Busy gate ─────────────────────────────────────────────────────────

    /// Claim the busy flag.  Returns false if it was already taken.
    pub async fn try_set_busy(&self) -> bool {
        let mut st = self.state.lock().await;
        if st.busy {
            return false;
        }
        st.busy = true;
        self.bus.publish(Event::BusyChanged { busy: true }, &st);
        true
    }

    pub async fn clear_busy(&self) {
        let mut st = self.state.lock().await;
        st.busy = false;
        self.bus.publish(Event::BusyChanged { busy: false }, &st);
    }

    pub async fn is_busy(&self) -> bool {
        self.state.lock().await.busy
    }

    // ── Status flags ──────────────────────────────────────────────────────

    /// Announce that the jukebox (dis)appeared.  Closes an armed confirmation.
    pub async fn change_connectivity(&self, connected: bool) {
        self.change_confirm(None).await;
        let mut st = self.state.lock().await;
        st.connected = connected;
        self.bus.publish(Event::ConnectivityChanged { connected }, &st);
        info!("jukebox {}", if connected { "connected" } else { "disconnected" });
    }

    fn clear_alert(&self, st: &mut SharedState) {
        if !st.alert_text.is_empty() {
            st.alert_text.clear();
            self.bus.publish(Event::AlertToggled { text: String::new() }, st);
        }
    }

    // ── Jukebox calls ─────────────────────────────────────────────────────

    /// Run a session call and publish what it changed.
    ///
    /// Exclusive calls hold the busy gate for their duration and are dropped
    /// when it is already taken.  Returns true if the server was reached.
    pub async fn jukebox_call(&self, call: SessionCall, exclusive: bool) -> bool {
        if exclusive && !self.try_set_busy().await {
            debug!("{} dropped, busy", call.name());
            return false;
        }
        let video = match call {
            SessionCall::ToggleVideoOut(enabled) => Some(enabled),
            _ => None,
        };

        let result = self.session.call(call).await;
        if exclusive {
            self.clear_busy().await;
        }

        let change = match result {
            Ok(change) => {
                self.clear_alert(&mut *self.state.lock().await);
                change
            }
            Err(SessionError::Logic(message)) => {
                error!("Jukebox error: {}", message);
                Change::None
            }
            Err(SessionError::Unreachable(message)) => {
                self.on_unreachable(message).await;
                return false;
            }
        };

        self.publish_change(change).await;
        if let Some(enabled) = video {
            self.publish(Event::VideoToggled { enabled }).await;
        }
        true
    }

    async fn on_unreachable(&self, message: String) {
        let mut st = self.state.lock().await;
        if !st.builtin_active() {
            // another module has the server stopped on purpose
            st.alert_text.clear();
            return;
        }
        warn!("jukebox unreachable: {}", message);
        if st.playback.playlist_version > 0 {
            st.playback.reset();
        }
        st.alert_text = format!("Server not found: {}", message);
        let text = st.alert_text.clone();
        self.bus.publish(Event::AlertToggled { text }, &st);
    }

    /// Turn a diff result into events.
    pub async fn publish_change(&self, change: Change) {
        match change {
            Change::None => {}
            Change::Position => {
                let st = self.state.lock().await;
                if st.menu.active_page.is_some() {
                    return;
                }
                let Some(track) = st.playback.current_track().cloned() else {
                    return;
                };
                {
                    let mut last = self.last_position.lock().unwrap_or_else(|e| e.into_inner());
                    if last.is_some_and(|t| t.elapsed() < self.settings.position_interval) {
                        return;
                    }
                    *last = Some(Instant::now());
                }
                let position = st.playback.position_secs;
                self.bus
                    .publish(Event::PositionChanged { position, track }, &st);
            }
            Change::PlayState | Change::PlaylistReplaced => {
                let st = self.state.lock().await;
                let playing = st.playback.playing;
                self.bus.publish(Event::PlayingChanged { playing }, &st);
                if let Some(track) = st.playback.current_track().cloned() {
                    let position = st.playback.position_secs;
                    self.bus.publish(
                        Event::TrackChanged {
                            position,
                            track: Some(track),
                        },
                        &st,
                    );
                }
            }
            Change::Track => {
                let page = self.state.lock().await.menu.active_page;
                // star state is part of the menu
                self.update_menu(page).await;
                let st = self.state.lock().await;
                let event = Event::TrackChanged {
                    position: st.playback.position_secs,
                    track: st.playback.current_track().cloned(),
                };
                self.bus.publish(event, &st);
            }
        }
    }

    /// Switch video output.  Without a value the stored flag is flipped.
    /// The server call runs in the background.
    pub async fn toggle_video_out(self: &Arc<Self>, enabled: Option<bool>) {
        let enabled = {
            let mut st = self.state.lock().await;
            let enabled = enabled.unwrap_or(!st.video_enabled.unwrap_or(false));
            st.video_enabled = Some(enabled);
            enabled
        };
        debug!("video out -> {}", enabled);
        let ctl = self.clone();
        self.tasks.spawn(async move {
            ctl.jukebox_call(SessionCall::ToggleVideoOut(enabled), true)
                .await;
        });
    }

    // ── Keys ──────────────────────────────────────────────────────────────

    pub async fn press_key(&self, combo: &str) -> anyhow::Result<()> {
        self.change_confirm(None).await;
        let Some(parsed) = KeyCombo::parse(combo) else {
            anyhow::bail!("invalid key combo '{}'", combo);
        };
        keys::press_combo(self.keys.as_ref(), &parsed, &self.settings.key_timing).await
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Record a configuration failure and shut down.
    pub async fn fail(&self, err: &ModuleError) {
        error!("{}", err);
        error!("Closing application, please fix your configuration!");
        self.fatal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_or_insert_with(|| err.to_string());
        self.shutdown().await;
    }

    /// The configuration error that stopped the controller, if any.
    pub fn fatal_error(&self) -> Option<String> {
        self.fatal.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Announce shutdown, stop all background work and notify modules.
    /// Only the first call does anything.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down");
        self.publish(Event::Shutdown).await;

        self.token.cancel();
        self.menu_timer.cancel();
        self.confirm_timer.cancel();
        // a pending ask resolves to false
        self.pending_ask
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let modules: Vec<_> = self
            .modules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|m| m.module.clone())
            .collect();
        for module in modules {
            module.on_close().await;
        }
        self.tasks.close();
    }

    /// Wait until shutdown was requested and every background task ended.
    pub async fn wait_closed(&self) {
        self.token.cancelled().await;
        self.tasks.close();
        self.tasks.wait().await;
    }
}
