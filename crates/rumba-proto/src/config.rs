use crate::action::ActionId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no menu_rows defined in the [controller] section of {0}")]
    NoMenu(PathBuf),
    #[error("menu row {row} of {path} is empty")]
    EmptyMenuRow { row: usize, path: PathBuf },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub jukebox: JukeboxConfig,
    /// Free-form per-module tables, keyed by lower-case module name.
    #[serde(default)]
    pub modules: HashMap<String, toml::Table>,
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_menu_rows")]
    pub menu_rows: Vec<Vec<ActionId>>,
    #[serde(default = "default_menu_timeout_secs")]
    pub menu_timeout_secs: u64,
    /// Video output state re-applied after every reconnect.  Unset leaves the
    /// server alone.
    #[serde(default)]
    pub enable_video: Option<bool>,
    /// Modules instantiated at startup instead of on first use.
    #[serde(default)]
    pub init_modules: Vec<String>,
    /// Poll interval while the jukebox is active and playing.
    #[serde(default = "default_poll_fast_ms")]
    pub poll_fast_ms: u64,
    #[serde(default = "default_poll_slow_ms")]
    pub poll_slow_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JukeboxConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_credential")]
    pub username: String,
    #[serde(default = "default_credential")]
    pub password: String,
    /// Library folders never used for random tracks.
    #[serde(default)]
    pub exclude_folders: Vec<i64>,
    #[serde(default = "default_similar_count")]
    pub similar_count: usize,
    #[serde(default = "default_random_count")]
    pub random_count: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// argv run when the jukebox module takes control back, e.g.
    /// `["sudo", "service", "rumba-server", "start"]`.  Unset when the server
    /// is managed elsewhere.
    #[serde(default)]
    pub start_command: Option<Vec<String>>,
    #[serde(default)]
    pub stop_command: Option<Vec<String>>,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_socket_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Level for the session client alone; falls back to `level`.
    #[serde(default)]
    pub session_level: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            menu_rows: default_menu_rows(),
            menu_timeout_secs: default_menu_timeout_secs(),
            enable_video: None,
            init_modules: Vec::new(),
            poll_fast_ms: default_poll_fast_ms(),
            poll_slow_ms: default_poll_slow_ms(),
        }
    }
}

impl ControllerConfig {
    pub fn menu_timeout(&self) -> Duration {
        Duration::from_secs(self.menu_timeout_secs)
    }

    pub fn poll_fast(&self) -> Duration {
        Duration::from_millis(self.poll_fast_ms)
    }

    pub fn poll_slow(&self) -> Duration {
        Duration::from_millis(self.poll_slow_ms)
    }
}

impl Default for JukeboxConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            username: default_credential(),
            password: default_credential(),
            exclude_folders: Vec::new(),
            similar_count: default_similar_count(),
            random_count: default_random_count(),
            request_timeout_secs: default_request_timeout_secs(),
            start_command: None,
            stop_command: None,
            cache_dir: default_cache_dir(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            port: default_socket_port(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_bind_address(),
            port: default_http_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            session_level: None,
        }
    }
}

fn default_menu_rows() -> Vec<Vec<ActionId>> {
    let row = |items: &[&str]| {
        items
            .iter()
            .filter_map(|s| ActionId::parse(s).ok())
            .collect::<Vec<_>>()
    };
    vec![
        row(&["JUKEBOX.PREV", "JUKEBOX.PLAYPAUSE", "JUKEBOX.NEXT", "JUKEBOX.STAR"]),
        row(&["JUKEBOX.RANDOM", "JUKEBOX.APPROX", "JUKEBOX.SUBS", "JUKEBOX.LANG"]),
        row(&["JUKEBOX.VIDEO", "SYSTEM.RESTART", "SYSTEM.QUIT", "SYSTEM.SHUTDOWN"]),
    ]
}

fn default_menu_timeout_secs() -> u64 {
    10
}

fn default_poll_fast_ms() -> u64 {
    1000
}

fn default_poll_slow_ms() -> u64 {
    5000
}

fn default_url() -> String {
    "http://127.0.0.1:23232/rest/".to_string()
}

fn default_credential() -> String {
    "admin".to_string()
}

fn default_similar_count() -> usize {
    20
}

fn default_random_count() -> usize {
    100
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_cache_dir() -> PathBuf {
    platform::cache_dir()
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    platform::DAEMON_TCP_HOST.to_string()
}

fn default_socket_port() -> u16 {
    platform::DAEMON_TCP_PORT
}

fn default_http_port() -> u16 {
    8990
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load from `path`, or from the default location.  A missing default
    /// file is created with defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);

        if path.is_none() && !config_path.exists() {
            let config = Self::default();
            config.save(&config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
            path: config_path.clone(),
            source,
        })?;
        let config = Self::parse(&content, &config_path)?;
        Ok(config)
    }

    pub fn parse(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate(origin)?;
        Ok(config)
    }

    pub fn validate(&self, origin: &Path) -> Result<(), ConfigError> {
        if self.controller.menu_rows.is_empty() {
            return Err(ConfigError::NoMenu(origin.to_path_buf()));
        }
        if let Some(row) = self.controller.menu_rows.iter().position(Vec::is_empty) {
            return Err(ConfigError::EmptyMenuRow {
                row,
                path: origin.to_path_buf(),
            });
        }
        Ok(())
    }

    pub fn save(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Settings table of one module, looked up case-insensitively.
    pub fn module_table(&self, name: &str) -> Option<&toml::Table> {
        self.modules.get(&name.to_lowercase())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            jukebox: JukeboxConfig::default(),
            modules: HashMap::new(),
            socket: SocketConfig::default(),
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
