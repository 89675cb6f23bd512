use std::path::PathBuf;

pub const DAEMON_TCP_PORT: u16 = 9877;
pub const DAEMON_TCP_HOST: &str = "127.0.0.1";

pub fn data_dir() -> PathBuf {
    // ~/.local/share/rumba-remote/ on every unix (XDG standard)
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("rumba-remote")
    }
    #[cfg(not(unix))]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rumba-remote")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("rumba-remote")
    }
    #[cfg(not(unix))]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rumba-remote")
    }
}

pub fn cache_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".cache")
            .join("rumba-remote")
    }
    #[cfg(not(unix))]
    {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("rumba-remote")
    }
}

/// True when the jukebox url points at this machine.  Local servers hand out
/// cover paths on their own filesystem instead of image bytes.
pub fn is_local_url(url: &str) -> bool {
    let host = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    host.starts_with("localhost") || host.starts_with("127.")
}
