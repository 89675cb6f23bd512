//! Key injection for `KEY.*` actions.
//!
//! The engine only decides *what* to press and with which timing; writing
//! to a virtual keyboard is left to a `KeyInjector` supplied by the host.

use std::time::Duration;
use tracing::debug;

/// Low-level key writer (uinput, X11, a log, ...).
pub trait KeyInjector: Send + Sync {
    fn key_down(&self, key: &str) -> anyhow::Result<()>;
    fn key_up(&self, key: &str) -> anyhow::Result<()>;
    /// Flush the written events.
    fn sync(&self) -> anyhow::Result<()>;
}

/// Injector that only logs what would be pressed.
#[derive(Debug, Default)]
pub struct LoggingInjector;

impl KeyInjector for LoggingInjector {
    fn key_down(&self, key: &str) -> anyhow::Result<()> {
        debug!("key down: KEY_{}", key);
        Ok(())
    }

    fn key_up(&self, key: &str) -> anyhow::Result<()> {
        debug!("key up: KEY_{}", key);
        Ok(())
    }

    fn sync(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KeyTiming {
    pub after_meta_down: Duration,
    pub hold: Duration,
    pub after_key_up: Duration,
    pub after_meta_up: Duration,
}

impl Default for KeyTiming {
    fn default() -> Self {
        Self {
            after_meta_down: Duration::from_millis(200),
            hold: Duration::from_millis(500),
            after_key_up: Duration::from_millis(400),
            after_meta_up: Duration::from_millis(200),
        }
    }
}

/// A parsed `KEY.` combo: `LEFTALT+F10.QL` → meta `LEFTALT`, key `F10`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCombo<'a> {
    pub meta: Option<&'a str>,
    pub key: &'a str,
}

impl<'a> KeyCombo<'a> {
    pub fn parse(combo: &'a str) -> Option<Self> {
        // trailing ".LABEL" is for display only
        let combo = combo.split('.').next().unwrap_or(combo);
        let (meta, key) = match combo.split_once('+') {
            Some((meta, key)) => (Some(meta), key),
            None => (None, combo),
        };
        if key.is_empty() || meta.is_some_and(str::is_empty) {
            return None;
        }
        Some(Self { meta, key })
    }
}

pub async fn press_combo(
    injector: &dyn KeyInjector,
    combo: &KeyCombo<'_>,
    timing: &KeyTiming,
) -> anyhow::Result<()> {
    if let Some(meta) = combo.meta {
        debug!("injecting with meta key: KEY_{}", meta);
        injector.key_down(meta)?;
        tokio::time::sleep(timing.after_meta_down).await;
    }

    debug!("injecting key: KEY_{}", combo.key);
    injector.key_down(combo.key)?;
    tokio::time::sleep(timing.hold).await;
    injector.key_up(combo.key)?;
    tokio::time::sleep(timing.after_key_up).await;

    if let Some(meta) = combo.meta {
        injector.key_up(meta)?;
        tokio::time::sleep(timing.after_meta_up).await;
    }
    injector.sync()
}
