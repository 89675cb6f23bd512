//! Pluggable modules and the name → constructor registry.
//!
//! A module is anything that can take exclusive control of the remote (the
//! built-in jukebox, an emulator launcher, ...) or that simply offers
//! functions for the menu.  Modules are constructed lazily the first time
//! one of their actions is referenced and are subscribed to the event bus at
//! that moment.

use crate::bus::Observer;
use crate::controller::Controller;
use async_trait::async_trait;
use rumba_proto::{ActionId, BUILTIN_MODULE};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Construction failures.  All of them are configuration mistakes and
/// therefore fatal for the process.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModuleError {
    #[error("Unknown module '{0}', please fix your configuration")]
    Unknown(String),

    #[error("Module {module}: missing required setting '{key}'")]
    MissingConfig { module: String, key: String },

    #[error("Module {module}: invalid setting '{key}': {reason}")]
    InvalidConfig {
        module: String,
        key: String,
        reason: String,
    },
}

/// Which functions of a module need the double-action gesture.
#[derive(Debug, Clone, Default)]
pub struct ConfirmPolicy {
    pub prompts: HashMap<String, String>,
    /// Every function needs confirmation, listed or not.
    pub confirm_all: bool,
}

impl ConfirmPolicy {
    pub fn new<const N: usize>(prompts: [(&str, &str); N]) -> Self {
        Self {
            prompts: prompts
                .into_iter()
                .map(|(f, p)| (f.to_string(), p.to_string()))
                .collect(),
            confirm_all: false,
        }
    }

    pub fn confirm_all(mut self) -> Self {
        self.confirm_all = true;
        self
    }
}

#[async_trait]
pub trait Module: Send + Sync {
    /// Upper-case namespace of the module's actions.
    fn name(&self) -> &str;

    /// Take exclusive control.
    async fn start(&self, ctl: &Arc<Controller>) -> anyhow::Result<()>;

    /// Hand control back.
    async fn stop(&self, ctl: &Arc<Controller>) -> anyhow::Result<()>;

    async fn invoke(
        &self,
        ctl: &Arc<Controller>,
        function: &str,
        value: Option<serde_json::Value>,
    ) -> anyhow::Result<()>;

    fn confirm_policy(&self) -> &ConfirmPolicy;

    fn needs_confirm(&self, function: &str) -> bool {
        let policy = self.confirm_policy();
        policy.confirm_all || policy.prompts.contains_key(function)
    }

    fn confirm_text(&self, function: &str) -> Option<String> {
        if !self.needs_confirm(function) {
            return None;
        }
        let prompt = self.confirm_policy().prompts.get(function).cloned();
        Some(prompt.unwrap_or_else(|| format!("Confirm {}: {} ?", self.name(), function)))
    }

    /// Menu shown while this module holds control.
    fn menu_items(&self) -> Vec<ActionId> {
        vec![ActionId::new(BUILTIN_MODULE, "ENABLE")]
    }

    /// Menu entry shown in the built-in menu for one of our functions.
    fn icon(&self, function: &str) -> ActionId {
        ActionId::new(self.name(), function)
    }

    async fn on_close(&self) {}
}

/// A constructed module together with its bus subscription.
#[derive(Clone)]
pub struct LoadedModule {
    pub module: Arc<dyn Module>,
    pub observer: Arc<dyn Observer>,
}

type Constructor = Box<dyn Fn(Option<&toml::Table>) -> Result<LoadedModule, ModuleError> + Send + Sync>;

/// Name → constructor table the controller resolves module namespaces with.
#[derive(Default)]
pub struct ModuleRegistry {
    constructors: HashMap<String, Constructor>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor.  It receives the `[modules.<name>]` table
    /// when one is configured.
    pub fn register<M, F>(&mut self, name: &str, ctor: F) -> &mut Self
    where
        M: Module + Observer + 'static,
        F: Fn(Option<&toml::Table>) -> Result<M, ModuleError> + Send + Sync + 'static,
    {
        let ctor: Constructor = Box::new(move |cfg: Option<&toml::Table>| {
            let instance = Arc::new(ctor(cfg)?);
            Ok(LoadedModule {
                module: instance.clone(),
                observer: instance,
            })
        });
        self.constructors.insert(name.to_uppercase(), ctor);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(&name.to_uppercase())
    }

    pub fn construct(
        &self,
        name: &str,
        cfg: Option<&toml::Table>,
    ) -> Result<LoadedModule, ModuleError> {
        let ctor = self
            .constructors
            .get(&name.to_uppercase())
            .ok_or_else(|| ModuleError::Unknown(name.to_string()))?;
        ctor(cfg)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}

// ── Config helpers ────────────────────────────────────────────────────────────

/// Required string setting of a module table.
pub fn required_str(
    module: &str,
    cfg: Option<&toml::Table>,
    key: &str,
) -> Result<String, ModuleError> {
    match cfg.and_then(|t| t.get(key)) {
        Some(toml::Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ModuleError::InvalidConfig {
            module: module.to_string(),
            key: key.to_string(),
            reason: format!("expected a string, got {}", other.type_str()),
        }),
        None => Err(ModuleError::MissingConfig {
            module: module.to_string(),
            key: key.to_string(),
        }),
    }
}

/// Optional argv setting: either a list of strings or one whitespace
/// separated string.
pub fn optional_command(
    module: &str,
    cfg: Option<&toml::Table>,
    key: &str,
) -> Result<Option<Vec<String>>, ModuleError> {
    let invalid = |reason: &str| ModuleError::InvalidConfig {
        module: module.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    };
    match cfg.and_then(|t| t.get(key)) {
        None => Ok(None),
        Some(toml::Value::String(s)) => {
            let argv: Vec<String> = s.split_whitespace().map(str::to_string).collect();
            if argv.is_empty() {
                return Err(invalid("command is empty"));
            }
            Ok(Some(argv))
        }
        Some(toml::Value::Array(items)) => {
            let argv = items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| invalid("command list must only contain strings"))?;
            if argv.is_empty() {
                return Err(invalid("command is empty"));
            }
            Ok(Some(argv))
        }
        Some(_) => Err(invalid("expected a string or a list of strings")),
    }
}

/// Run an external command to completion, output discarded.
pub async fn run_command(argv: &[String]) -> anyhow::Result<()> {
    let Some((program, args)) = argv.split_first() else {
        return Ok(());
    };
    tracing::debug!("running {:?}", argv);
    let status = tokio::process::Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await?;
    if !status.success() {
        anyhow::bail!("{} exited with {}", program, status);
    }
    Ok(())
}
