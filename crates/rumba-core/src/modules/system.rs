//! `SYSTEM.*`: quit the remote, restart the jukebox service, power off.
//! Every function needs confirmation.

use super::JukeboxModule;
use crate::bus::Observer;
use crate::controller::Controller;
use crate::module::{optional_command, run_command, ConfirmPolicy, Module, ModuleError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub const SYSTEM_MODULE: &str = "SYSTEM";

pub struct SystemModule {
    policy: ConfirmPolicy,
    restart_command: Vec<String>,
    shutdown_command: Vec<String>,
}

impl SystemModule {
    pub fn from_config(cfg: Option<&toml::Table>) -> Result<Self, ModuleError> {
        let restart_command = optional_command(SYSTEM_MODULE, cfg, "restart_command")?
            .unwrap_or_else(|| argv(&["sudo", "service", "rumba-server", "restart"]));
        let shutdown_command = optional_command(SYSTEM_MODULE, cfg, "shutdown_command")?
            .unwrap_or_else(|| argv(&["sudo", "shutdown", "-h", "now"]));
        Ok(Self {
            policy: ConfirmPolicy::new([
                ("QUIT", "quit remote ?"),
                ("RESTART", "restart jukebox ?"),
                ("SHUTDOWN", "shutdown server ?"),
            ])
            .confirm_all(),
            restart_command,
            shutdown_command,
        })
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl Module for SystemModule {
    fn name(&self) -> &str {
        SYSTEM_MODULE
    }

    async fn start(&self, _ctl: &Arc<Controller>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self, _ctl: &Arc<Controller>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn invoke(
        &self,
        ctl: &Arc<Controller>,
        function: &str,
        _value: Option<serde_json::Value>,
    ) -> anyhow::Result<()> {
        match function {
            "QUIT" => {
                info!("exiting!");
                ctl.change_confirm(Some(JukeboxModule::ok_action())).await;
                ctl.shutdown().await;
            }
            "RESTART" => {
                info!("jukebox restart initiated");
                ctl.change_confirm(Some(JukeboxModule::ok_action())).await;
                run_command(&self.restart_command).await?;
            }
            "SHUTDOWN" => {
                info!("shutdown initiated");
                ctl.change_confirm(Some(JukeboxModule::ok_action())).await;
                run_command(&self.shutdown_command).await?;
            }
            other => anyhow::bail!("unknown system function {}", other),
        }
        Ok(())
    }

    fn confirm_policy(&self) -> &ConfirmPolicy {
        &self.policy
    }
}

impl Observer for SystemModule {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_everything_needs_confirmation() {
        let m = SystemModule::from_config(None).unwrap();
        assert!(m.needs_confirm("QUIT"));
        assert!(m.needs_confirm("REBOOT"));
        assert_eq!(m.confirm_text("SHUTDOWN").as_deref(), Some("shutdown server ?"));
        assert_eq!(m.confirm_text("REBOOT").as_deref(), Some("Confirm SYSTEM: REBOOT ?"));
        assert_eq!(m.restart_command, ["sudo", "service", "rumba-server", "restart"]);
    }

    #[test]
    fn test_commands_from_config() {
        let t: toml::Table = "restart_command = [\"systemctl\", \"restart\", \"jb\"]".parse().unwrap();
        let m = SystemModule::from_config(Some(&t)).unwrap();
        assert_eq!(m.restart_command, ["systemctl", "restart", "jb"]);

        let bad: toml::Table = "shutdown_command = 3".parse().unwrap();
        assert!(matches!(
            SystemModule::from_config(Some(&bad)),
            Err(ModuleError::InvalidConfig { .. })
        ));
    }
}
