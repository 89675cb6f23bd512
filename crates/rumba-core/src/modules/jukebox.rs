//! The built-in module: direct control of the jukebox.

use crate::bus::Observer;
use crate::controller::Controller;
use crate::module::{run_command, ConfirmPolicy, Module};
use crate::session::SessionCall;
use async_trait::async_trait;
use rumba_proto::{ActionId, BUILTIN_MODULE};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

pub struct JukeboxModule {
    policy: ConfirmPolicy,
    start_command: Option<Vec<String>>,
    stop_command: Option<Vec<String>>,
}

impl JukeboxModule {
    pub fn new(start_command: Option<Vec<String>>, stop_command: Option<Vec<String>>) -> Self {
        Self {
            policy: ConfirmPolicy::new([
                ("STAR", "star ?"),
                ("UNSTAR", "unstar ?"),
                ("RANDOM", "random tracks ?"),
                ("APPROX", "add similar tracks ?"),
                ("ENABLE", "start jukebox ?"),
                ("BANANAS", "go bananas ?"),
                ("OK", "ay, captain !"),
            ]),
            start_command,
            stop_command,
        }
    }

    /// The acknowledgement shown after a confirmed action.
    pub fn ok_action() -> ActionId {
        ActionId::new(BUILTIN_MODULE, "OK")
    }
}

#[async_trait]
impl Module for JukeboxModule {
    fn name(&self) -> &str {
        BUILTIN_MODULE
    }

    async fn start(&self, ctl: &Arc<Controller>) -> anyhow::Result<()> {
        info!("starting jukebox");
        ctl.change_confirm(None).await;

        if let Some(cmd) = &self.start_command {
            if let Err(e) = run_command(cmd).await {
                warn!("jukebox start command failed: {:#}", e);
            }
        }

        // the server needs a moment before it answers again
        let token = ctl.cancellation_token();
        while !ctl.jukebox_call(SessionCall::Status, false).await {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(ctl.settings().startup_retry) => {}
            }
        }

        match ctl.session().restore_state().await {
            Ok(change) => ctl.publish_change(change).await,
            Err(e) => warn!("restoring jukebox session failed: {}", e),
        }
        ctl.change_connectivity(true).await;
        ctl.update_menu(None).await;
        info!("jukebox started");
        Ok(())
    }

    async fn stop(&self, ctl: &Arc<Controller>) -> anyhow::Result<()> {
        info!("suspending jukebox");
        ctl.change_connectivity(false).await;
        ctl.session().save_state().await;

        if let Some(cmd) = &self.stop_command {
            run_command(cmd).await?;
        }
        info!("jukebox suspended");
        Ok(())
    }

    async fn invoke(
        &self,
        ctl: &Arc<Controller>,
        function: &str,
        value: Option<Value>,
    ) -> anyhow::Result<()> {
        match function {
            "PREV" => {
                ctl.jukebox_call(SessionCall::Prev, true).await;
            }
            "PLAYPAUSE" => {
                ctl.jukebox_call(SessionCall::StartStop, true).await;
            }
            "NEXT" => {
                ctl.jukebox_call(SessionCall::Next, true).await;
            }
            "SKIP" => {
                let current = ctl.snapshot().await.playback.current_index.unwrap_or(0);
                let (index, offset) = skip_target(value.as_ref(), current)?;
                ctl.jukebox_call(SessionCall::Skip { index, offset }, true)
                    .await;
            }
            "STAR" | "UNSTAR" => {
                ctl.jukebox_call(SessionCall::Star(function == "STAR"), true)
                    .await;
                let page = ctl.snapshot().await.menu.active_page;
                ctl.update_menu(page).await;
            }
            "RANDOM" => {
                ctl.jukebox_call(SessionCall::InsertRandom, true).await;
                ctl.update_menu(Some(0)).await;
            }
            "APPROX" => {
                ctl.jukebox_call(SessionCall::InsertSimilar, true).await;
                ctl.update_menu(Some(0)).await;
            }
            "SUBS" => {
                ctl.jukebox_call(SessionCall::ToggleSubtitles, true).await;
            }
            "LANG" => {
                ctl.jukebox_call(SessionCall::ToggleAudioTrack, true).await;
            }
            "VIDEO" => {
                let enabled = match value {
                    None | Some(Value::Null) => None,
                    Some(Value::Bool(b)) => Some(b),
                    Some(other) => anyhow::bail!("VIDEO expects a bool, got {}", other),
                };
                ctl.toggle_video_out(enabled).await;
            }
            "ENABLE" => ctl.change_mode(None).await?,
            "BANANAS" => ctl.change_confirm(Some(Self::ok_action())).await,
            other => anyhow::bail!("unknown jukebox function {}", other),
        }
        Ok(())
    }

    fn confirm_policy(&self) -> &ConfirmPolicy {
        &self.policy
    }
}

impl Observer for JukeboxModule {}

/// `SKIP` takes either seconds within the current track or
/// `{"index": n, "offset": s}`.
fn skip_target(value: Option<&Value>, current: usize) -> anyhow::Result<(usize, i64)> {
    match value {
        Some(Value::Number(n)) => {
            let offset = n
                .as_i64()
                .ok_or_else(|| anyhow::anyhow!("SKIP offset must be an integer"))?;
            Ok((current, offset.max(0)))
        }
        Some(Value::Object(map)) => {
            let index = map
                .get("index")
                .and_then(Value::as_u64)
                .and_then(|i| usize::try_from(i).ok())
                .unwrap_or(current);
            let offset = map.get("offset").and_then(Value::as_i64).unwrap_or(0);
            Ok((index, offset.max(0)))
        }
        _ => anyhow::bail!("SKIP needs an offset"),
    }
}
