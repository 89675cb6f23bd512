//! Standing status poll.
//!
//! Polls fast while the built-in module is active and the jukebox plays,
//! slow otherwise.  Only edges of reachability are announced: the first
//! failure after a success and the first success after a failure (or at
//! startup).

use crate::controller::Controller;
use crate::session::SessionCall;
use std::sync::Arc;
use tracing::{debug, info};

impl Controller {
    pub(crate) async fn run_status_poll(self: Arc<Self>) {
        let token = self.token.clone();
        let mut connected = false;
        info!("status poll started");

        loop {
            let reached = tokio::select! {
                _ = token.cancelled() => break,
                reached = self.jukebox_call(SessionCall::Status, false) => reached,
            };

            if !reached {
                if connected && self.builtin_active().await {
                    self.change_connectivity(false).await;
                }
                connected = false;
            } else if !connected {
                connected = true;
                self.change_connectivity(true).await;
                if let Some(enabled) = self.settings.enable_video {
                    self.toggle_video_out(Some(enabled)).await;
                }
            }

            let interval = {
                let st = self.state.lock().await;
                if st.builtin_active() && st.playback.playing {
                    self.settings.poll_fast
                } else {
                    self.settings.poll_slow
                }
            };
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        debug!("status poll stopped");
    }
}
