//! Double-action gesture and the blocking yes/no ask.
//!
//! Both share the one `confirmation` slot of `SharedState`.

use crate::controller::Controller;
use crate::module::ModuleError;
use rumba_proto::{ActionId, Confirmation, Event};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// Outcome of the arm-or-fire gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Execute the action now.
    Proceed,
    /// Armed; the action runs on the next matching input.
    Wait,
    /// Another operation is in flight; the input is dropped.
    Busy,
}

impl Controller {
    /// Arm or fire `action`.  While another action is armed, `action` is
    /// armed in its place even if it needs no confirmation of its own.
    pub async fn check_double_action(&self, action: &ActionId) -> Result<Gate, ModuleError> {
        let armed = {
            let st = self.state.lock().await;
            if st.busy {
                return Ok(Gate::Busy);
            }
            st.confirm_target().cloned()
        };
        if armed.as_ref() == Some(action) {
            debug!("{} confirmed", action);
            self.change_confirm(None).await;
            return Ok(Gate::Proceed);
        }
        let armed_other = armed.is_some();

        let module = self.get_module(action.namespace()).await?;
        if armed_other || module.needs_confirm(action.function()) {
            self.change_confirm(Some(action.clone())).await;
            return Ok(Gate::Wait);
        }
        Ok(Gate::Proceed)
    }

    /// Arm (`Some`) or clear (`None`) the non-blocking confirmation.  Publishes
    /// only when the armed target actually changes.
    pub async fn change_confirm(&self, action: Option<ActionId>) {
        let prompt = match &action {
            Some(a) => self
                .loaded_module(a.namespace())
                .and_then(|m| m.confirm_text(a.function())),
            None => None,
        };

        let mut st = self.state.lock().await;
        if st.confirm_target() == action.as_ref() {
            return;
        }
        st.confirmation = action.clone().map(|target_action| Confirmation {
            target_action,
            prompt_text: prompt.clone(),
            awaiting_any_key: false,
        });
        self.bus.publish(
            Event::ConfirmationToggled {
                action,
                prompt,
                blocking: false,
            },
            &st,
        );
    }

    /// Show `prompt` and wait for the next input.  Any input answers yes
    /// except `MENU.TOGGLE` and `JUKEBOX.ENABLE`; no input within the menu
    /// timeout answers no.  `cancel_action` is the action the display
    /// offers for declining.
    pub async fn ask_confirm(self: &Arc<Self>, prompt: &str, cancel_action: ActionId) -> bool {
        self.reset_menu().await;

        let (tx, rx) = oneshot::channel();
        {
            let mut st = self.state.lock().await;
            st.confirmation = Some(Confirmation {
                target_action: cancel_action.clone(),
                prompt_text: Some(prompt.to_string()),
                awaiting_any_key: true,
            });
            // a previous ask still waiting is answered with no
            self.pending_ask
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .replace(tx);
            self.bus.publish(
                Event::ConfirmationToggled {
                    action: Some(cancel_action),
                    prompt: Some(prompt.to_string()),
                    blocking: true,
                },
                &st,
            );
        }

        let weak = Arc::downgrade(self);
        self.confirm_timer.start(self.settings.menu_timeout, async move {
            if let Some(ctl) = weak.upgrade() {
                debug!("confirmation timed out");
                ctl.answer_ask(false);
            }
        });

        let answer = rx.await.unwrap_or(false);
        debug!("confirmation answered: {}", answer);
        // a newer ask that replaced this one owns the display now
        if !self.ask_pending() {
            self.reset_menu().await;
        }
        answer
    }

    pub(crate) fn ask_pending(&self) -> bool {
        self.pending_ask
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Resolve the pending ask.  Returns false if nothing was waiting.
    pub(crate) fn answer_ask(&self, answer: bool) -> bool {
        let tx = self
            .pending_ask
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match tx {
            Some(tx) => tx.send(answer).is_ok(),
            None => false,
        }
    }
}
