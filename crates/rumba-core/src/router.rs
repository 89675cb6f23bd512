//! Entry point for every input device.
//!
//! ```text
//!   on_input(action, value)
//!     │ blocking ask pending ──► answer it, done
//!     │ MENU.TOGGLE          ──► next page / close confirmation / ENABLE
//!     │ MENU.<n>             ──► action in slot n of the visible menu
//!     ▼
//!   KEY.<combo>             ──► key injection
//!   <MODULE>.<FUNCTION>     ──► double-action gate ──► module.invoke
//! ```

use crate::confirm::Gate;
use crate::controller::Controller;
use futures_util::FutureExt;
use rumba_proto::{ActionId, Event, Target, BUILTIN_MODULE};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

enum Routed {
    /// The input answered a blocking ask.
    Answered,
    Handled,
}

impl Controller {
    /// Handle one raw input.  Failures and panics of module handlers are
    /// logged; the router stays usable.
    pub async fn on_input(self: &Arc<Self>, action: &str, value: Option<serde_json::Value>) {
        debug!("on_input: {}({:?})", action, value);
        if self.is_closed() {
            return;
        }
        self.publish(Event::UserInput).await;

        match self.route(action, value).await {
            Ok(Routed::Answered) => return,
            Ok(Routed::Handled) => {}
            Err(e) => warn!("input {} failed: {:#}", action, e),
        }

        // the menu stays up while another module holds control
        if self.builtin_active().await && !self.is_closed() {
            self.restart_menu_timer();
        }
    }

    async fn route(
        self: &Arc<Self>,
        raw: &str,
        value: Option<serde_json::Value>,
    ) -> anyhow::Result<Routed> {
        if self.ask_pending() {
            let deny = ActionId::parse(raw).is_ok_and(|a| is_deny(&a));
            debug!("{} confirmation request", if deny { "denying" } else { "accepting" });
            self.confirm_timer.cancel();
            self.answer_ask(!deny);
            return Ok(Routed::Answered);
        }

        let action = match self.resolve_menu(ActionId::parse(raw)?).await {
            Some(action) => action,
            None => return Ok(Routed::Handled),
        };

        match action.target() {
            Target::Key(combo) => self.press_key(combo).await?,
            Target::Module { module, function } => {
                match self.check_double_action(&action).await? {
                    Gate::Proceed => {
                        let handler = self.get_module(module).await?;
                        AssertUnwindSafe(handler.invoke(self, function, value))
                            .catch_unwind()
                            .await
                            .map_err(|_| anyhow::anyhow!("{} panicked", action))??;
                    }
                    Gate::Wait => debug!("{} armed", action),
                    Gate::Busy => debug!("{} dropped, busy", action),
                }
            }
            Target::MenuToggle | Target::MenuInert | Target::MenuSlot(_) => {
                debug!("menu slot holds menu action {}, ignored", action);
            }
        }
        Ok(Routed::Handled)
    }

    /// Map menu keys onto the action they stand for.  `None` when the input
    /// was fully handled by the menu itself.
    async fn resolve_menu(&self, action: ActionId) -> Option<ActionId> {
        match action.target() {
            Target::MenuToggle => {
                let (builtin, armed, page) = {
                    let st = self.state.lock().await;
                    (
                        st.builtin_active(),
                        st.confirmation.is_some(),
                        st.menu.active_page,
                    )
                };
                if !builtin {
                    // an external module is running: toggle means "back"
                    return Some(ActionId::new(BUILTIN_MODULE, "ENABLE"));
                }
                if armed {
                    self.change_confirm(None).await;
                } else {
                    let rows = self.settings.menu_rows.len().max(1);
                    let next = page.map_or(0, |p| (p + 1) % rows);
                    self.update_menu(Some(next)).await;
                }
                None
            }
            Target::MenuInert => None,
            Target::MenuSlot(slot) => {
                let item = self
                    .state
                    .lock()
                    .await
                    .menu
                    .visible_items
                    .get(slot - 1)
                    .cloned();
                if item.is_none() {
                    debug!("menu slot {} is empty", slot);
                }
                item
            }
            Target::Key(_) | Target::Module { .. } => Some(action),
        }
    }
}

/// Inputs that answer a blocking ask with "no".
fn is_deny(action: &ActionId) -> bool {
    matches!(action.as_str(), "MENU.TOGGLE" | "JUKEBOX.ENABLE")
}
