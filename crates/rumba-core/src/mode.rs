//! Exclusive-control transitions, lazy module resolution and menu rendering.

use crate::controller::Controller;
use crate::module::{Module, ModuleError};
use rumba_proto::action::{KEY_NAMESPACE, MENU_NAMESPACE};
use rumba_proto::{ActionId, Event, MenuState, BUILTIN_MODULE};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl Controller {
    /// Resolve a module namespace, constructing and subscribing the module
    /// on first use.  A failure is a configuration error and shuts the
    /// controller down before it is returned.
    pub async fn get_module(&self, name: &str) -> Result<Arc<dyn Module>, ModuleError> {
        let name = name.to_uppercase();
        if let Some(module) = self.loaded_module(&name) {
            return Ok(module);
        }

        let loaded = match self.registry.construct(&name, self.module_configs.get(&name)) {
            Ok(loaded) => loaded,
            Err(e) => {
                self.fail(&e).await;
                return Err(e);
            }
        };

        let module = {
            let mut modules = self.modules.lock().unwrap_or_else(|e| e.into_inner());
            // another caller may have won the race
            if let Some(existing) = modules.get(&name) {
                return Ok(existing.module.clone());
            }
            modules.insert(name.clone(), loaded.clone());
            loaded.module.clone()
        };
        self.bus.subscribe(&name, loaded.observer);
        debug!("module {} registered", name);
        Ok(module)
    }

    /// An already constructed module.
    pub fn loaded_module(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&name.to_uppercase())
            .map(|m| m.module.clone())
    }

    pub async fn active_module(&self) -> String {
        self.state.lock().await.active_module.clone()
    }

    pub async fn builtin_active(&self) -> bool {
        self.state.lock().await.builtin_active()
    }

    // ── Mode switches ─────────────────────────────────────────────────────

    /// Hand exclusive control to `target`, or back to the built-in module.
    /// Dropped when another operation is in flight.
    pub async fn change_mode(self: &Arc<Self>, target: Option<&str>) -> Result<(), ModuleError> {
        if !self.try_set_busy().await {
            debug!("mode change dropped, busy");
            return Ok(());
        }
        let result = self.switch_module(target).await;
        self.clear_busy().await;
        result
    }

    async fn switch_module(self: &Arc<Self>, target: Option<&str>) -> Result<(), ModuleError> {
        let next_name = target.unwrap_or(BUILTIN_MODULE).to_uppercase();
        let next = self.get_module(&next_name).await?;

        let current_name = self.active_module().await;
        if let Some(current) = self.loaded_module(&current_name) {
            info!("stopping {}", current_name);
            if let Err(e) = current.stop(self).await {
                warn!("{} failed to stop: {:#}", current_name, e);
            }
        }

        self.state.lock().await.active_module = next_name.clone();
        self.update_menu(None).await;

        info!("starting {}", next_name);
        if let Err(e) = next.start(self).await {
            warn!("{} failed to start: {:#}", next_name, e);
        }
        self.update_menu(None).await;

        self.publish(Event::ModeChanged { module: next_name }).await;
        Ok(())
    }

    /// Restart the active module in place.
    pub async fn reset_mode(self: &Arc<Self>) {
        if !self.try_set_busy().await {
            debug!("mode reset dropped, busy");
            return;
        }
        let name = self.active_module().await;
        if let Some(module) = self.loaded_module(&name) {
            info!("resetting {}", name);
            if let Err(e) = module.stop(self).await {
                warn!("{} failed to stop: {:#}", name, e);
            }
            if let Err(e) = module.start(self).await {
                warn!("{} failed to start: {:#}", name, e);
            }
        }
        self.clear_busy().await;
    }

    // ── Menu ──────────────────────────────────────────────────────────────

    /// Recompute the visible menu for `page` (`None` hides the page menu)
    /// and publish it.  Closes any armed confirmation.
    pub async fn update_menu(&self, page: Option<usize>) {
        let (builtin, active, starred) = {
            let st = self.state.lock().await;
            let starred = st.playback.current_track().is_some_and(|t| t.starred);
            (st.builtin_active(), st.active_module.clone(), starred)
        };

        let (page, items) = if builtin {
            let row = self
                .settings
                .menu_rows
                .get(page.unwrap_or(0))
                .or_else(|| self.settings.menu_rows.first())
                .cloned()
                .unwrap_or_default();
            let mut items = Vec::with_capacity(row.len());
            for item in row {
                items.push(self.render_item(item, starred).await);
            }
            (page, items)
        } else {
            let items = match self.loaded_module(&active) {
                Some(module) => module.menu_items(),
                None => Vec::new(),
            };
            (Some(0), items)
        };

        self.change_confirm(None).await;
        let mut st = self.state.lock().await;
        st.menu = MenuState {
            active_page: page,
            visible_items: items.clone(),
        };
        self.bus.publish(Event::MenuToggled { page, items }, &st);
    }

    async fn render_item(&self, item: ActionId, starred: bool) -> ActionId {
        let ns = item.namespace();
        if ns == BUILTIN_MODULE {
            if item.function() == "STAR" && starred {
                return ActionId::new(BUILTIN_MODULE, "UNSTAR");
            }
            return item;
        }
        if ns == KEY_NAMESPACE || ns == MENU_NAMESPACE {
            return item;
        }
        match self.get_module(ns).await {
            Ok(module) => module.icon(item.function()),
            Err(_) => item,
        }
    }

    /// Hide the page menu and close any armed confirmation.
    pub async fn reset_menu(&self) {
        debug!("hiding menu");
        self.change_confirm(None).await;
        self.update_menu(None).await;
    }

    /// (Re)start the menu auto-hide countdown.
    pub fn restart_menu_timer(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.menu_timer.start(self.settings.menu_timeout, async move {
            if let Some(ctl) = weak.upgrade() {
                ctl.reset_menu().await;
            }
        });
    }
}
