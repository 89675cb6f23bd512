mod jukebox;
mod system;

pub use jukebox::JukeboxModule;
pub use system::{SystemModule, SYSTEM_MODULE};

use crate::module::ModuleRegistry;

/// Registry with every module shipped in this crate.
pub fn default_registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry.register(SYSTEM_MODULE, SystemModule::from_config);
    registry
}
