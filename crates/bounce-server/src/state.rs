use crate::{config::ServerConfig, registry::ConnectionRegistry, sync::SyncStore};

pub struct AppState {
    pub config: ServerConfig,
    pub registry: ConnectionRegistry,
    pub sync: SyncStore,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let sync = SyncStore::new(&config.storage_dir);
        Self {
            config,
            registry: ConnectionRegistry::new(),
            sync,
        }
    }
}
