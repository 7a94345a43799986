use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::backend::{JobBackend, create_backend};
use crate::settings::SettingsStore;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub settings: Arc<SettingsStore>,
    pub backend: Arc<dyn JobBackend>,
}

impl AppContext {
    pub fn new(config: AppConfig, settings: SettingsStore) -> Self {
        let backend = create_backend(&config);
        Self {
            config: Arc::new(config),
            settings: Arc::new(settings),
            backend,
        }
    }
}
