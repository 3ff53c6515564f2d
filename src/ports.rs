// Host-facing ports the orchestrator talks to: user notifications and import
// settings. Both are injected so hosts and tests can supply their own.

use std::sync::RwLock;
use tracing::{error, info};

/// User-facing notifications
pub trait Notifier: Send + Sync {
    fn show_success(&self, message: &str);
    fn show_error(&self, message: &str);
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn show_success(&self, message: &str) {
        info!("✓ {}", message);
    }

    fn show_error(&self, message: &str) {
        error!("✗ {}", message);
    }
}

/// Settings read at the start of every run
pub trait ImportSettings: Send + Sync {
    /// Import the tokens created by imported cards after each run
    fn auto_import_tokens(&self) -> bool;
    /// Back image used when an intent links none
    fn default_back_image_id(&self) -> Option<String>;
    /// Try the alternate-art index before the catalog for name-only intents
    fn prefer_mpc_art(&self) -> bool;
}

#[derive(Debug, Clone, Default)]
struct SettingsValues {
    auto_import_tokens: bool,
    default_back_image_id: Option<String>,
    prefer_mpc_art: bool,
}

/// Settings held in memory, changeable at runtime
#[derive(Debug, Default)]
pub struct InMemorySettings {
    values: RwLock<SettingsValues>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_auto_import_tokens(&self, enabled: bool) {
        self.write().auto_import_tokens = enabled;
    }

    pub fn set_default_back_image_id(&self, image_id: Option<String>) {
        self.write().default_back_image_id = image_id;
    }

    pub fn set_prefer_mpc_art(&self, enabled: bool) {
        self.write().prefer_mpc_art = enabled;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SettingsValues> {
        self.values.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SettingsValues> {
        self.values.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ImportSettings for InMemorySettings {
    fn auto_import_tokens(&self) -> bool {
        self.read().auto_import_tokens
    }

    fn default_back_image_id(&self) -> Option<String> {
        self.read().default_back_image_id.clone()
    }

    fn prefer_mpc_art(&self) -> bool {
        self.read().prefer_mpc_art
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_settings() {
        let settings = InMemorySettings::new();
        assert!(!settings.auto_import_tokens());
        assert_eq!(settings.default_back_image_id(), None);

        settings.set_auto_import_tokens(true);
        settings.set_default_back_image_id(Some("back-1".to_string()));
        settings.set_prefer_mpc_art(true);

        assert!(settings.auto_import_tokens());
        assert_eq!(settings.default_back_image_id().as_deref(), Some("back-1"));
        assert!(settings.prefer_mpc_art());
    }
}
