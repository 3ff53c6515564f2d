use crate::batching::BatchLimits;
use crate::cache::CacheConfig;
use crate::ports::InMemorySettings;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Application configuration
/// In debug builds: loads .env first, then reads `DECKPORT_*` variables
/// In release builds: reads `DECKPORT_*` variables only
#[derive(Clone, Debug)]
pub struct Config {
    /// Override for the library directory
    pub library_path: Option<PathBuf>,
    pub scryfall_base_url: String,
    pub mpc_base_url: String,
    pub mpc_image_url_prefix: String,
    pub user_agent: String,
    /// Transport timeout for provider requests; none by default
    pub request_timeout: Option<Duration>,
    pub cache: CacheConfig,
    pub batch_limits: BatchLimits,
    pub auto_import_tokens: bool,
    pub prefer_mpc_art: bool,
    pub default_back_image_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            library_path: None,
            scryfall_base_url: "https://api.scryfall.com".to_string(),
            mpc_base_url: "https://mpcfill.com".to_string(),
            mpc_image_url_prefix: "https://drive.google.com/uc?export=download&id=".to_string(),
            user_agent: concat!("deckport/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: None,
            cache: CacheConfig::default(),
            batch_limits: BatchLimits::default(),
            auto_import_tokens: false,
            prefer_mpc_art: false,
            default_back_image_id: None,
        }
    }
}

impl Config {
    /// Load configuration based on build mode
    pub fn load() -> Self {
        #[cfg(debug_assertions)]
        {
            // Try to load .env file
            if dotenvy::dotenv().is_ok() {
                info!("Config: Dev mode activated - loaded .env file");
            } else {
                info!("Config: No .env file found, using environment only");
            }
        }

        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build a configuration from a variable lookup, falling back to defaults
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        let limits = defaults.batch_limits.clone();

        let config = Config {
            library_path: var("DECKPORT_LIBRARY_PATH").map(PathBuf::from),
            scryfall_base_url: var("DECKPORT_SCRYFALL_URL").unwrap_or(defaults.scryfall_base_url),
            mpc_base_url: var("DECKPORT_MPC_URL").unwrap_or(defaults.mpc_base_url),
            mpc_image_url_prefix: var("DECKPORT_MPC_IMAGE_URL_PREFIX")
                .unwrap_or(defaults.mpc_image_url_prefix),
            user_agent: var("DECKPORT_USER_AGENT").unwrap_or(defaults.user_agent),
            request_timeout: parsed::<u64>(&var, "DECKPORT_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs),
            cache: CacheConfig {
                ttl: parsed::<u64>(&var, "DECKPORT_CACHE_TTL_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.cache.ttl),
                max_entries: parsed(&var, "DECKPORT_CACHE_MAX_ENTRIES")
                    .unwrap_or(defaults.cache.max_entries),
            },
            batch_limits: BatchLimits {
                alt_art_chunk: parsed(&var, "DECKPORT_ALT_ART_CHUNK").unwrap_or(limits.alt_art_chunk),
                token_chunk: parsed(&var, "DECKPORT_TOKEN_CHUNK").unwrap_or(limits.token_chunk),
                collection_chunk: parsed(&var, "DECKPORT_COLLECTION_CHUNK")
                    .unwrap_or(limits.collection_chunk),
                image_concurrency: parsed(&var, "DECKPORT_IMAGE_CONCURRENCY")
                    .unwrap_or(limits.image_concurrency),
                catalog_delay: parsed::<u64>(&var, "DECKPORT_CATALOG_DELAY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(limits.catalog_delay),
            },
            auto_import_tokens: flag(&var, "DECKPORT_AUTO_IMPORT_TOKENS"),
            prefer_mpc_art: flag(&var, "DECKPORT_PREFER_MPC_ART"),
            default_back_image_id: var("DECKPORT_DEFAULT_BACK_IMAGE_ID").filter(|v| !v.is_empty()),
        };

        if let Some(path) = &config.library_path {
            info!("Config: Library path override: {}", path.display());
        }
        config
    }

    /// Get the library storage path
    pub fn get_library_path(&self) -> PathBuf {
        if let Some(path) = &self.library_path {
            return path.clone();
        }

        // Default: ~/.deckport/
        match dirs::home_dir() {
            Some(home_dir) => home_dir.join(".deckport"),
            None => {
                warn!("Config: No home directory, using ./.deckport");
                PathBuf::from(".deckport")
            }
        }
    }

    /// Path of the SQLite library database
    pub fn database_path(&self) -> PathBuf {
        self.get_library_path().join("library.db")
    }

    /// HTTP client shared by every provider
    pub fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder().user_agent(&self.user_agent);
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        builder.build()
    }

    /// Import settings seeded from this configuration
    pub fn settings(&self) -> InMemorySettings {
        let settings = InMemorySettings::new();
        settings.set_auto_import_tokens(self.auto_import_tokens);
        settings.set_prefer_mpc_art(self.prefer_mpc_art);
        settings.set_default_back_image_id(self.default_back_image_id.clone());
        settings
    }
}

fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let value = var(name)?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Config: Ignoring invalid {}={:?}", name, value);
            None
        }
    }
}

fn flag(var: &impl Fn(&str) -> Option<String>, name: &str) -> bool {
    var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ImportSettings;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.batch_limits, BatchLimits::default());
        assert_eq!(config.cache.ttl, Duration::from_secs(60));
        assert_eq!(config.cache.max_entries, 500);
        assert_eq!(config.request_timeout, None);
        assert!(config.get_library_path().ends_with(".deckport"));
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = config_from(&[
            ("DECKPORT_LIBRARY_PATH", "/tmp/deckport-test"),
            ("DECKPORT_COLLECTION_CHUNK", "20"),
            ("DECKPORT_CATALOG_DELAY_MS", "250"),
            ("DECKPORT_IMAGE_CONCURRENCY", "lots"),
            ("DECKPORT_AUTO_IMPORT_TOKENS", "TRUE"),
        ]);

        assert_eq!(config.database_path(), PathBuf::from("/tmp/deckport-test/library.db"));
        assert_eq!(config.batch_limits.collection_chunk, 20);
        assert_eq!(config.batch_limits.catalog_delay, Duration::from_millis(250));
        assert_eq!(config.batch_limits.image_concurrency, 10);
        assert!(config.settings().auto_import_tokens());
        assert!(!config.settings().prefer_mpc_art());
    }
}
