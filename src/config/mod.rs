//! Configuration system (layered: code > env > settings file).

pub mod settings;

pub use settings::{
    AgentSettings, ContinuationSettings, FlushSettings, ProviderSettings, RequestSettings,
    Settings,
};

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use tracing::debug;

use crate::error::MoaiError;

/// Global default config (lazy-initialized from env and the settings file).
static DEFAULT_CONFIG: OnceLock<MoaiConfig> = OnceLock::new();

const KEY_ENV: &[(&str, &str)] = &[
    ("OPENAI_API_KEY", "openai"),
    ("OPENAI_COMPAT_API_KEY", "openai-compatible"),
    ("ANTHROPIC_API_KEY", "anthropic"),
    ("GOOGLE_API_KEY", "google"),
    ("GEMINI_API_KEY", "google"),
    ("ONESHOT_API_KEY", "oneshot"),
];

const URL_ENV: &[(&str, &str)] = &[
    ("OPENAI_BASE_URL", "openai"),
    ("OPENAI_COMPAT_BASE_URL", "openai-compatible"),
    ("ANTHROPIC_BASE_URL", "anthropic"),
    ("GOOGLE_BASE_URL", "google"),
    ("OLLAMA_BASE_URL", "ollama"),
    ("ONESHOT_BASE_URL", "oneshot"),
];

/// Layered configuration for moai.
///
/// Resolution order for API keys and base URLs:
/// 1. Explicit values (from env vars or `set_api_key` / `set_base_url`)
/// 2. `[providers.<name>]` entries of the settings file
///
/// Clones share the key maps.
#[derive(Debug, Clone, Default)]
pub struct MoaiConfig {
    api_keys: Arc<RwLock<HashMap<String, String>>>,
    base_urls: Arc<RwLock<HashMap<String, String>>>,
    settings: Arc<Settings>,
}

impl MoaiConfig {
    /// Create an empty config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the settings layer.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    /// Load from environment variables (OPENAI_API_KEY, ANTHROPIC_API_KEY, etc.).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let config = Self::new();

        for (env_var, provider) in KEY_ENV {
            if let Ok(key) = std::env::var(env_var) {
                config.set_api_key(provider, key);
            }
        }
        for (env_var, provider) in URL_ENV {
            if let Ok(url) = std::env::var(env_var) {
                config.set_base_url(provider, url);
            }
        }

        config
    }

    /// Environment plus the settings file at its default location.
    pub fn load() -> Result<Self, MoaiError> {
        let settings = match Settings::default_path() {
            Some(path) => {
                debug!(path = %path.display(), "loading settings");
                Settings::load(&path)?
            }
            None => Settings::default(),
        };
        Ok(Self::from_env().with_settings(settings))
    }

    /// Get (or create) the global default config.
    ///
    /// An unreadable settings file falls back to environment-only config.
    pub fn global() -> &'static MoaiConfig {
        DEFAULT_CONFIG.get_or_init(|| {
            Self::load().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "ignoring settings file");
                Self::from_env()
            })
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_api_key(&self, provider: &str, key: String) {
        self.api_keys
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(provider.to_string(), key);
    }

    /// Resolve an API key for a provider.
    pub fn get_api_key(&self, provider: &str) -> Option<String> {
        let explicit = self
            .api_keys
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(provider)
            .cloned();
        explicit.or_else(|| {
            self.settings
                .providers
                .get(provider)
                .and_then(|p| p.api_key.clone())
        })
    }

    pub fn set_base_url(&self, provider: &str, url: String) {
        self.base_urls
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(provider.to_string(), url);
    }

    pub fn get_base_url(&self, provider: &str) -> Option<String> {
        let explicit = self
            .base_urls
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(provider)
            .cloned();
        explicit.or_else(|| {
            self.settings
                .providers
                .get(provider)
                .and_then(|p| p.base_url.clone())
        })
    }

    /// Check if a provider has an API key configured.
    pub fn has_credentials(&self, provider: &str) -> bool {
        self.get_api_key(provider).is_some()
    }

    /// Per-request timeout from `[request] timeout_secs`.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.settings.request.timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_key_takes_precedence_over_settings_file() {
        let settings = Settings::from_toml(
            r#"
            [providers.openai]
            api_key = "file-key"
            base_url = "http://proxy.local/v1"
            "#,
        )
        .unwrap();
        let config = MoaiConfig::new().with_settings(settings);

        assert_eq!(config.get_api_key("openai"), Some("file-key".to_string()));
        assert_eq!(
            config.get_base_url("openai"),
            Some("http://proxy.local/v1".to_string())
        );

        config.set_api_key("openai", "env-key".to_string());
        assert_eq!(config.get_api_key("openai"), Some("env-key".to_string()));
    }

    #[test]
    fn clones_share_keys() {
        let config = MoaiConfig::new();
        let clone = config.clone();
        config.set_api_key("anthropic", "k".to_string());
        assert!(clone.has_credentials("anthropic"));
        assert!(!clone.has_credentials("google"));
    }

    #[test]
    fn request_timeout_comes_from_settings() {
        let config = MoaiConfig::new();
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(120)));

        let mut settings = Settings::default();
        settings.request.timeout_secs = None;
        assert_eq!(config.with_settings(settings).request_timeout(), None);
    }
}
