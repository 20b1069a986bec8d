//! User settings.
//!
//! Loaded from `~/.odm/config.json`; every field has a default, so a
//! missing file or a partial one is fine. Environment variables override
//! the file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::cache::CacheTtls;
use crate::error::{Error, Result};
use crate::sync::ProcessorConfig;

/// Sync queue and scheduling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Whether `odm run` schedules drains at all.
    pub enabled: bool,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub batch_size: usize,
    pub interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            retry_delay_ms: 5_000,
            batch_size: 50,
            interval_secs: 60,
        }
    }
}

/// Cache TTLs, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub api_cache_secs: u64,
    pub tickets_secs: u64,
    pub events_secs: u64,
    pub notifications_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let ttls = CacheTtls::default();
        Self {
            api_cache_secs: ttls.api_cache.as_secs(),
            tickets_secs: ttls.tickets.as_secs(),
            events_secs: ttls.events.as_secs(),
            notifications_secs: ttls.notifications.as_secs(),
        }
    }
}

/// Server API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 30,
        }
    }
}

/// All settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sync: SyncSettings,
    pub cache: CacheSettings,
    pub api: ApiSettings,
}

impl Settings {
    /// Load from `path`, falling back to defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))
    }

    /// Write to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {e}")))
    }

    /// Apply `ODM_API_URL` and `ODM_MAX_RETRIES` from `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `ODM_MAX_RETRIES` is not a number.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("ODM_API_URL").filter(|v| !v.trim().is_empty()) {
            self.api.base_url = url.trim().to_string();
        }

        if let Some(raw) = lookup("ODM_MAX_RETRIES").filter(|v| !v.trim().is_empty()) {
            self.sync.max_retries = raw.trim().parse().map_err(|_| {
                Error::Config(format!("ODM_MAX_RETRIES must be a positive integer, got `{raw}`"))
            })?;
        }

        Ok(())
    }

    /// Reject settings the sync engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.sync.max_retries == 0 {
            return Err(Error::Config("sync.max_retries must be at least 1".to_string()));
        }
        if self.sync.batch_size == 0 {
            return Err(Error::Config("sync.batch_size must be at least 1".to_string()));
        }
        if self.sync.interval_secs == 0 {
            return Err(Error::Config("sync.interval_secs must be at least 1".to_string()));
        }
        if self.api.timeout_secs == 0 {
            return Err(Error::Config("api.timeout_secs must be at least 1".to_string()));
        }
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(Error::Config(format!(
                "api.base_url must be an http(s) URL, got `{}`",
                self.api.base_url
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            max_retries: self.sync.max_retries,
            retry_delay: Duration::from_millis(self.sync.retry_delay_ms),
            batch_size: self.sync.batch_size,
        }
    }

    #[must_use]
    pub fn cache_ttls(&self) -> CacheTtls {
        CacheTtls {
            api_cache: Duration::from_secs(self.cache.api_cache_secs),
            tickets: Duration::from_secs(self.cache.tickets_secs),
            events: Duration::from_secs(self.cache.events_secs),
            notifications: Duration::from_secs(self.cache.notifications_secs),
        }
    }

    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    #[must_use]
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.sync.enabled);
        assert_eq!(settings.processor_config(), ProcessorConfig::default());
        assert_eq!(settings.cache_ttls(), CacheTtls::default());
        assert_eq!(settings.api.base_url, "http://localhost:8000");
        settings.validate().unwrap();
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = Settings::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"sync": {"max_retries": 5}}"#).unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.sync.max_retries, 5);
        assert_eq!(settings.sync.batch_size, 50);
        assert_eq!(settings.api.timeout_secs, 30);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut settings = Settings::default();
        settings.api.base_url = "https://tickets.example.com".to_string();
        settings.save_to(&path).unwrap();

        assert_eq!(Settings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(Settings::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_env_overrides(env(&[
                ("ODM_API_URL", "https://api.example.com"),
                ("ODM_MAX_RETRIES", "7"),
            ]))
            .unwrap();
        assert_eq!(settings.api.base_url, "https://api.example.com");
        assert_eq!(settings.sync.max_retries, 7);

        let err = settings
            .apply_env_overrides(env(&[("ODM_MAX_RETRIES", "lots")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        let mut settings = Settings::default();
        settings.sync.max_retries = 0;
        assert!(matches!(settings.validate(), Err(Error::Config(_))));

        let mut settings = Settings::default();
        settings.sync.batch_size = 0;
        assert!(matches!(settings.validate(), Err(Error::Config(_))));

        let mut settings = Settings::default();
        settings.api.base_url = "localhost".to_string();
        assert!(settings.validate().is_err());
    }
}
