//! Configuration management.
//!
//! Everything lives under one global directory, `~/.odm/`:
//! - **Database**: `~/.odm/data/odm.db`
//! - **Settings**: `~/.odm/config.json`

pub mod settings;

pub use settings::{ApiSettings, CacheSettings, Settings, SyncSettings};

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Get the global directory location (`~/.odm/`).
#[must_use]
pub fn global_odm_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".odm"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `ODM_DB` environment variable
/// 3. Global location: `~/.odm/data/odm.db`
///
/// # Returns
///
/// Returns the path to the database file, or `None` if no location found.
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if let Ok(db_path) = std::env::var("ODM_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    global_odm_dir().map(|dir| dir.join("data").join("odm.db"))
}

/// Path of the settings file: `ODM_CONFIG`, else `~/.odm/config.json`.
///
/// # Errors
///
/// Returns `Config` if the home directory cannot be determined.
pub fn config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("ODM_CONFIG") {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    global_odm_dir()
        .map(|dir| dir.join("config.json"))
        .ok_or_else(|| Error::Config("Could not determine home directory".into()))
}

/// Load settings from the global file, apply environment overrides and validate.
///
/// # Errors
///
/// Returns `Config` if the file is unreadable, an override is malformed, or
/// the result is invalid.
pub fn load_settings() -> Result<Settings> {
    let mut settings = Settings::load_from(&config_path()?)?;
    settings.apply_env_overrides(|key| std::env::var(key).ok())?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let path = Path::new("/tmp/explicit.db");
        assert_eq!(resolve_db_path(Some(path)), Some(path.to_path_buf()));
    }

    #[test]
    fn test_global_layout() {
        if std::env::var("ODM_DB").is_ok() {
            return;
        }
        if let Some(path) = resolve_db_path(None) {
            assert!(path.ends_with(".odm/data/odm.db"));
        }
    }
}
