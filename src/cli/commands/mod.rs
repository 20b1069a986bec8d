//! Command implementations.

pub mod cache;
pub mod completions;
pub mod export;
pub mod init;
pub mod queue;
pub mod records;
pub mod run;
pub mod status;
pub mod sync;
pub mod version;

use std::path::PathBuf;

use crate::clock::system_clock;
use crate::config::{load_settings, resolve_db_path};
use crate::error::{Error, Result};
use crate::manager::OfflineDataManager;

/// Open the manager over an initialized store.
///
/// # Errors
///
/// Returns `NotInitialized` if the store file does not exist, or any
/// settings or open failure.
pub(crate) fn open_manager(db_path: Option<&PathBuf>) -> Result<OfflineDataManager> {
    let db_path = resolve_db_path(db_path.map(|p| p.as_path())).ok_or(Error::NotInitialized)?;

    if !db_path.exists() {
        return Err(Error::NotInitialized);
    }

    OfflineDataManager::open(&db_path, load_settings()?, system_clock())
}

/// Parse a JSON argument, naming the argument on failure.
pub(crate) fn parse_json_arg(what: &str, raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw)
        .map_err(|e| Error::InvalidArgument(format!("{what} is not valid JSON: {e}")))
}

/// Render Unix milliseconds for humans.
pub(crate) fn format_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map_or_else(|| ms.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}
