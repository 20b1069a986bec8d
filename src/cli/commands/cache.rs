//! Cache command implementations.

use crate::cli::CacheCommands;
use crate::cli::commands::{open_manager, parse_json_arg};
use crate::error::Result;
use std::path::PathBuf;
use std::time::Duration;

/// Execute cache commands.
///
/// # Errors
///
/// Returns an error if the store is missing, an argument is malformed, or
/// the operation fails.
pub fn execute(command: &CacheCommands, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    match command {
        CacheCommands::Put { key, payload, ttl } => put(key, payload, *ttl, db_path, json),
        CacheCommands::Get { key } => get(key, db_path, json),
        CacheCommands::Sweep => sweep(db_path, json),
    }
}

fn put(key: &str, payload: &str, ttl: Option<u64>, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let payload = parse_json_arg("payload", payload)?;
    let odm = open_manager(db_path)?;
    let ttl = ttl.map(Duration::from_secs);
    odm.put_cached(key, payload, ttl)?;

    let ttl_secs = ttl.unwrap_or(odm.cache().ttls().api_cache).as_secs();
    if json {
        let output = serde_json::json!({ "key": key, "ttl_secs": ttl_secs });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Cached {key} for {ttl_secs}s");
    }
    Ok(())
}

fn get(key: &str, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let odm = open_manager(db_path)?;
    let cached = odm.get_cached(key)?;

    if json {
        let output = serde_json::json!({ "key": key, "hit": cached.is_some(), "data": cached });
        println!("{}", serde_json::to_string(&output)?);
    } else if let Some(data) = cached {
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("Cache miss: {key}");
    }
    Ok(())
}

fn sweep(db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let odm = open_manager(db_path)?;
    let removed = odm.cache().sweep_expired()?;

    if json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else {
        println!("Removed {removed} expired entries");
    }
    Ok(())
}
