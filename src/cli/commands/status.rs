//! Status command implementation.

use crate::cli::commands::{format_ms, open_manager};
use crate::error::Result;
use crate::manager::{StorageStats, SyncStatus};
use crate::storage::schema::CURRENT_SCHEMA_VERSION;
use crate::sync::Connectivity;
use serde::Serialize;
use std::path::PathBuf;

/// Output for status command.
#[derive(Serialize)]
struct StatusOutput {
    schema_version: i32,
    storage: StorageStats,
    sync: SyncStatus,
}

/// Execute status command.
///
/// The CLI has no connectivity signal of its own, so the store is reported
/// as online and idle; `odm run` is what observes real transitions.
///
/// # Errors
///
/// Returns an error if the store is missing or a read fails.
pub fn execute(db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    use colored::Colorize;

    let odm = open_manager(db_path)?;
    let storage = odm.storage_stats()?;
    let sync = odm.sync_status(&Connectivity::default(), false)?;

    if json {
        let output = StatusOutput {
            schema_version: CURRENT_SCHEMA_VERSION,
            storage,
            sync,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!("{}", "Offline Store Status".bold());
    println!("====================");
    println!();
    println!("Schema: v{CURRENT_SCHEMA_VERSION}");
    println!();

    println!("{}", "Collections".bold());
    for (collection, count) in &storage.collections {
        let line = format!("  {:<20} {count}", collection.as_str());
        if *count == 0 {
            println!("{}", line.dimmed());
        } else {
            println!("{line}");
        }
    }
    println!("  {:<20} {}", "total", storage.total);
    println!();

    println!("{}", "Sync".bold());
    let depth = sync.queue_depth.to_string();
    println!(
        "  Pending:       {}",
        if sync.queue_depth == 0 { depth.green() } else { depth.yellow() }
    );
    println!(
        "  Last sync:     {}",
        sync.last_sync.map_or_else(|| "never".to_string(), format_ms)
    );
    if sync.dropped_last_24h > 0 {
        println!(
            "  Dropped (24h): {}",
            sync.dropped_last_24h.to_string().red()
        );
    } else {
        println!("  Dropped (24h): 0");
    }

    Ok(())
}
