//! One-shot drain against the configured server.

use crate::cli::commands::open_manager;
use crate::error::{Error, Result};
use crate::sync::{DrainOutcome, DrainStats};
use std::path::PathBuf;

/// Drain one batch of the queue and report what happened.
///
/// Dispatch failures are recorded on the items; they do not fail the command.
///
/// # Errors
///
/// Returns an error if the store is missing or a store operation fails.
pub fn execute(db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let odm = open_manager(db_path)?;
    let processor = odm.processor(odm.http_api());

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))?;
    let outcome = rt.block_on(processor.drain(true))?;

    let stats = match outcome {
        DrainOutcome::Completed(stats) => stats,
        DrainOutcome::Offline | DrainOutcome::AlreadyDraining => DrainStats::default(),
    };
    let remaining = odm.queue().depth()?;

    if json {
        let output = serde_json::json!({
            "stats": stats,
            "remaining": remaining,
            "server": odm.settings().api.base_url,
        });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Sync against {}", odm.settings().api.base_url);
        println!(
            "  Attempted: {}  Applied: {}  Retrying: {}  Dropped: {}  Waiting: {}",
            stats.attempted, stats.succeeded, stats.retried, stats.dropped, stats.skipped
        );
        println!("  Remaining in queue: {remaining}");
    }
    Ok(())
}
