//! Run the sync coordinator in the foreground.

use crate::cli::commands::open_manager;
use crate::error::{Error, Result};
use crate::sync::{Connectivity, SyncBus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Drain on the configured schedule until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the store is missing, sync is disabled in settings,
/// or the runtime cannot start.
pub fn execute(db_path: Option<&PathBuf>, offline: bool, json: bool) -> Result<()> {
    let odm = open_manager(db_path)?;
    if !odm.settings().sync.enabled {
        return Err(Error::Config(
            "sync is disabled (sync.enabled = false in config.json)".to_string(),
        ));
    }

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))?;

    rt.block_on(async {
        let processor = Arc::new(odm.processor(odm.http_api()));
        let connectivity = Connectivity::new(!offline);
        let coordinator = odm.coordinator(processor, connectivity, SyncBus::default());
        let instance = coordinator.id();

        if json {
            let output = serde_json::json!({
                "instance": instance,
                "server": odm.settings().api.base_url,
                "interval_secs": odm.settings().sync.interval_secs,
            });
            println!("{}", serde_json::to_string(&output)?);
        } else {
            println!(
                "Syncing with {} every {}s (Ctrl-C to stop)",
                odm.settings().api.base_url,
                odm.settings().sync.interval_secs
            );
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(coordinator.run(shutdown_rx));

        tokio::signal::ctrl_c().await?;
        info!("Interrupt received");
        // The receiver only goes away if the coordinator already exited.
        let _ = shutdown_tx.send(true);

        handle
            .await
            .map_err(|e| Error::Other(format!("Coordinator task failed: {e}")))??;
        Ok::<(), Error>(())
    })
}
