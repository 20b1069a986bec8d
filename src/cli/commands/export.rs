//! Export command implementation.

use crate::cli::commands::open_manager;
use crate::error::Result;
use std::fs;
use std::path::PathBuf;

/// Write a JSON snapshot of every collection to stdout or `output`.
///
/// # Errors
///
/// Returns an error if the store is missing, a read fails, or the file
/// cannot be written.
pub fn execute(output: Option<&PathBuf>, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let odm = open_manager(db_path)?;
    let snapshot = odm.export_data()?;

    let Some(path) = output else {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(&snapshot)?)?;

    let records: usize = snapshot.data.values().map(Vec::len).sum();
    if json {
        let output = serde_json::json!({
            "path": path,
            "exported_at": snapshot.exported_at,
            "records": records,
        });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Exported {records} record(s) to {}", path.display());
    }
    Ok(())
}
