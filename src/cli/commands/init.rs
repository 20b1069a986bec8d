//! Create the local store.
//!
//! The database lives at `~/.odm/data/odm.db` unless `--db` or `ODM_DB`
//! say otherwise. Opening it applies every migration, so a freshly
//! initialized store is immediately usable.

use crate::clock::system_clock;
use crate::config::resolve_db_path;
use crate::error::{Error, Result};
use crate::storage::RecordStore;
use crate::storage::schema::CURRENT_SCHEMA_VERSION;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct InitOutput {
    database: PathBuf,
    schema_version: i32,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns `AlreadyInitialized` if the store exists and `force` is not set,
/// or an error if the directory or database cannot be created.
pub fn execute(db_path: Option<&PathBuf>, force: bool, json: bool) -> Result<()> {
    let db_path = resolve_db_path(db_path.map(|p| p.as_path())).ok_or_else(|| {
        Error::Config("Could not determine the database location".to_string())
    })?;

    if db_path.exists() {
        if !force {
            return Err(Error::AlreadyInitialized { path: db_path });
        }
        remove_store(&db_path)?;
    }

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }

    RecordStore::open(&db_path, system_clock())?;

    if json {
        let output = InitOutput {
            database: db_path,
            schema_version: CURRENT_SCHEMA_VERSION,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Initialized offline store");
        println!("  Database: {}", db_path.display());
        println!("  Schema:   v{CURRENT_SCHEMA_VERSION}");
    }

    Ok(())
}

/// Delete the database and its WAL sidecars.
fn remove_store(db_path: &Path) -> Result<()> {
    fs::remove_file(db_path)?;
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = db_path.as_os_str().to_owned();
        sidecar.push(suffix);
        let sidecar = PathBuf::from(sidecar);
        if sidecar.exists() {
            fs::remove_file(sidecar)?;
        }
    }
    Ok(())
}
