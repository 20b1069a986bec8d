//! Collection access commands: put, get, list, delete, clear.

use crate::cli::commands::{open_manager, parse_json_arg};
use crate::error::Result;
use crate::model::{Collection, Record, RecordKey};
use std::path::PathBuf;

/// Write a document.
///
/// # Errors
///
/// Returns an error if the collection is unknown, the document is not a
/// JSON object with its key, or the write fails.
pub fn execute_put(collection: &str, document: &str, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let collection: Collection = collection.parse()?;
    let doc = parse_json_arg("document", document)?;
    let odm = open_manager(db_path)?;
    let key = odm.put(collection, &doc)?;

    if json {
        let output = serde_json::json!({ "collection": collection, "key": key });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Stored {collection}/{key}");
    }
    Ok(())
}

/// Read one record.
///
/// # Errors
///
/// Returns `RecordNotFound` if the record is absent or expired.
pub fn execute_get(collection: &str, key: &str, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let collection: Collection = collection.parse()?;
    let key = RecordKey::parse_loose(key);
    let odm = open_manager(db_path)?;

    let record = odm.get(collection, &key)?.ok_or_else(|| {
        crate::error::StoreError::NotFound {
            collection: collection.to_string(),
            key: key.to_string(),
        }
    })?;

    if json {
        println!("{}", serde_json::to_string(&record)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&record.data)?);
    }
    Ok(())
}

/// List live records, optionally by secondary index.
///
/// # Errors
///
/// Returns an error if the collection or index is unknown or the read fails.
pub fn execute_list(
    collection: &str,
    index: Option<&str>,
    value: Option<&str>,
    db_path: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let collection: Collection = collection.parse()?;
    let odm = open_manager(db_path)?;

    let records: Vec<Record> = match (index, value) {
        (Some(index), Some(raw)) => {
            let value = serde_json::from_str(raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
            odm.store().find_by_index(collection, index, &value)?
        }
        _ => odm.get_all(collection)?,
    };

    if json {
        println!("{}", serde_json::to_string(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No records in {collection}.");
        return Ok(());
    }

    println!("{collection} ({}):", records.len());
    for record in &records {
        println!("  {}  {}", record.key, record.data);
    }
    Ok(())
}

/// Delete one record. Absent keys succeed.
///
/// # Errors
///
/// Returns an error if the collection is unknown or the delete fails.
pub fn execute_delete(collection: &str, key: &str, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let collection: Collection = collection.parse()?;
    let key = RecordKey::parse_loose(key);
    let odm = open_manager(db_path)?;
    let deleted = odm.delete(collection, &key)?;

    if json {
        let output = serde_json::json!({ "collection": collection, "key": key, "deleted": deleted });
        println!("{}", serde_json::to_string(&output)?);
    } else if deleted {
        println!("Deleted {collection}/{key}");
    } else {
        println!("Nothing to delete at {collection}/{key}");
    }
    Ok(())
}

/// Remove every record of a collection.
///
/// # Errors
///
/// Returns an error if the collection is unknown or the delete fails.
pub fn execute_clear(collection: &str, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let collection: Collection = collection.parse()?;
    let odm = open_manager(db_path)?;
    let removed = odm.clear(collection)?;

    if json {
        let output = serde_json::json!({ "collection": collection, "removed": removed });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Cleared {removed} record(s) from {collection}");
    }
    Ok(())
}
