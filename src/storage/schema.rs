//! Connection setup and schema inspection.
//!
//! The collection tables themselves live in the embedded migrations; this
//! module applies connection pragmas and drives the upgrade on open.

use rusqlite::Connection;

use crate::error::Result;
use crate::model::Collection;

pub use super::migrations::CURRENT_SCHEMA_VERSION;

/// Prepare a freshly opened connection and upgrade its schema.
///
/// Must run before any read or write is served.
///
/// # Errors
///
/// Returns an error if pragmas cannot be set or a migration fails.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    super::migrations::run_migrations(conn)
}

/// Names of all user tables, sorted.
///
/// # Errors
///
/// Returns an error if the catalog query fails.
pub fn table_names(conn: &Connection) -> Result<Vec<String>> {
    let names = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type='table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

/// Collections missing from the database, if any.
///
/// # Errors
///
/// Returns an error if the catalog query fails.
pub fn missing_collections(conn: &Connection) -> Result<Vec<Collection>> {
    let tables = table_names(conn)?;
    Ok(Collection::ALL
        .into_iter()
        .filter(|c| !tables.iter().any(|t| t == c.as_str()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_schema_creates_every_collection() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).expect("Failed to apply schema");

        assert!(missing_collections(&conn).unwrap().is_empty());
        let tables = table_names(&conn).unwrap();
        assert!(tables.contains(&"schema_migrations".to_string()));
        assert!(tables.contains(&"sync_audit".to_string()));
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        apply_schema(&conn).expect("First apply failed");
        let before = table_names(&conn).unwrap();
        apply_schema(&conn).expect("Second apply failed");

        assert_eq!(before, table_names(&conn).unwrap());
    }

    #[test]
    fn test_secondary_indices_exist() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        for collection in Collection::ALL {
            for index in collection.indices() {
                let name = format!("idx_{}_{}", collection.as_str(), index.name);
                let exists = conn
                    .prepare("SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1")
                    .unwrap()
                    .exists([&name])
                    .unwrap();
                assert!(exists, "missing index {name}");
            }
        }
    }
}
