//! SQLite record store.
//!
//! Durable CRUD over the fixed collection catalog, with secondary-index
//! lookup and expiry. It follows the mutation-context pattern: every write
//! runs in one IMMEDIATE transaction and audit events collected along the
//! way are committed with it.
//!
//! Expired rows are never returned. Reads that meet them delete them before
//! answering.

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

use crate::clock::SharedClock;
use crate::error::{Result, StoreError};
use crate::model::{Collection, KeyKind, Record, RecordKey};
use crate::storage::events::{self, AuditEvent, AuditOutcome};
use crate::storage::schema::apply_schema;

/// Handle to the local store. Clones share one connection.
#[derive(Clone)]
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
    clock: SharedClock,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// Context for a mutation, collecting audit events written at commit.
pub struct MutationContext {
    /// Name of the operation being performed.
    pub op_name: String,
    /// Clock reading taken when the transaction began.
    pub now: i64,
    /// Events to write at the end of the transaction.
    pub events: Vec<AuditEvent>,
}

impl MutationContext {
    #[must_use]
    pub fn new(op_name: &str, now: i64) -> Self {
        Self {
            op_name: op_name.to_string(),
            now,
            events: Vec::new(),
        }
    }

    /// Record an audit event for this operation.
    pub fn record(&mut self, event: AuditEvent) {
        self.events.push(event);
    }
}

/// One term of an ordered scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    /// Secondary index name.
    pub index: &'static str,
    pub descending: bool,
}

impl OrderBy {
    #[must_use]
    pub const fn asc(index: &'static str) -> Self {
        Self {
            index,
            descending: false,
        }
    }

    #[must_use]
    pub const fn desc(index: &'static str) -> Self {
        Self {
            index,
            descending: true,
        }
    }
}

impl RecordStore {
    /// Open a store at the given path, creating and upgrading it as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or the
    /// schema upgrade fails.
    pub fn open(path: &Path, clock: SharedClock) -> Result<Self> {
        Self::open_with_timeout(path, None, clock)
    }

    /// Open a store with an optional busy timeout (default 5s).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or the
    /// schema upgrade fails.
    pub fn open_with_timeout(
        path: &Path,
        timeout_ms: Option<u64>,
        clock: SharedClock,
    ) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(timeout_ms.map_or(Duration::from_secs(5), Duration::from_millis))?;
        apply_schema(&conn)?;
        Ok(Self::from_connection(conn, clock))
    }

    /// Open an in-memory store (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn open_memory(clock: SharedClock) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self::from_connection(conn, clock))
    }

    fn from_connection(conn: Connection, clock: SharedClock) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        }
    }

    /// The clock stamping this store's writes.
    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    #[must_use]
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a read-only closure against the connection.
    ///
    /// # Errors
    ///
    /// Propagates the closure's error.
    pub fn read<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self.lock();
        f(&conn)
    }

    /// Execute a mutation with the transaction protocol.
    ///
    /// 1. Begins an IMMEDIATE transaction
    /// 2. Executes the mutation closure
    /// 3. Writes collected audit events
    /// 4. Commits (dropping the transaction rolls back on any error)
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails; nothing is written in that case.
    pub fn mutate<F, R>(&self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;

        let mut ctx = MutationContext::new(op, self.clock.now_ms());
        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            events::insert_event(&tx, event)?;
        }

        tx.commit().map_err(StoreError::from)?;
        trace!(op, events = ctx.events.len(), "Mutation committed");
        Ok(result)
    }

    // ==================
    // Record Operations
    // ==================

    /// Upsert a document by primary key.
    ///
    /// Keyed collections read the key from the document's key field.
    /// Auto-id collections assign a new id unless the document already
    /// carries an integer `id`, and write the id back into the stored copy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` for non-object documents or missing keys, and
    /// `TransactionFailed`/`QuotaExceeded` if the write aborts.
    pub fn put(
        &self,
        collection: Collection,
        doc: &serde_json::Value,
        expires_at: Option<i64>,
    ) -> Result<RecordKey> {
        self.mutate("put", |tx, ctx| {
            put_in(tx, collection, doc, ctx.now, expires_at)
        })
    }

    /// Fetch a record by key. Expired records are deleted and reported absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, collection: Collection, key: &RecordKey) -> Result<Option<Record>> {
        let now = self.clock.now_ms();
        let conn = self.lock();
        let Some(record) = get_in(&conn, collection, key)? else {
            return Ok(None);
        };

        if record.is_expired(now) {
            conn.execute(
                &format!(
                    "DELETE FROM {table} WHERE \"{pk}\" = ?1 AND expires_at < ?2",
                    table = collection.as_str(),
                    pk = collection.key_field(),
                ),
                rusqlite::params![key, now],
            )
            .map_err(StoreError::from)?;
            debug!(collection = %collection, key = %key, "Expired record evicted on read");
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// All live records in a collection, optionally filtered in memory.
    ///
    /// Expired rows are deleted first.
    ///
    /// # Errors
    ///
    /// Returns an error if the purge or the query fails.
    pub fn get_all(
        &self,
        collection: Collection,
        filter: Option<&dyn Fn(&Record) -> bool>,
    ) -> Result<Vec<Record>> {
        let now = self.clock.now_ms();
        let conn = self.lock();
        purge_in(&conn, collection, now)?;

        let sql = format!(
            "SELECT \"{pk}\", data, stored_at, expires_at FROM {table} ORDER BY \"{pk}\"",
            table = collection.as_str(),
            pk = collection.key_field(),
        );
        let records = query_records(&conn, &sql, [])?;

        Ok(match filter {
            Some(keep) => records.into_iter().filter(|r| keep(r)).collect(),
            None => records,
        })
    }

    /// Live records whose secondary index equals `value`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` for an unknown index, or an error if the query fails.
    pub fn find_by_index(
        &self,
        collection: Collection,
        index: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<Record>> {
        let index_spec = collection.index(index).ok_or_else(|| {
            StoreError::InvalidRecord(format!("{collection} has no index named `{index}`"))
        })?;

        let now = self.clock.now_ms();
        let conn = self.lock();
        purge_in(&conn, collection, now)?;

        let sql = format!(
            "SELECT \"{pk}\", data, stored_at, expires_at FROM {table}
             WHERE \"{column}\" = ?1 ORDER BY \"{pk}\"",
            table = collection.as_str(),
            pk = collection.key_field(),
            column = index_spec.name,
        );
        query_records(&conn, &sql, [json_to_sql(value)])
    }

    /// Live records ordered by secondary indices, primary key last.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` for an unknown index, or an error if the query fails.
    pub fn scan_ordered(
        &self,
        collection: Collection,
        order: &[OrderBy],
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        let mut terms = Vec::with_capacity(order.len() + 1);
        for term in order {
            let index_spec = collection.index(term.index).ok_or_else(|| {
                StoreError::InvalidRecord(format!(
                    "{collection} has no index named `{}`",
                    term.index
                ))
            })?;
            let direction = if term.descending { "DESC" } else { "ASC" };
            terms.push(format!("\"{}\" {direction}", index_spec.name));
        }
        terms.push(format!("\"{}\" ASC", collection.key_field()));

        let now = self.clock.now_ms();
        let conn = self.lock();
        purge_in(&conn, collection, now)?;

        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let sql = format!(
            "SELECT \"{pk}\", data, stored_at, expires_at FROM {table}
             ORDER BY {order} LIMIT ?1",
            table = collection.as_str(),
            pk = collection.key_field(),
            order = terms.join(", "),
        );
        query_records(&conn, &sql, [limit])
    }

    /// Delete a record. Deleting an absent key is not an error.
    ///
    /// Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete aborts.
    pub fn delete(&self, collection: Collection, key: &RecordKey) -> Result<bool> {
        self.mutate("delete", |tx, _| Ok(delete_in(tx, collection, key)? > 0))
    }

    /// Remove every record of a collection. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete aborts.
    pub fn clear(&self, collection: Collection) -> Result<usize> {
        let removed = self.mutate("clear", |tx, _| {
            Ok(tx
                .execute(&format!("DELETE FROM {}", collection.as_str()), [])
                .map_err(StoreError::from)?)
        })?;
        debug!(collection = %collection, removed, "Collection cleared");
        Ok(removed)
    }

    /// Eagerly delete expired rows. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete aborts.
    pub fn purge_expired(&self, collection: Collection) -> Result<usize> {
        let now = self.clock.now_ms();
        let conn = self.lock();
        purge_in(&conn, collection, now)
    }

    /// Number of live records in a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self, collection: Collection) -> Result<usize> {
        let now = self.clock.now_ms();
        let conn = self.lock();
        let count = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE expires_at IS NULL OR expires_at >= ?1",
                    collection.as_str()
                ),
                [now],
                |row| row.get(0),
            )
            .map_err(StoreError::from)?;
        Ok(count)
    }

    // ==================
    // Audit Operations
    // ==================

    /// Number of queue items dropped after exhausting retries since `since_ms`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_dropped_since(&self, since_ms: i64) -> Result<usize> {
        self.read(|conn| Ok(events::count_since(conn, AuditOutcome::Dropped, since_ms)?))
    }

    /// When the last drain finished, if ever.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn last_sync(&self) -> Result<Option<i64>> {
        self.read(|conn| Ok(events::latest(conn, AuditOutcome::DrainCompleted)?))
    }

    /// Most recent audit events, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn recent_audit(&self, limit: Option<u32>) -> Result<Vec<AuditEvent>> {
        self.read(|conn| Ok(events::recent_events(conn, limit)?))
    }
}

// ==================
// Transaction Helpers
// ==================

/// Convert a JSON scalar to the value stored in an index column.
fn json_to_sql(value: &serde_json::Value) -> SqlValue {
    match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        serde_json::Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Upsert inside an open transaction.
pub(crate) fn put_in(
    conn: &Connection,
    collection: Collection,
    doc: &serde_json::Value,
    now: i64,
    expires_at: Option<i64>,
) -> Result<RecordKey> {
    let Some(obj) = doc.as_object() else {
        return Err(StoreError::InvalidRecord(format!(
            "{collection} documents must be JSON objects"
        ))
        .into());
    };

    let key_field = collection.key_field();
    let explicit_key = obj.get(key_field).and_then(RecordKey::from_json);

    let mut doc = doc.clone();
    let key = match (collection.key_kind(), explicit_key) {
        (KeyKind::Field(_), Some(key)) => key,
        (KeyKind::Field(field), None) => {
            return Err(StoreError::InvalidRecord(format!(
                "missing primary key `{field}` for {collection}"
            ))
            .into());
        }
        (KeyKind::AutoIncrement, Some(RecordKey::Int(id))) => RecordKey::Int(id),
        (KeyKind::AutoIncrement, _) => {
            let id: i64 = conn
                .query_row(
                    "SELECT COALESCE(
                        (SELECT seq FROM sqlite_sequence WHERE name = ?1), 0) + 1",
                    [collection.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::from)?
                .unwrap_or(1);
            let max_existing: Option<i64> = conn
                .query_row(
                    &format!("SELECT MAX(\"id\") FROM {}", collection.as_str()),
                    [],
                    |row| row.get(0),
                )
                .map_err(StoreError::from)?;
            RecordKey::Int(id.max(max_existing.unwrap_or(0) + 1))
        }
    };

    if let Some(map) = doc.as_object_mut() {
        map.insert(key_field.to_string(), key.to_json());
        if collection == Collection::PendingAlerts && !map.contains_key("sync_status") {
            map.insert("sync_status".to_string(), serde_json::Value::from("pending"));
        }
    }

    let indices: Vec<_> = collection
        .indices()
        .iter()
        .filter(|i| !i.is_row_column())
        .collect();
    let mut columns = vec![
        format!("\"{key_field}\""),
        "data".to_string(),
        "stored_at".to_string(),
        "expires_at".to_string(),
    ];
    columns.extend(indices.iter().map(|i| format!("\"{}\"", i.name)));
    let placeholders: Vec<String> = (1..=columns.len()).map(|n| format!("?{n}")).collect();

    let mut values: Vec<SqlValue> = vec![
        match &key {
            RecordKey::Int(i) => SqlValue::Integer(*i),
            RecordKey::Text(s) => SqlValue::Text(s.clone()),
        },
        SqlValue::Text(doc.to_string()),
        SqlValue::Integer(now),
        expires_at.map_or(SqlValue::Null, SqlValue::Integer),
    ];
    values.extend(
        indices
            .iter()
            .map(|i| doc.get(i.path).map_or(SqlValue::Null, json_to_sql)),
    );

    let sql = format!(
        "INSERT OR REPLACE INTO {table} ({columns}) VALUES ({placeholders})",
        table = collection.as_str(),
        columns = columns.join(", "),
        placeholders = placeholders.join(", "),
    );
    conn.execute(&sql, rusqlite::params_from_iter(values))
        .map_err(StoreError::from)?;

    trace!(collection = %collection, key = %key, "Record stored");
    Ok(key)
}

/// Fetch a row regardless of expiry.
pub(crate) fn get_in(
    conn: &Connection,
    collection: Collection,
    key: &RecordKey,
) -> Result<Option<Record>> {
    let sql = format!(
        "SELECT \"{pk}\", data, stored_at, expires_at FROM {table} WHERE \"{pk}\" = ?1",
        table = collection.as_str(),
        pk = collection.key_field(),
    );
    Ok(query_records(conn, &sql, [key])?.into_iter().next())
}

/// Delete a row by key; returns rows removed (0 or 1).
pub(crate) fn delete_in(conn: &Connection, collection: Collection, key: &RecordKey) -> Result<usize> {
    let removed = conn
        .execute(
            &format!(
                "DELETE FROM {table} WHERE \"{pk}\" = ?1",
                table = collection.as_str(),
                pk = collection.key_field(),
            ),
            [key],
        )
        .map_err(StoreError::from)?;
    Ok(removed)
}

fn purge_in(conn: &Connection, collection: Collection, now: i64) -> Result<usize> {
    let removed = conn
        .execute(
            &format!(
                "DELETE FROM {} WHERE expires_at IS NOT NULL AND expires_at < ?1",
                collection.as_str()
            ),
            [now],
        )
        .map_err(StoreError::from)?;
    if removed > 0 {
        debug!(collection = %collection, removed, "Expired records purged");
    }
    Ok(removed)
}

fn query_records<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(sql).map_err(StoreError::from)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok((
                row.get::<_, RecordKey>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })
        .map_err(StoreError::from)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(StoreError::from)?;

    rows.into_iter()
        .map(|(key, data, stored_at, expires_at)| {
            let data = serde_json::from_str(&data).map_err(|e| {
                StoreError::InvalidRecord(format!("stored document for {key} is not JSON: {e}"))
            })?;
            Ok(Record {
                key,
                data,
                stored_at,
                expires_at,
            })
        })
        .collect()
}
