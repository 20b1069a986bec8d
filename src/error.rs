//! Error types for the offline data manager.
//!
//! Three layers:
//! - [`StoreError`] for the embedded record store (never swallowed, always propagated)
//! - [`SyncError`] for the server API boundary (recorded on queue items, never surfaced)
//! - [`Error`] for the crate surface and CLI, with machine-readable codes,
//!   category exit codes and structured JSON output for non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for offline data manager operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Store Errors ──────────────────────────────────────────────

/// Failures of the record store.
///
/// A missing record is not an error: lookups return `Option::None`.
/// `NotFound` is reserved for operations that require an existing row.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Transaction failed: {0}")]
    TransactionFailed(#[source] rusqlite::Error),

    #[error("Record not found: {collection}/{key}")]
    NotFound { collection: String, key: String },

    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Schema migration {version} failed: {reason}")]
    SchemaMigrationFailed { version: String, reason: String },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(inner, _)
                if inner.code == rusqlite::ErrorCode::DiskFull =>
            {
                Self::QuotaExceeded(err.to_string())
            }
            _ => Self::TransactionFailed(err),
        }
    }
}

// ── Sync Errors ───────────────────────────────────────────────

/// Failures of a single remote dispatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server rejected request with status {0}")]
    ServerRejected(u16),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Scripts match on the string or on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    NotInitialized,
    AlreadyInitialized,
    TransactionFailed,
    QuotaExceeded,
    SchemaMigrationFailed,

    // Not Found (exit 3)
    RecordNotFound,

    // Validation (exit 4)
    InvalidRecord,
    InvalidArgument,

    // Sync (exit 6)
    NetworkError,
    ServerRejected,
    SerializationError,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::TransactionFailed => "TRANSACTION_FAILED",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::SchemaMigrationFailed => "SCHEMA_MIGRATION_FAILED",
            Self::RecordNotFound => "RECORD_NOT_FOUND",
            Self::InvalidRecord => "INVALID_RECORD",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NetworkError => "NETWORK_ERROR",
            Self::ServerRejected => "SERVER_REJECTED",
            Self::SerializationError => "SERIALIZATION_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized
            | Self::AlreadyInitialized
            | Self::TransactionFailed
            | Self::QuotaExceeded
            | Self::SchemaMigrationFailed => 2,
            Self::RecordNotFound => 3,
            Self::InvalidRecord | Self::InvalidArgument => 4,
            Self::NetworkError | Self::ServerRejected | Self::SerializationError => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether the same request may succeed if repeated.
    ///
    /// True for corrected-input validation errors and transient network
    /// failures. Store transaction failures are not retried by callers.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvalidRecord | Self::InvalidArgument | Self::NetworkError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors surfaced by the crate's public operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: run `odm init` first")]
    NotInitialized,

    #[error("Already initialized at {path}")]
    AlreadyInitialized { path: PathBuf },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::from(err))
    }
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::AlreadyInitialized { .. } => ErrorCode::AlreadyInitialized,
            Self::Store(store) => match store {
                StoreError::TransactionFailed(_) => ErrorCode::TransactionFailed,
                StoreError::NotFound { .. } => ErrorCode::RecordNotFound,
                StoreError::QuotaExceeded(_) => ErrorCode::QuotaExceeded,
                StoreError::SchemaMigrationFailed { .. } => ErrorCode::SchemaMigrationFailed,
                StoreError::InvalidRecord(_) => ErrorCode::InvalidRecord,
            },
            Self::Sync(sync) => match sync {
                SyncError::Network(_) => ErrorCode::NetworkError,
                SyncError::ServerRejected(_) => ErrorCode::ServerRejected,
                SyncError::Serialization(_) => ErrorCode::SerializationError,
            },
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized => Some("Run `odm init` to create the local store".to_string()),

            Self::AlreadyInitialized { path } => Some(format!(
                "Store already exists at {}. Use `--force` to recreate it.",
                path.display()
            )),

            Self::Store(StoreError::QuotaExceeded(_)) => Some(
                "The disk is full. Run `odm cache sweep` to evict expired entries.".to_string(),
            ),

            Self::Store(StoreError::SchemaMigrationFailed { .. }) => Some(
                "The store was written by a newer or damaged build. Back it up and re-run `odm init --force`."
                    .to_string(),
            ),

            Self::Store(StoreError::InvalidRecord(msg)) if msg.contains("primary key") => Some(
                "Keyed collections need their key field in the document (id, key or url)."
                    .to_string(),
            ),

            Self::InvalidArgument(msg) => {
                if msg.contains("enqueue") {
                    Some("Queue mutations with `odm queue add <operation> <payload>`".to_string())
                } else if msg.contains("collection") {
                    Some(
                        "Valid collections: tickets, events, notifications, preferences, \
                         pending_alerts, pending_analytics, api_cache, sync_queue"
                            .to_string(),
                    )
                } else if msg.contains("operation") {
                    Some(
                        "Valid operations: create_alert, update_preferences, track_analytics, \
                         create_notification"
                            .to_string(),
                    )
                } else {
                    None
                }
            }

            Self::Sync(SyncError::Network(_)) => {
                Some("Check connectivity or the configured API base URL (ODM_API_URL).".to_string())
            }

            Self::Store(_) | Self::Sync(_) | Self::Io(_) | Self::Json(_) | Self::Config(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
