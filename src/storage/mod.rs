//! SQLite storage layer.
//!
//! This module provides the persistence layer using SQLite with:
//! - WAL mode for concurrent reads
//! - Transaction discipline for atomic writes
//! - Per-record expiry, enforced on read
//! - A sync audit log written alongside queue mutations
//!
//! # Submodules
//!
//! - [`events`] - Sync audit storage
//! - [`migrations`] - Embedded schema migrations
//! - [`schema`] - Connection setup and schema inspection
//! - [`sqlite`] - The record store

pub mod events;
pub mod migrations;
pub mod schema;
pub mod sqlite;

pub use events::{AuditEvent, AuditOutcome};
pub use sqlite::{MutationContext, OrderBy, RecordStore};
