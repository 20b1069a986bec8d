//! Offline data manager
//!
//! An offline-first local store for the ticket-monitoring dashboard: cached
//! server responses with expiry, and a durable queue of local mutations
//! replayed to the server when connectivity returns.
//!
//! # Architecture
//!
//! - [`storage`] - SQLite record store, migrations and sync audit log
//! - [`model`] - Collections, records and sync queue items
//! - [`cache`] - Read-through response cache with TTLs
//! - [`sync`] - Sync queue, server API, drain processor and coordinator
//! - [`manager`] - The façade UI-facing callers use
//! - [`config`] - Paths and settings
//! - [`clock`] - Injectable time source
//! - [`cli`] - Command-line interface using clap
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod manager;
pub mod model;
pub mod storage;
pub mod sync;

pub use error::{Error, Result};
pub use manager::OfflineDataManager;
