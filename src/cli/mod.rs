//! CLI definitions using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// Offline data manager - local store and sync queue for the ticket dashboard
#[derive(Parser, Debug)]
#[command(name = "odm", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.odm/data/odm.db)
    #[arg(long, global = true, env = "ODM_DB")]
    pub db: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the local store
    Init {
        /// Recreate the store, discarding its contents
        #[arg(long)]
        force: bool,
    },

    /// Print version information
    Version,

    /// Show storage and sync status
    Status,

    /// Response cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Outbound sync queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Write a JSON document into a collection
    Put {
        /// Collection name (tickets, events, notifications, preferences, ...)
        collection: String,

        /// Document as JSON
        document: String,
    },

    /// Read one record
    Get {
        collection: String,

        /// Primary key (id, key or url)
        key: String,
    },

    /// List live records of a collection
    List {
        collection: String,

        /// Only records whose secondary index matches --value
        #[arg(long, requires = "value")]
        index: Option<String>,

        /// Index value (parsed as JSON, falling back to a string)
        #[arg(long, requires = "index")]
        value: Option<String>,
    },

    /// Delete one record (absent keys are fine)
    Delete {
        collection: String,
        key: String,
    },

    /// Remove every record of a collection
    Clear { collection: String },

    /// Export every collection as one JSON snapshot
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Drain the sync queue once against the server
    Sync,

    /// Run the sync coordinator until interrupted
    Run {
        /// Start in offline mode (no drains until back online)
        #[arg(long)]
        offline: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

// ============================================================================
// Cache Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Cache a response payload
    Put {
        /// Request identity (URL plus canonical query)
        key: String,

        /// Payload as JSON
        payload: String,

        /// Time-to-live in seconds (default: configured api_cache TTL)
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Read a cached payload
    Get { key: String },

    /// Delete expired rows from every collection
    Sweep,
}

// ============================================================================
// Queue Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// Queue an operation for the server
    Add {
        /// create_alert, update_preferences, track_analytics or create_notification
        operation: String,

        /// Payload as JSON
        payload: String,

        /// Higher runs first
        #[arg(short, long, default_value_t = 1)]
        priority: i64,
    },

    /// Show queued items in processing order
    List {
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Show items dropped after exhausting retries
    Dropped {
        /// Look-back window in hours
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },
}
