//! Queue command implementations.

use crate::cli::QueueCommands;
use crate::cli::commands::{format_ms, open_manager, parse_json_arg};
use crate::error::Result;
use crate::model::OperationKind;
use crate::storage::{AuditEvent, AuditOutcome};
use serde::Serialize;
use std::path::PathBuf;

const HOUR_MS: i64 = 60 * 60 * 1000;

#[derive(Serialize)]
struct DroppedOutput {
    since: i64,
    count: usize,
    recent: Vec<AuditEvent>,
}

/// Execute queue commands.
///
/// # Errors
///
/// Returns an error if the store is missing, an argument is malformed, or
/// the operation fails.
pub fn execute(command: &QueueCommands, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    match command {
        QueueCommands::Add {
            operation,
            payload,
            priority,
        } => add(operation, payload, *priority, db_path, json),
        QueueCommands::List { limit } => list(*limit, db_path, json),
        QueueCommands::Dropped { hours } => dropped(*hours, db_path, json),
    }
}

fn add(operation: &str, payload: &str, priority: i64, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let operation: OperationKind = operation.parse()?;
    let payload = parse_json_arg("payload", payload)?;
    let odm = open_manager(db_path)?;
    let id = odm.enqueue(operation, payload, Some(priority))?;

    if json {
        let output = serde_json::json!({ "id": id, "operation": operation, "priority": priority });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Queued {operation} as item {id} (priority {priority})");
    }
    Ok(())
}

fn list(limit: usize, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    use colored::Colorize;

    let odm = open_manager(db_path)?;
    let items = odm.queue().peek_batch(limit)?;

    if json {
        println!("{}", serde_json::to_string(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("Sync queue is empty.");
        return Ok(());
    }

    println!("Pending operations ({}):", items.len());
    for item in &items {
        println!(
            "  {} {} {} {}",
            format!("#{}", item.id).dimmed(),
            item.operation.as_str().cyan(),
            format!("P{}", item.priority).dimmed(),
            format_ms(item.created_at).dimmed(),
        );
        if item.retry_count > 0 {
            println!(
                "      {} retries, last error: {}",
                item.retry_count.to_string().yellow(),
                item.last_error.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

fn dropped(hours: u32, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let odm = open_manager(db_path)?;
    let since = odm.store().now_ms() - i64::from(hours) * HOUR_MS;
    let count = odm.queue().count_dropped_since(since)?;
    let recent: Vec<AuditEvent> = odm
        .store()
        .recent_audit(Some(200))?
        .into_iter()
        .filter(|e| e.outcome == AuditOutcome::Dropped && e.created_at >= since)
        .collect();

    if json {
        let output = DroppedOutput { since, count, recent };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!("{count} item(s) dropped in the last {hours}h");
    for event in &recent {
        println!(
            "  {} {} #{} after {} attempts: {}",
            format_ms(event.created_at),
            event.operation.as_deref().unwrap_or("?"),
            event.item_id.unwrap_or_default(),
            event.retry_count,
            event.error.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
