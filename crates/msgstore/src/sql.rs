// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `msgstore sql` command implementation.
//!
//! Prints the DDL and queue statements for any dialect in the capability
//! table, including those this build cannot execute.

use std::sync::Arc;

use msgstore_config::model::{DonePolicy, MsgstoreConfig};
use msgstore_core::{ProcessState, StorageKey, StorageType, StoreError};
use msgstore_storage::table_queue::{queries_from_config, selector_from_config};
use msgstore_storage::{ClaimMode, Dialect, Field, RecordSchema};

/// Run the `msgstore sql` command.
pub fn run_sql(config: &MsgstoreConfig, dialect: Option<&str>) -> Result<(), StoreError> {
    let dialect = Dialect::from_name(dialect.unwrap_or(&config.database.dialect))?;
    for statement in render(config, dialect)? {
        println!("{statement};");
        println!();
    }
    Ok(())
}

/// Statements in the order a deployment meets them: DDL, then queue access.
pub fn render(config: &MsgstoreConfig, dialect: &Dialect) -> Result<Vec<String>, StoreError> {
    let mut config = config.clone();
    config.storage.store_type = StorageType::MessageStorage;

    let schema = Arc::new(RecordSchema::from_config(&config.storage)?);
    let mut out: Vec<String> = schema
        .ddl(dialect, config.queue.payload_kind)
        .into_iter()
        .map(|s| s.trim_end_matches(';').to_string())
        .collect();

    let queries = queries_from_config(schema, selector_from_config(&config), &config);
    out.push(format!("-- peek\n{}", queries.peek(dialect)?.sql));
    out.push(format!(
        "-- claim\n{}",
        queries
            .claim(dialect, ClaimMode::Optimistic, config.queue.lock_wait_secs)?
            .sql
    ));
    match queries.claim(dialect, ClaimMode::LockAndMark, config.queue.lock_wait_secs) {
        Ok(statement) => out.push(format!("-- claim with row lock\n{}", statement.sql)),
        Err(e) => out.push(format!("-- claim with row lock: {e}")),
    }

    let retain: Vec<String> = match queries.schema().column(Field::Expiry) {
        Some(expiry) if config.storage.retention_days >= 0 => vec![format!(
            "{expiry}={}",
            dialect.timestamp_after_days(config.storage.retention_days)
        )],
        _ => Vec::new(),
    };
    let placeholder = StorageKey::from("?");
    for target in queries.statuses().known_states() {
        let statement = match (target, config.queue.on_done) {
            (ProcessState::Done, DonePolicy::Delete) => queries.delete_on(target),
            (ProcessState::Done, DonePolicy::Retain) => queries
                .transition(dialect, &placeholder, target, Some(None), &retain)
                .map(|s| s.sql),
            _ => queries
                .transition(dialect, &placeholder, target, Some(None), &[])
                .map(|s| s.sql),
        };
        if let Some(sql) = statement {
            out.push(format!("-- move to {target}\n{sql}"));
        }
    }
    Ok(out)
}
