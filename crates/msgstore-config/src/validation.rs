// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as mandatory columns, plain SQL identifiers, and distinct status values.

use std::collections::HashMap;

use msgstore_core::ProcessState;

use crate::diagnostic::ConfigError;
use crate::model::{DonePolicy, MsgstoreConfig};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Whether `name` is usable as a table or column name without quoting.
///
/// A single `.` is allowed to qualify a table with its schema.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut parts = name.split('.');
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    };
    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), None, None) => valid_part(a),
        (Some(a), Some(b), None) => valid_part(a) && valid_part(b),
        _ => false,
    }
}

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &MsgstoreConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if !LOG_LEVELS.contains(&config.log_level.as_str()) {
        errors.push(ConfigError::validation(
            "log_level",
            format!(
                "`{}` is not one of {}",
                config.log_level,
                LOG_LEVELS.join(", ")
            ),
        ));
    }

    let path = config.database.path.trim();
    if path.is_empty() {
        errors.push(ConfigError::validation("database.path", "must not be empty"));
    } else if path == ":memory:" {
        errors.push(ConfigError::validation(
            "database.path",
            "in-memory databases are not supported: every call and cursor opens its own connection",
        ));
    }

    if config.database.busy_timeout_ms == 0 {
        errors.push(ConfigError::validation(
            "database.busy_timeout_ms",
            "must be greater than zero",
        ));
    }

    let table = format!("{}{}", config.storage.prefix, config.storage.table);
    if !is_plain_identifier(&table) {
        errors.push(ConfigError::validation(
            "storage.table",
            format!("`{table}` is not a plain SQL identifier"),
        ));
    }

    let columns = &config.storage.columns;
    for (key, value) in [
        ("storage.columns.key", &columns.key),
        ("storage.columns.status", &columns.status),
    ] {
        if value.trim().is_empty() {
            errors.push(ConfigError::validation(key, "is mandatory and must not be empty"));
        }
    }

    for (key, value) in [
        ("storage.columns.key", &columns.key),
        ("storage.columns.message_id", &columns.message_id),
        ("storage.columns.correlation_id", &columns.correlation_id),
        ("storage.columns.date", &columns.date),
        ("storage.columns.comment", &columns.comment),
        ("storage.columns.label", &columns.label),
        ("storage.columns.store_type", &columns.store_type),
        ("storage.columns.host", &columns.host),
        ("storage.columns.slot_id", &columns.slot_id),
        ("storage.columns.expiry", &columns.expiry),
        ("storage.columns.payload", &columns.payload),
        ("storage.columns.status", &columns.status),
    ] {
        if !value.is_empty() && !is_plain_identifier(value) {
            errors.push(ConfigError::validation(
                key,
                format!("`{value}` is not a plain SQL identifier"),
            ));
        }
    }

    if let Some(ts) = &config.queue.timestamp_column
        && !is_plain_identifier(ts)
    {
        errors.push(ConfigError::validation(
            "queue.timestamp_column",
            format!("`{ts}` is not a plain SQL identifier"),
        ));
    }

    // Status values must be distinct, otherwise two states are indistinguishable.
    let mut seen: HashMap<&str, ProcessState> = HashMap::new();
    for (state, value) in &config.queue.status {
        if value.is_empty() {
            continue;
        }
        if let Some(other) = seen.insert(value.as_str(), *state) {
            errors.push(ConfigError::validation(
                format!("queue.status.{state}"),
                format!("value `{value}` is also used for {other}"),
            ));
        }
    }

    let has_value = |state: ProcessState| {
        config
            .queue
            .status
            .get(&state)
            .is_some_and(|v| !v.is_empty())
    };

    if config.queue.on_done == DonePolicy::Retain && !has_value(ProcessState::Done) {
        errors.push(ConfigError::validation(
            "queue.status.DONE",
            "must be set when queue.on_done = \"retain\"",
        ));
    }

    if let Some(transitions) = &config.queue.transitions {
        for (from, targets) in transitions {
            for target in targets {
                if !has_value(*target) {
                    errors.push(ConfigError::validation(
                        format!("queue.transitions.{from}"),
                        format!("target {target} has no status value"),
                    ));
                }
            }
        }
    }

    if config.queue.poll_interval_ms == 0 {
        errors.push(ConfigError::validation(
            "queue.poll_interval_ms",
            "must be greater than zero",
        ));
    }

    if config.queue.claim_timeout_ms == Some(0) {
        errors.push(ConfigError::validation(
            "queue.claim_timeout_ms",
            "must be greater than zero when set",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
