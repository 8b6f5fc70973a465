// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the msgstore message store.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::collections::BTreeMap;

use msgstore_core::{ProcessState, SortOrder, StorageType};
use serde::{Deserialize, Serialize};

/// Top-level msgstore configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MsgstoreConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Database location and connection handling.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Message table layout and storage behaviour.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Status values and consumer behaviour.
    #[serde(default)]
    pub queue: QueueConfig,
}

impl Default for MsgstoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// How connections are handed out to store and queue operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Every call opens its own connection; no transaction spans calls.
    #[default]
    Pooled,
    /// One connection shared by all calls, which are serialized.
    Shared,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: String,

    /// SQL dialect name (sqlite, postgresql, oracle, mssql, mysql, mariadb, h2, db2, generic).
    #[serde(default = "default_dialect")]
    pub dialect: String,

    #[serde(default)]
    pub connection_mode: ConnectionMode,

    /// How long a statement waits for a lock held by another connection.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            dialect: default_dialect(),
            connection_mode: ConnectionMode::default(),
            busy_timeout_ms: default_busy_timeout_ms(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("msgstore").join("msgstore.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("msgstore.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_dialect() -> String {
    "sqlite".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_wal_mode() -> bool {
    true
}

/// Physical column names. An empty string disables an optional column.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnsConfig {
    #[serde(default = "default_key_column")]
    pub key: String,
    #[serde(default = "default_message_id_column")]
    pub message_id: String,
    #[serde(default = "default_correlation_id_column")]
    pub correlation_id: String,
    #[serde(default = "default_date_column")]
    pub date: String,
    #[serde(default = "default_comment_column")]
    pub comment: String,
    #[serde(default = "default_label_column")]
    pub label: String,
    #[serde(default = "default_type_column")]
    pub store_type: String,
    #[serde(default = "default_host_column")]
    pub host: String,
    #[serde(default = "default_slot_id_column")]
    pub slot_id: String,
    #[serde(default = "default_expiry_column")]
    pub expiry: String,
    #[serde(default = "default_payload_column")]
    pub payload: String,
    #[serde(default = "default_status_column")]
    pub status: String,
}

impl Default for ColumnsConfig {
    fn default() -> Self {
        Self {
            key: default_key_column(),
            message_id: default_message_id_column(),
            correlation_id: default_correlation_id_column(),
            date: default_date_column(),
            comment: default_comment_column(),
            label: default_label_column(),
            store_type: default_type_column(),
            host: default_host_column(),
            slot_id: default_slot_id_column(),
            expiry: default_expiry_column(),
            payload: default_payload_column(),
            status: default_status_column(),
        }
    }
}

fn default_key_column() -> String {
    "MESSAGE_KEY".to_string()
}
fn default_message_id_column() -> String {
    "MESSAGE_ID".to_string()
}
fn default_correlation_id_column() -> String {
    "CORRELATION_ID".to_string()
}
fn default_date_column() -> String {
    "MESSAGE_DATE".to_string()
}
fn default_comment_column() -> String {
    "COMMENTS".to_string()
}
fn default_label_column() -> String {
    "LABEL".to_string()
}
fn default_type_column() -> String {
    "STORE_TYPE".to_string()
}
fn default_host_column() -> String {
    "HOST".to_string()
}
fn default_slot_id_column() -> String {
    "SLOT_ID".to_string()
}
fn default_expiry_column() -> String {
    "EXPIRY_DATE".to_string()
}
fn default_payload_column() -> String {
    "MESSAGE".to_string()
}
fn default_status_column() -> String {
    "STATUS".to_string()
}

/// Message table layout and storage behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default = "default_table")]
    pub table: String,

    /// Put before the table, sequence, and index names, e.g. a schema owner.
    #[serde(default)]
    pub prefix: String,

    /// Logical queue id; rows of other slots in the same table are invisible.
    /// Empty disables slot scoping.
    #[serde(default = "default_slot_id")]
    pub slot_id: String,

    #[serde(default = "default_store_type")]
    pub store_type: StorageType,

    /// Compress serialized payloads with zlib.
    #[serde(default = "default_true")]
    pub blobs_compressed: bool,

    /// Persist the payload; when false only metadata is stored.
    #[serde(default = "default_true")]
    pub store_full_message: bool,

    /// Skip the insert when the slot already holds the message id.
    #[serde(default)]
    pub only_store_when_message_id_unique: bool,

    /// Days until a message-log entry (or a retained DONE row) expires. Negative means never.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Key lookups skip the slot/type selector.
    #[serde(default = "default_true")]
    pub assume_primary_key_unique: bool,

    /// Warn at startup when the table or its columns are missing.
    #[serde(default = "default_true")]
    pub check_table: bool,

    /// Warn at startup when the expected indices are missing.
    #[serde(default = "default_true")]
    pub check_indices: bool,

    /// Create the table, sequence, and index when the table is missing.
    #[serde(default)]
    pub create_table: bool,

    /// Listing order when the caller does not ask for one.
    #[serde(default)]
    pub order: SortOrder,

    #[serde(default = "default_sequence_name")]
    pub sequence_name: String,

    #[serde(default = "default_index_name")]
    pub index_name: String,

    #[serde(default)]
    pub columns: ColumnsConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            prefix: String::new(),
            slot_id: default_slot_id(),
            store_type: default_store_type(),
            blobs_compressed: true,
            store_full_message: true,
            only_store_when_message_id_unique: false,
            retention_days: default_retention_days(),
            assume_primary_key_unique: true,
            check_table: true,
            check_indices: true,
            create_table: false,
            order: SortOrder::default(),
            sequence_name: default_sequence_name(),
            index_name: default_index_name(),
            columns: ColumnsConfig::default(),
        }
    }
}

fn default_table() -> String {
    "MESSAGE_STORE".to_string()
}

fn default_slot_id() -> String {
    "default".to_string()
}

fn default_store_type() -> StorageType {
    StorageType::MessageStorage
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> i64 {
    30
}

fn default_sequence_name() -> String {
    "SEQ_MESSAGE_STORE".to_string()
}

fn default_index_name() -> String {
    "IX_MESSAGE_STORE".to_string()
}

/// What happens to a row when it reaches DONE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DonePolicy {
    /// Keep the row and give it an expiry date.
    #[default]
    Retain,
    /// Remove the row.
    Delete,
}

/// How the payload column is typed and decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// Plain character column.
    Text,
    /// Large character column.
    Clob,
    /// Serialized, optionally compressed envelope.
    #[default]
    Blob,
}

/// Status values and consumer behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Status column value per state. An empty value marks the state unknown;
    /// an empty AVAILABLE means "any value not used by another state".
    #[serde(default = "default_status_values")]
    pub status: BTreeMap<ProcessState, String>,

    /// Overrides the reachable states per state.
    #[serde(default)]
    pub transitions: Option<BTreeMap<ProcessState, Vec<ProcessState>>>,

    /// Column set to the database time on every transition.
    #[serde(default)]
    pub timestamp_column: Option<String>,

    /// Extra predicate ANDed to the claim query. Use alias `t` for the table.
    #[serde(default)]
    pub select_condition: Option<String>,

    /// Claim order; defaults to the date column.
    #[serde(default)]
    pub order_field: Option<String>,

    #[serde(default)]
    pub on_done: DonePolicy,

    #[serde(default)]
    pub payload_kind: PayloadKind,

    /// Interrupt claims and peeks that run longer than this.
    #[serde(default)]
    pub claim_timeout_ms: Option<u64>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Seconds to wait for a row lock on dialects that support it.
    #[serde(default)]
    pub lock_wait_secs: Option<u32>,

    /// Select and mark INPROCESS inside one write transaction.
    #[serde(default)]
    pub claim_in_transaction: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            status: default_status_values(),
            transitions: None,
            timestamp_column: None,
            select_condition: None,
            order_field: None,
            on_done: DonePolicy::default(),
            payload_kind: PayloadKind::default(),
            claim_timeout_ms: None,
            poll_interval_ms: default_poll_interval_ms(),
            lock_wait_secs: None,
            claim_in_transaction: false,
        }
    }
}

fn default_status_values() -> BTreeMap<ProcessState, String> {
    BTreeMap::from([
        (ProcessState::Available, "A".to_string()),
        (ProcessState::InProcess, "I".to_string()),
        (ProcessState::Done, "D".to_string()),
        (ProcessState::Error, "E".to_string()),
        (ProcessState::Hold, "H".to_string()),
    ])
}

fn default_poll_interval_ms() -> u64 {
    1_000
}
