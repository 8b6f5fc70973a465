// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the browser, storage, and queue traits.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the role of an adapter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Browser,
    Storage,
    Queue,
}

/// Lifecycle stage of a stored message.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessState {
    #[serde(alias = "available")]
    Available,
    #[serde(alias = "inprocess", alias = "in_process")]
    InProcess,
    #[serde(alias = "done")]
    Done,
    #[serde(alias = "error")]
    Error,
    #[serde(alias = "hold")]
    Hold,
}

impl ProcessState {
    pub const ALL: [ProcessState; 5] = [
        ProcessState::Available,
        ProcessState::InProcess,
        ProcessState::Done,
        ProcessState::Error,
        ProcessState::Hold,
    ];
}

/// The role a message table plays, persisted as a single-character discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    MessageLog,
    ErrorStore,
    MessageStorage,
}

impl StorageType {
    pub fn code(self) -> &'static str {
        match self {
            StorageType::MessageLog => "L",
            StorageType::ErrorStore => "E",
            StorageType::MessageStorage => "M",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "L" => Some(StorageType::MessageLog),
            "E" => Some(StorageType::ErrorStore),
            "M" => Some(StorageType::MessageStorage),
            _ => None,
        }
    }
}

/// Engine-generated primary identity of a stored message.
///
/// Keys are carried as strings so that integer identity columns and
/// sequence-generated values are handled alike.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageKey(pub String);

impl StorageKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for StorageKey {
    fn from(value: i64) -> Self {
        StorageKey(value.to_string())
    }
}

impl From<&str> for StorageKey {
    fn from(value: &str) -> Self {
        StorageKey(value.to_string())
    }
}

impl From<String> for StorageKey {
    fn from(value: String) -> Self {
        StorageKey(value)
    }
}

/// Sort direction for listing queries.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
    /// Use the store's default order.
    #[default]
    None,
}

/// Message content as handed to and returned from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    /// String form used for display. Invalid UTF-8 is replaced, so two
    /// different byte payloads may share one text form.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Payload::Text(s) => Cow::Borrowed(s.as_str()),
            Payload::Bytes(b) => String::from_utf8_lossy(b),
        }
    }

    /// Raw content; text as its UTF-8 encoding.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(s) => s.as_bytes(),
            Payload::Bytes(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::Text(s) => s.len(),
            Payload::Bytes(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(value)
    }
}

/// Everything about a stored message except its payload.
///
/// Fields whose column is disabled in the record schema are always `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub key: StorageKey,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub insert_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub comment: Option<String>,
    pub label: Option<String>,
    pub store_type: Option<StorageType>,
    pub host: Option<String>,
    pub slot_id: Option<String>,
    /// Decoded process state, when the reader knows the queue's status values.
    pub status: Option<ProcessState>,
}

impl Metadata {
    pub fn new(key: StorageKey) -> Self {
        Self {
            key,
            message_id: None,
            correlation_id: None,
            insert_date: None,
            expiry_date: None,
            comment: None,
            label: None,
            store_type: None,
            host: None,
            slot_id: None,
            status: None,
        }
    }
}

/// A stored message: metadata, optional payload, and extra context fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub metadata: Metadata,
    pub payload: Option<Payload>,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl MessageRecord {
    pub fn key(&self) -> &StorageKey {
        &self.metadata.key
    }
}

/// A message submitted to [`crate::TransactionalStorage::store`].
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub message_id: String,
    pub correlation_id: String,
    pub received: DateTime<Utc>,
    pub comment: Option<String>,
    pub label: Option<String>,
    pub payload: Option<Payload>,
    pub context: BTreeMap<String, String>,
}

impl NewMessage {
    pub fn new(
        message_id: impl Into<String>,
        correlation_id: impl Into<String>,
        payload: impl Into<Payload>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            correlation_id: correlation_id.into(),
            received: Utc::now(),
            comment: None,
            label: None,
            payload: Some(payload.into()),
            context: BTreeMap::new(),
        }
    }

    pub fn received_at(mut self, received: DateTime<Utc>) -> Self {
        self.received = received;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_context(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(name.into(), value.into());
        self
    }
}

/// Result of a store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// A new row was inserted.
    Stored(StorageKey),
    /// A row with the same message id already existed in this slot; nothing was written.
    Duplicate {
        key: StorageKey,
        payload_differs: bool,
    },
}

impl StoreOutcome {
    pub fn key(&self) -> &StorageKey {
        match self {
            StoreOutcome::Stored(key) => key,
            StoreOutcome::Duplicate { key, .. } => key,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreOutcome::Duplicate { .. })
    }
}

/// Filter and paging for management queries.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub order: SortOrder,
    pub skip: usize,
    /// Maximum number of items in the page; `None` returns everything the cursor yields.
    pub max: Option<usize>,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    /// Case-insensitive substring match on the comment.
    pub comment: Option<String>,
    pub label: Option<String>,
}

impl MessageFilter {
    pub fn matches(&self, metadata: &Metadata) -> bool {
        fn eq(wanted: &Option<String>, actual: &Option<String>) -> bool {
            match wanted {
                Some(w) => actual.as_deref() == Some(w.as_str()),
                None => true,
            }
        }

        let comment_matches = match &self.comment {
            Some(needle) => metadata
                .comment
                .as_deref()
                .is_some_and(|c| c.to_lowercase().contains(&needle.to_lowercase())),
            None => true,
        };

        eq(&self.message_id, &metadata.message_id)
            && eq(&self.correlation_id, &metadata.correlation_id)
            && eq(&self.label, &metadata.label)
            && comment_matches
    }
}

/// One page of a management query.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub skip: usize,
    /// More matching items were available beyond this page.
    pub has_more: bool,
}
