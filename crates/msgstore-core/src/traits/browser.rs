// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read-mostly access to the messages of one logical queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cursor::MetadataCursor;
use crate::error::StoreError;
use crate::types::{MessageRecord, Metadata, SortOrder, StorageKey};

/// Count, lookup, iteration, and deletion scoped by the store's selector.
///
/// Every operation filters by the selector (slot id and storage type, plus
/// any state predicate) except lookups by key, which may bypass it when keys
/// are known to be unique across the table.
#[async_trait]
pub trait MessageBrowser: Send + Sync {
    async fn count(&self) -> Result<u64, StoreError>;

    async fn contains_message_id(&self, message_id: &str) -> Result<bool, StoreError>;

    async fn contains_correlation_id(&self, correlation_id: &str) -> Result<bool, StoreError>;

    /// Fails with [`StoreError::NotFound`] when no row has this key.
    async fn fetch(&self, key: &StorageKey) -> Result<MessageRecord, StoreError>;

    /// Metadata only. The underlying statement is released before returning.
    async fn fetch_metadata(&self, key: &StorageKey) -> Result<Metadata, StoreError>;

    /// Messages whose date lies in `[start, end)`, ordered by date.
    ///
    /// At most a fixed number of rows is returned per call regardless of
    /// how many match; callers page over the returned sequence.
    async fn iterate(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        order: SortOrder,
    ) -> Result<MetadataCursor, StoreError>;

    /// Fails with [`StoreError::NotFound`] when the key was already deleted.
    async fn delete(&self, key: &StorageKey) -> Result<(), StoreError>;
}
