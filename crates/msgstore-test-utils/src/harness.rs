// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` creates a temp SQLite database, the message table, and a
//! [`MessageStoreQueue`] configured by the builder. Further queues over the
//! same database (other slots, more workers) come from [`TestHarness::queue`].

use std::sync::Arc;

use msgstore_config::model::{DonePolicy, MsgstoreConfig};
use msgstore_core::{NewMessage, StorageKey, StoreError};
use msgstore_storage::{MessageStoreQueue, StoreRegistry};

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    config: MsgstoreConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        let mut config = MsgstoreConfig::default();
        config.storage.create_table = true;
        Self { config }
    }

    /// Keep DONE rows or delete them.
    pub fn with_done_policy(mut self, policy: DonePolicy) -> Self {
        self.config.queue.on_done = policy;
        self
    }

    /// Detect duplicate message ids on store.
    pub fn with_unique_message_ids(mut self) -> Self {
        self.config.storage.only_store_when_message_id_unique = true;
        self
    }

    pub fn with_slot(mut self, slot_id: &str) -> Self {
        self.config.storage.slot_id = slot_id.to_string();
        self
    }

    /// Arbitrary configuration changes.
    pub fn configure(mut self, f: impl FnOnce(&mut MsgstoreConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Build the test harness, creating the database and the table.
    pub async fn build(mut self) -> Result<TestHarness, StoreError> {
        let temp_dir = tempfile::TempDir::new().map_err(|e| StoreError::Storage {
            source: Box::new(e),
        })?;
        self.config.database.path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .into_owned();

        let registry = StoreRegistry::new();
        let queue = Arc::new(MessageStoreQueue::open(&self.config, &registry).await?);

        Ok(TestHarness {
            queue,
            config: self.config,
            registry,
            _temp_dir: temp_dir,
        })
    }
}

/// A message store queue over a temp database, removed on drop.
pub struct TestHarness {
    pub queue: Arc<MessageStoreQueue>,
    pub config: MsgstoreConfig,
    registry: StoreRegistry,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Harness with the default configuration.
    pub async fn new() -> Result<Self, StoreError> {
        Self::builder().build().await
    }

    /// Another queue over the same database, e.g. for a second worker or slot.
    pub async fn queue(
        &self,
        f: impl FnOnce(&mut MsgstoreConfig),
    ) -> Result<Arc<MessageStoreQueue>, StoreError> {
        let mut config = self.config.clone();
        f(&mut config);
        Ok(Arc::new(
            MessageStoreQueue::open(&config, &self.registry).await?,
        ))
    }

    /// Stores a text message and returns its key.
    pub async fn store_text(
        &self,
        message_id: &str,
        payload: &str,
    ) -> Result<StorageKey, StoreError> {
        let message = NewMessage::new(message_id, format!("corr-{message_id}"), payload);
        let outcome = self.queue.store_half().store(&message).await?;
        Ok(outcome.key().clone())
    }
}
