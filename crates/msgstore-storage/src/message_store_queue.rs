// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Producer/consumer façade over one message table.
//!
//! Producers `store` rows of type `M` with the AVAILABLE status; consumers poll
//! the same rows through the table-backed queue. Administrators get a paged
//! query, payload lookup, forced moves, and deletes.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use msgstore_config::model::{DonePolicy, MsgstoreConfig};
use msgstore_core::{
    AdapterType, HealthStatus, MessageBrowser, MessageFilter, MessageRecord, Metadata,
    MetadataCursor, NewMessage, Page, PluginAdapter, ProcessState, ProcessStateQueue, SortOrder,
    StorageKey, StorageType, StoreError, StoreOutcome, TransactionalStorage,
};
use tracing::{debug, info};

use crate::browse;
use crate::browser::BrowserOptions;
use crate::database::Database;
use crate::registry::{CheckReport, StoreRegistry};
use crate::schema::{Field, MAX_COMMENT_LEN, RecordSchema, truncate};
use crate::storage::{StoreSettings, TransactionalMessageStore, payload_text};
use crate::table_queue::TableBackedQueue;

/// A message store and a polling queue over the same table and slot.
#[derive(Debug, Clone)]
pub struct MessageStoreQueue {
    store: TransactionalMessageStore,
    queue: TableBackedQueue,
    on_done: DonePolicy,
    retention_days: i64,
    check: Option<CheckReport>,
}

impl MessageStoreQueue {
    pub fn new(
        store: TransactionalMessageStore,
        queue: TableBackedQueue,
        on_done: DonePolicy,
        retention_days: i64,
    ) -> Self {
        Self {
            store,
            queue,
            on_done,
            retention_days,
            check: None,
        }
    }

    /// Builds both halves from one configuration. The store type is always `M`.
    pub fn from_config(
        db: Database,
        schema: Arc<RecordSchema>,
        config: &MsgstoreConfig,
    ) -> Result<Self, StoreError> {
        let mut config = config.clone();
        config.storage.store_type = StorageType::MessageStorage;

        let queue = TableBackedQueue::from_config(db.clone(), schema.clone(), &config, true);
        let available = queue
            .queries()
            .statuses()
            .value(ProcessState::Available)
            .map(str::to_string)
            .ok_or_else(|| {
                StoreError::Config(
                    "queue.status.AVAILABLE must be set: stored messages need a status".to_string(),
                )
            })?;

        let settings =
            StoreSettings::from_config(&config.storage).with_initial_status(Some(available));
        let options =
            BrowserOptions::from_config(&config.storage, config.queue.payload_kind, true);
        let store = TransactionalMessageStore::new(db, schema, settings, options)?;

        Ok(Self::new(
            store,
            queue,
            config.queue.on_done,
            config.storage.retention_days,
        ))
    }

    /// Opens the database, runs the startup checks once, and builds the façade.
    pub async fn open(config: &MsgstoreConfig, registry: &StoreRegistry) -> Result<Self, StoreError> {
        let db = Database::open(&config.database).await?;
        let schema = Arc::new(RecordSchema::from_config(&config.storage)?);
        let report = registry
            .verify(&db, &schema, &config.storage, config.queue.payload_kind)
            .await?;
        let mut this = Self::from_config(db, schema, config)?;
        this.check = Some(report);
        info!(
            table = %this.store.browser().schema().table(),
            slot = %config.storage.slot_id,
            on_done = ?this.on_done,
            "message store queue ready"
        );
        Ok(this)
    }

    pub fn store_half(&self) -> &TransactionalMessageStore {
        &self.store
    }

    pub fn queue_half(&self) -> &TableBackedQueue {
        &self.queue
    }

    pub fn check_report(&self) -> Option<&CheckReport> {
        self.check.as_ref()
    }

    pub fn on_done(&self) -> DonePolicy {
        self.on_done
    }

    /// Filtered, paged listing of every row of this slot.
    pub async fn query(&self, filter: &MessageFilter) -> Result<Page<Metadata>, StoreError> {
        let cursor = self
            .queue
            .records()
            .iterate(filter.start, filter.end, filter.order)
            .await?;
        browse::query(cursor, filter).await
    }

    /// Payload of `key` as text; empty when only metadata was stored.
    pub async fn fetch_payload(&self, key: &StorageKey) -> Result<String, StoreError> {
        let record = self.queue.records().fetch(key).await?;
        Ok(payload_text(record.payload.as_ref()))
    }

    /// Administrative move, subject to the same transition rules as consumers.
    pub async fn move_to(
        &self,
        key: &StorageKey,
        state: ProcessState,
        reason: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.change_state(key, state, reason).await
    }

    fn retain_assignments(&self) -> Vec<String> {
        let schema = self.store.browser().schema();
        match schema.column(Field::Expiry) {
            Some(expiry) if self.retention_days >= 0 => vec![format!(
                "{expiry}={}",
                self.store
                    .browser()
                    .database()
                    .dialect()
                    .timestamp_after_days(self.retention_days)
            )],
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl PluginAdapter for MessageStoreQueue {
    fn name(&self) -> &str {
        self.store.browser().schema().table()
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Queue
    }

    async fn health_check(&self) -> Result<HealthStatus, StoreError> {
        self.store.browser().database().health_check().await?;
        match &self.check {
            Some(report) if !report.cached && !report.is_clean() => {
                Ok(HealthStatus::Degraded(report.findings().join("; ")))
            }
            _ => Ok(HealthStatus::Healthy),
        }
    }

    async fn shutdown(&self) -> Result<(), StoreError> {
        self.store.browser().database().checkpoint().await
    }
}

#[async_trait]
impl MessageBrowser for MessageStoreQueue {
    async fn count(&self) -> Result<u64, StoreError> {
        self.queue.records().count().await
    }

    async fn contains_message_id(&self, message_id: &str) -> Result<bool, StoreError> {
        self.queue.records().contains_message_id(message_id).await
    }

    async fn contains_correlation_id(&self, correlation_id: &str) -> Result<bool, StoreError> {
        self.queue.records().contains_correlation_id(correlation_id).await
    }

    async fn fetch(&self, key: &StorageKey) -> Result<MessageRecord, StoreError> {
        self.queue.records().fetch(key).await
    }

    async fn fetch_metadata(&self, key: &StorageKey) -> Result<Metadata, StoreError> {
        self.queue.records().fetch_metadata(key).await
    }

    async fn iterate(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        order: SortOrder,
    ) -> Result<MetadataCursor, StoreError> {
        self.queue.records().iterate(start, end, order).await
    }

    async fn delete(&self, key: &StorageKey) -> Result<(), StoreError> {
        self.queue.records().delete(key).await
    }
}

#[async_trait]
impl TransactionalStorage for MessageStoreQueue {
    async fn store(&self, message: NewMessage) -> Result<StoreOutcome, StoreError> {
        self.store.store(&message).await
    }
}

#[async_trait]
impl ProcessStateQueue for MessageStoreQueue {
    fn known_states(&self) -> BTreeSet<ProcessState> {
        self.queue.known_states()
    }

    fn target_states(&self, from: ProcessState) -> BTreeSet<ProcessState> {
        self.queue.target_states(from)
    }

    async fn has_available(&self) -> Result<bool, StoreError> {
        self.queue.has_available().await
    }

    async fn claim(&self) -> Result<Option<MessageRecord>, StoreError> {
        self.queue.claim().await
    }

    async fn change_state(
        &self,
        key: &StorageKey,
        target: ProcessState,
        reason: Option<&str>,
    ) -> Result<bool, StoreError> {
        if target != ProcessState::Done {
            return self.queue.change_state(key, target, reason).await;
        }
        match self.on_done {
            DonePolicy::Retain => {
                let comment = Some(reason.map(|r| truncate(r, MAX_COMMENT_LEN)));
                self.queue
                    .transition(key, target, comment, &self.retain_assignments())
                    .await
            }
            DonePolicy::Delete => {
                let deleted = self.queue.delete_on(key, target).await?;
                if deleted {
                    debug!(key = %key, "done message removed");
                }
                Ok(deleted)
            }
        }
    }

    fn browser(&self, state: ProcessState) -> Result<Box<dyn MessageBrowser>, StoreError> {
        self.queue.browser(state)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::testing;

    async fn open_with(
        dir: &tempfile::TempDir,
        tweak: impl FnOnce(&mut MsgstoreConfig),
    ) -> MessageStoreQueue {
        let mut config = testing::config(dir);
        tweak(&mut config);
        MessageStoreQueue::open(&config, &StoreRegistry::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn stored_messages_are_claimable() {
        let dir = tempfile::tempdir().unwrap();
        let msq = open_with(&dir, |_| {}).await;
        assert_eq!(msq.health_check().await.unwrap(), HealthStatus::Healthy);

        let key = msq
            .store(NewMessage::new("m-1", "c-1", "hello"))
            .await
            .unwrap()
            .key()
            .clone();
        assert!(msq.has_available().await.unwrap());

        let record = msq.claim().await.unwrap().unwrap();
        assert_eq!(record.key(), &key);
        assert_eq!(record.metadata.status, Some(ProcessState::Available));
        assert_eq!(record.payload.unwrap().as_text(), "hello");
        assert!(msq.change_state(&key, ProcessState::InProcess, None).await.unwrap());
        assert!(!msq.has_available().await.unwrap());
    }

    #[tokio::test]
    async fn retained_done_rows_get_an_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let msq = open_with(&dir, |c| c.storage.retention_days = 7).await;
        let key = msq
            .store(NewMessage::new("m", "c", "x"))
            .await
            .unwrap()
            .key()
            .clone();
        assert!(msq.change_state(&key, ProcessState::Done, Some("ok")).await.unwrap());

        let meta = msq.fetch_metadata(&key).await.unwrap();
        assert_eq!(meta.status, Some(ProcessState::Done));
        assert_eq!(meta.comment.as_deref(), Some("ok"));
        let expiry = meta.expiry_date.unwrap();
        assert!((expiry - (Utc::now() + Duration::days(7))).num_minutes().abs() < 5);
        assert_eq!(msq.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_policy_removes_done_rows() {
        let dir = tempfile::tempdir().unwrap();
        let msq = open_with(&dir, |c| c.queue.on_done = DonePolicy::Delete).await;
        let key = msq
            .store(NewMessage::new("m", "c", "x"))
            .await
            .unwrap()
            .key()
            .clone();
        assert!(msq.change_state(&key, ProcessState::Done, None).await.unwrap());
        assert_eq!(msq.count().await.unwrap(), 0);
        assert!(!msq.change_state(&key, ProcessState::Done, None).await.unwrap());
        assert_eq!(msq.fetch(&key).await.unwrap_err().code(), "not_found");
    }

    #[tokio::test]
    async fn management_interface() {
        let dir = tempfile::tempdir().unwrap();
        let msq = open_with(&dir, |_| {}).await;
        let base = Utc::now() - Duration::hours(1);
        let mut keys = Vec::new();
        for n in 0..5 {
            let message = NewMessage::new(format!("m-{n}"), "c", format!("payload {n}"))
                .received_at(base + Duration::minutes(n))
                .with_label(if n % 2 == 0 { "even" } else { "odd" });
            keys.push(msq.store(message).await.unwrap().key().clone());
        }

        let page = msq
            .query(&MessageFilter {
                label: Some("even".into()),
                order: SortOrder::Asc,
                max: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<_> = page
            .items
            .iter()
            .map(|m| m.message_id.clone().unwrap())
            .collect();
        assert_eq!(ids, vec!["m-0", "m-2"]);
        assert!(page.has_more);

        assert_eq!(msq.fetch_payload(&keys[3]).await.unwrap(), "payload 3");
        assert!(msq.move_to(&keys[3], ProcessState::Hold, Some("wait")).await.unwrap());
        assert!(!msq.move_to(&keys[3], ProcessState::Done, None).await.unwrap());
        assert_eq!(msq.browser(ProcessState::Hold).unwrap().count().await.unwrap(), 1);

        msq.delete(&keys[4]).await.unwrap();
        assert_eq!(msq.count().await.unwrap(), 4);
        assert_eq!(msq.delete(&keys[4]).await.unwrap_err().code(), "not_found");
    }

    #[tokio::test]
    async fn complement_available_cannot_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = testing::config(&dir);
        config.queue.status.insert(ProcessState::Available, String::new());
        let (db, schema) = testing::open(&config).await;
        let err = MessageStoreQueue::from_config(db, schema, &config).unwrap_err();
        assert_eq!(err.code(), "configuration");
    }

    #[tokio::test]
    async fn missing_table_degrades_health() {
        let dir = tempfile::tempdir().unwrap();
        let msq = open_with(&dir, |c| c.storage.create_table = false).await;
        match msq.health_check().await.unwrap() {
            HealthStatus::Degraded(reason) => assert!(reason.contains("does not exist")),
            other => panic!("unexpected health {other:?}"),
        }
        msq.shutdown().await.unwrap();
    }
}
