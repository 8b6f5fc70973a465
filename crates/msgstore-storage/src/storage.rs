// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transactional writer on top of the message browser.
//!
//! Every `store` call inserts one row inside its own short write transaction.
//! With duplicate detection on, the insert only happens when the slot does not
//! already hold the message id; the existing key is handed back instead.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use msgstore_config::model::{PayloadKind, StorageConfig};
use msgstore_core::{
    MessageBrowser, MessageRecord, Metadata, MetadataCursor, NewMessage, Payload, SortOrder,
    StorageKey, StorageType, StoreError, StoreOutcome, TransactionalStorage,
};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, TransactionBehavior};
use tracing::{debug, warn};

use crate::browser::{BrowserOptions, MessageRecordStore, PayloadFormat, Selector};
use crate::codec;
use crate::database::{Database, format_timestamp, key_value, map_sqlite_err, row_key};
use crate::dialect::{Dialect, Returning};
use crate::listener::Statement;
use crate::schema::{
    Field, MAX_COMMENT_LEN, MAX_CORRELATION_ID_LEN, MAX_ID_LEN, MAX_LABEL_LEN, RecordSchema,
    truncate,
};

/// Write-side settings of a [`TransactionalMessageStore`].
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub store_type: StorageType,
    pub slot_id: Option<String>,
    pub store_full_message: bool,
    pub unique_message_id: bool,
    /// Days until a message-log row expires; negative means never.
    pub retention_days: i64,
    pub host: Option<String>,
    /// Status column value of new rows.
    pub initial_status: Option<String>,
}

impl StoreSettings {
    pub fn from_config(storage: &StorageConfig) -> Self {
        Self {
            store_type: storage.store_type,
            slot_id: Some(storage.slot_id.clone()).filter(|s| !s.is_empty()),
            store_full_message: storage.store_full_message,
            unique_message_id: storage.only_store_when_message_id_unique,
            retention_days: storage.retention_days,
            host: sysinfo::System::host_name(),
            initial_status: None,
        }
    }

    pub fn with_initial_status(mut self, status: Option<String>) -> Self {
        self.initial_status = status;
        self
    }
}

/// Rendered insert for one message.
#[derive(Debug, Clone)]
pub struct InsertPlan {
    pub insert: Statement,
    /// Existing-row lookup run when a duplicate-checked insert wrote nothing.
    pub lookup: Option<Statement>,
    /// Payload written after the insert on engines that stream into a locator.
    pub deferred_payload: Option<Statement>,
}

#[derive(Debug)]
enum Inserted {
    Stored(StorageKey),
    Conflict(Option<(StorageKey, Option<Value>)>),
}

#[derive(Default)]
struct InsertRow {
    columns: Vec<String>,
    values: Vec<String>,
    params: Vec<Value>,
}

impl InsertRow {
    fn bind(&mut self, column: &str, value: Value) {
        self.columns.push(column.to_string());
        self.values.push("?".to_string());
        self.params.push(value);
    }

    fn expr(&mut self, column: &str, sql: String) {
        self.columns.push(column.to_string());
        self.values.push(sql);
    }
}

/// Message store that writes rows of one slot and type.
#[derive(Debug, Clone)]
pub struct TransactionalMessageStore {
    browser: MessageRecordStore,
    settings: StoreSettings,
}

impl TransactionalMessageStore {
    pub fn new(
        db: Database,
        schema: Arc<RecordSchema>,
        settings: StoreSettings,
        options: BrowserOptions,
    ) -> Result<Self, StoreError> {
        if settings.unique_message_id && !schema.has(Field::MessageId) {
            return Err(StoreError::Config(
                "duplicate detection needs the message id column".to_string(),
            ));
        }
        let selector = Selector {
            slot_id: settings.slot_id.clone(),
            store_type: Some(settings.store_type),
            ..Selector::default()
        };
        Ok(Self {
            browser: MessageRecordStore::new(db, schema, selector, options),
            settings,
        })
    }

    /// Store over the configured table, writing serialized envelopes into blob columns.
    pub fn from_config(
        db: Database,
        schema: Arc<RecordSchema>,
        storage: &StorageConfig,
        payload_kind: PayloadKind,
    ) -> Result<Self, StoreError> {
        Self::new(
            db,
            schema,
            StoreSettings::from_config(storage),
            BrowserOptions::from_config(storage, payload_kind, true),
        )
    }

    pub fn browser(&self) -> &MessageRecordStore {
        &self.browser
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    fn dialect(&self) -> &'static Dialect {
        self.browser.database().dialect()
    }

    fn encode_payload(&self, message: &NewMessage) -> Result<Option<Value>, StoreError> {
        let Some(payload) = message.payload.as_ref().filter(|_| self.settings.store_full_message)
        else {
            return Ok(None);
        };
        let value = match self.browser.options().payload {
            PayloadFormat::Text => Value::Text(payload.as_text().into_owned()),
            PayloadFormat::Envelope { compressed } => {
                Value::Blob(codec::encode(payload, &message.context, compressed)?)
            }
            PayloadFormat::RawBlob { compressed } => {
                Value::Blob(codec::encode_raw(payload, compressed)?)
            }
        };
        Ok(Some(value))
    }

    /// Renders the insert for `message` without touching the database.
    pub fn plan(&self, message: &NewMessage) -> Result<InsertPlan, StoreError> {
        if message.message_id.trim().is_empty() {
            return Err(StoreError::InvalidData("message id must not be empty".to_string()));
        }
        if message.correlation_id.trim().is_empty() {
            return Err(StoreError::InvalidData(
                "correlation id must not be empty".to_string(),
            ));
        }

        let schema = self.browser.schema();
        let dialect = self.dialect();
        let message_id = truncate(&message.message_id, MAX_ID_LEN);
        let text = |v: Option<&String>, max: usize| match v {
            Some(v) => Value::Text(truncate(v, max)),
            None => Value::Null,
        };

        let mut row = InsertRow::default();
        if !schema.sequence().is_empty()
            && let Some(next) = dialect.key_generation_expression(schema.sequence())
        {
            row.expr(schema.key(), next);
        }
        if let Some(col) = schema.column(Field::StoreType) {
            row.bind(col, Value::Text(self.settings.store_type.code().to_string()));
        }
        if let Some(col) = schema.column(Field::SlotId) {
            row.bind(col, text(self.settings.slot_id.as_ref(), MAX_ID_LEN));
        }
        if let Some(col) = schema.column(Field::Host) {
            row.bind(col, text(self.settings.host.as_ref(), MAX_ID_LEN));
        }
        if let Some(col) = schema.column(Field::MessageId) {
            row.bind(col, Value::Text(message_id.clone()));
        }
        if let Some(col) = schema.column(Field::CorrelationId) {
            row.bind(
                col,
                Value::Text(truncate(&message.correlation_id, MAX_CORRELATION_ID_LEN)),
            );
        }
        if let Some(col) = schema.column(Field::Date) {
            row.bind(col, Value::Text(format_timestamp(message.received)));
        }
        if let Some(col) = schema.column(Field::Comment) {
            row.bind(col, text(message.comment.as_ref(), MAX_COMMENT_LEN));
        }
        if let Some(col) = schema.column(Field::Label) {
            row.bind(col, text(message.label.as_ref(), MAX_LABEL_LEN));
        }
        if let Some(col) = schema.column(Field::Expiry) {
            if self.settings.store_type == StorageType::MessageLog
                && self.settings.retention_days >= 0
            {
                row.expr(col, dialect.timestamp_after_days(self.settings.retention_days));
            } else {
                row.bind(col, Value::Null);
            }
        }

        let mut deferred = None;
        if let Some(col) = schema.column(Field::Payload) {
            let empty_blob = dialect
                .empty_blob_value()
                .filter(|_| dialect.must_insert_empty_blob_before_data());
            match (self.encode_payload(message)?, empty_blob) {
                (Some(value @ Value::Blob(_)), Some(empty)) => {
                    row.expr(col, empty.to_string());
                    deferred = Some(value);
                }
                (Some(value), _) => row.bind(col, value),
                (None, _) => row.bind(col, Value::Null),
            }
        }
        if let Some(status) = &self.settings.initial_status {
            row.bind(schema.status(), Value::Text(status.clone()));
        }

        let columns: Vec<&str> = row.columns.iter().map(String::as_str).collect();
        let mut params = row.params;
        let (lookup, source) = if self.settings.unique_message_id {
            let (guard, guard_params) = self.duplicate_guard(&message_id)?;
            params.extend(guard_params);
            let source = format!(
                "SELECT {}{} WHERE NOT EXISTS ({guard})",
                row.values.join(","),
                dialect.dummy_from()
            );
            (Some(self.existing_row_lookup(&message_id)?), source)
        } else {
            (None, format!("VALUES ({})", row.values.join(",")))
        };
        let sql = dialect.insert_returning(schema.table(), &columns, &source, schema.key());

        let deferred_payload = deferred.map(|value| Statement {
            sql: format!(
                "UPDATE {} SET {}=? WHERE {}=?",
                schema.table(),
                schema.column(Field::Payload).unwrap_or_default(),
                schema.key()
            ),
            params: vec![value],
        });

        Ok(InsertPlan {
            insert: Statement { sql, params },
            lookup,
            deferred_payload,
        })
    }

    /// `SELECT 1 FROM T WHERE MID=? [AND SLOT=?]`
    fn duplicate_guard(&self, message_id: &str) -> Result<(String, Vec<Value>), StoreError> {
        let schema = self.browser.schema();
        let column = schema.column(Field::MessageId).ok_or_else(|| {
            StoreError::Config("duplicate detection needs the message id column".to_string())
        })?;
        let mut sql = format!("SELECT 1 FROM {} WHERE {column}=?", schema.table());
        let mut params = vec![Value::Text(message_id.to_string())];
        if let (Some(slot_column), Some(slot)) =
            (schema.column(Field::SlotId), &self.settings.slot_id)
        {
            sql.push_str(&format!(" AND {slot_column}=?"));
            params.push(Value::Text(slot.clone()));
        }
        Ok((sql, params))
    }

    fn existing_row_lookup(&self, message_id: &str) -> Result<Statement, StoreError> {
        let schema = self.browser.schema();
        let (guard, params) = self.duplicate_guard(message_id)?;
        let mut select = format!("SELECT {}", schema.key());
        if self.settings.store_full_message
            && let Some(payload) = schema.column(Field::Payload)
        {
            select.push(',');
            select.push_str(payload);
        }
        // Reuse the guard's FROM/WHERE with the key and payload in front.
        let sql = guard.replacen("SELECT 1", &select, 1);
        let sql = self
            .dialect()
            .apply_row_limit(&format!("{sql} ORDER BY {}", schema.key()), 1);
        Ok(Statement { sql, params })
    }

    /// Stores `message` in its own write transaction.
    pub async fn store(&self, message: &NewMessage) -> Result<StoreOutcome, StoreError> {
        let plan = self.plan(message)?;
        let returning = self.dialect().returning();
        let inserted = self
            .browser
            .database()
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let inserted = execute(&tx, &plan, returning)?;
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        self.outcome(message, inserted)
    }

    /// Stores `message` on a connection whose transaction the caller controls.
    pub fn store_on_connection(
        &self,
        conn: &rusqlite::Connection,
        message: &NewMessage,
    ) -> Result<StoreOutcome, StoreError> {
        let plan = self.plan(message)?;
        let inserted = execute(conn, &plan, self.dialect().returning()).map_err(map_sqlite_err)?;
        self.outcome(message, inserted)
    }

    fn outcome(&self, message: &NewMessage, inserted: Inserted) -> Result<StoreOutcome, StoreError> {
        match inserted {
            Inserted::Stored(key) => {
                debug!(
                    key = %key,
                    message_id = %message.message_id,
                    table = %self.browser.schema().table(),
                    "message stored"
                );
                Ok(StoreOutcome::Stored(key))
            }
            Inserted::Conflict(None) => Err(StoreError::InvalidData(format!(
                "message id `{}` was reported as present but no row was found",
                message.message_id
            ))),
            Inserted::Conflict(Some((key, stored))) => {
                let payload_differs = self.payload_differs(message, stored);
                if payload_differs {
                    warn!(
                        key = %key,
                        message_id = %message.message_id,
                        "duplicate message id with a different payload, keeping the stored one"
                    );
                } else {
                    debug!(key = %key, message_id = %message.message_id, "duplicate message ignored");
                }
                Ok(StoreOutcome::Duplicate {
                    key,
                    payload_differs,
                })
            }
        }
    }

    fn payload_differs(&self, message: &NewMessage, stored: Option<Value>) -> bool {
        if !self.settings.store_full_message || !self.browser.schema().has(Field::Payload) {
            return false;
        }
        let stored = match stored.map(|v| self.browser.options().payload.decode(v)) {
            None => None,
            Some(Ok((payload, _))) => payload,
            Some(Err(e)) => {
                warn!(error = %e, "stored payload could not be decoded for comparison");
                return true;
            }
        };
        match (stored.as_ref(), message.payload.as_ref()) {
            (None, None) => false,
            // A text column only ever held the text form of the payload.
            (Some(old), Some(new)) if self.browser.options().payload == PayloadFormat::Text => {
                old.as_text() != new.as_text()
            }
            (Some(old), Some(new)) => old.as_bytes() != new.as_bytes(),
            _ => true,
        }
    }
}

fn execute(
    conn: &rusqlite::Connection,
    plan: &InsertPlan,
    returning: Returning,
) -> rusqlite::Result<Inserted> {
    let params = rusqlite::params_from_iter(plan.insert.params.iter());
    let key = match returning {
        Returning::LastInsertId => {
            let inserted = conn.execute(&plan.insert.sql, params)?;
            (inserted > 0).then(|| StorageKey::from(conn.last_insert_rowid()))
        }
        Returning::Clause | Returning::Output | Returning::IntoBind => conn
            .query_row(&plan.insert.sql, params, |row| row_key(row, 0))
            .optional()?,
    };

    match (key, &plan.lookup) {
        (Some(key), _) => {
            if let Some(update) = &plan.deferred_payload {
                let mut params = update.params.clone();
                params.push(key_value(&key));
                conn.execute(&update.sql, rusqlite::params_from_iter(params))?;
            }
            Ok(Inserted::Stored(key))
        }
        (None, Some(lookup)) => {
            let existing = conn
                .query_row(
                    &lookup.sql,
                    rusqlite::params_from_iter(lookup.params.iter()),
                    |row| {
                        let key = row_key(row, 0)?;
                        let payload = if row.as_ref().column_count() > 1 {
                            Some(row.get::<_, Value>(1)?)
                        } else {
                            None
                        };
                        Ok((key, payload))
                    },
                )
                .optional()?;
            Ok(Inserted::Conflict(existing))
        }
        (None, None) => Err(rusqlite::Error::QueryReturnedNoRows),
    }
}

#[async_trait]
impl MessageBrowser for TransactionalMessageStore {
    async fn count(&self) -> Result<u64, StoreError> {
        self.browser.count().await
    }

    async fn contains_message_id(&self, message_id: &str) -> Result<bool, StoreError> {
        self.browser.contains_message_id(message_id).await
    }

    async fn contains_correlation_id(&self, correlation_id: &str) -> Result<bool, StoreError> {
        self.browser.contains_correlation_id(correlation_id).await
    }

    async fn fetch(&self, key: &StorageKey) -> Result<MessageRecord, StoreError> {
        self.browser.fetch(key).await
    }

    async fn fetch_metadata(&self, key: &StorageKey) -> Result<Metadata, StoreError> {
        self.browser.fetch_metadata(key).await
    }

    async fn iterate(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        order: SortOrder,
    ) -> Result<MetadataCursor, StoreError> {
        self.browser.iterate(start, end, order).await
    }

    async fn delete(&self, key: &StorageKey) -> Result<(), StoreError> {
        self.browser.delete(key).await
    }
}

#[async_trait]
impl TransactionalStorage for TransactionalMessageStore {
    async fn store(&self, message: NewMessage) -> Result<StoreOutcome, StoreError> {
        TransactionalMessageStore::store(self, &message).await
    }
}

/// Text form of a payload for display, or an empty string when absent.
pub fn payload_text(payload: Option<&Payload>) -> String {
    payload.map(|p| p.as_text().into_owned()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    use super::*;
    use crate::testing;

    async fn store_with(
        dir: &tempfile::TempDir,
        tweak: impl FnOnce(&mut msgstore_config::model::MsgstoreConfig),
    ) -> TransactionalMessageStore {
        let mut config = testing::config(dir);
        tweak(&mut config);
        let (db, schema) = testing::open(&config).await;
        TransactionalMessageStore::from_config(db, schema, &config.storage, config.queue.payload_kind)
            .unwrap()
    }

    #[tokio::test]
    async fn stored_message_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |_| {}).await;
        let received = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let message = NewMessage::new("m-1", "c-1", "<order id=\"1\"/>")
            .received_at(received)
            .with_comment("first")
            .with_label("blue")
            .with_context("origin", "billing");

        let outcome = store.store(&message).await.unwrap();
        let StoreOutcome::Stored(key) = outcome else {
            panic!("expected a new row, got {outcome:?}");
        };

        let record = store.fetch(&key).await.unwrap();
        assert_eq!(record.payload, Some(Payload::from("<order id=\"1\"/>")));
        assert_eq!(record.context.get("origin").map(String::as_str), Some("billing"));
        assert_eq!(record.metadata.message_id.as_deref(), Some("m-1"));
        assert_eq!(record.metadata.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(record.metadata.comment.as_deref(), Some("first"));
        assert_eq!(record.metadata.label.as_deref(), Some("blue"));
        assert_eq!(record.metadata.insert_date, Some(received));
        assert_eq!(record.metadata.store_type, Some(StorageType::MessageStorage));
        assert_eq!(record.metadata.slot_id.as_deref(), Some("default"));
        assert_eq!(record.metadata.expiry_date, None);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |_| {}).await;
        let err = store.store(&NewMessage::new("", "c", "x")).await.unwrap_err();
        assert_eq!(err.code(), "invalid_data");
        let err = store.store(&NewMessage::new("m", " ", "x")).await.unwrap_err();
        assert_eq!(err.code(), "invalid_data");
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn long_fields_are_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |_| {}).await;
        let message = NewMessage::new("m".repeat(150), "c".repeat(300), "x")
            .with_comment("é".repeat(1200));
        let key = store.store(&message).await.unwrap().key().clone();
        let meta = store.fetch_metadata(&key).await.unwrap();
        assert_eq!(meta.message_id.unwrap().chars().count(), MAX_ID_LEN);
        assert_eq!(meta.correlation_id.unwrap().chars().count(), MAX_CORRELATION_ID_LEN);
        assert_eq!(meta.comment.unwrap().chars().count(), MAX_COMMENT_LEN);
    }

    #[tokio::test]
    async fn duplicates_report_payload_difference() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |c| c.storage.only_store_when_message_id_unique = true).await;

        let first = store.store(&NewMessage::new("m-1", "c", "same")).await.unwrap();
        let again = store.store(&NewMessage::new("m-1", "c", "same")).await.unwrap();
        assert_eq!(
            again,
            StoreOutcome::Duplicate {
                key: first.key().clone(),
                payload_differs: false
            }
        );

        let changed = store.store(&NewMessage::new("m-1", "c", "other")).await.unwrap();
        assert_eq!(
            changed,
            StoreOutcome::Duplicate {
                key: first.key().clone(),
                payload_differs: true
            }
        );
        assert_eq!(store.count().await.unwrap(), 1);

        let record = store.fetch(first.key()).await.unwrap();
        assert_eq!(record.payload, Some(Payload::from("same")));
    }

    #[tokio::test]
    async fn binary_duplicates_compare_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |c| c.storage.only_store_when_message_id_unique = true).await;

        let first = store
            .store(&NewMessage::new("m-1", "c", vec![0xffu8, 0x01]))
            .await
            .unwrap();
        // Both payloads have the same lossy text form.
        let changed = store
            .store(&NewMessage::new("m-1", "c", vec![0xfeu8, 0x01]))
            .await
            .unwrap();
        assert_eq!(
            changed,
            StoreOutcome::Duplicate {
                key: first.key().clone(),
                payload_differs: true
            }
        );

        let again = store
            .store(&NewMessage::new("m-1", "c", vec![0xffu8, 0x01]))
            .await
            .unwrap();
        assert_eq!(
            again,
            StoreOutcome::Duplicate {
                key: first.key().clone(),
                payload_differs: false
            }
        );
    }

    #[tokio::test]
    async fn duplicate_check_is_per_slot() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |c| c.storage.only_store_when_message_id_unique = true).await;
        store.store(&NewMessage::new("m-1", "c", "a")).await.unwrap();

        let mut config = testing::config(&dir);
        config.storage.slot_id = "other".into();
        config.storage.only_store_when_message_id_unique = true;
        let (db, schema) = testing::open(&config).await;
        let other =
            TransactionalMessageStore::from_config(db, schema, &config.storage, PayloadKind::Blob)
                .unwrap();
        let outcome = other.store(&NewMessage::new("m-1", "c", "a")).await.unwrap();
        assert!(!outcome.is_duplicate());
    }

    #[tokio::test]
    async fn message_log_rows_expire_after_retention() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |c| {
            c.storage.store_type = StorageType::MessageLog;
            c.storage.retention_days = 10;
        })
        .await;
        let key = store.store(&NewMessage::new("m", "c", "x")).await.unwrap().key().clone();
        let expiry = store.fetch_metadata(&key).await.unwrap().expiry_date.unwrap();
        let expected = Utc::now() + Duration::days(10);
        assert!((expiry - expected).num_minutes().abs() < 5, "expiry {expiry}");
    }

    #[tokio::test]
    async fn negative_retention_never_expires() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |c| {
            c.storage.store_type = StorageType::MessageLog;
            c.storage.retention_days = -1;
        })
        .await;
        let key = store.store(&NewMessage::new("m", "c", "x")).await.unwrap().key().clone();
        assert_eq!(store.fetch_metadata(&key).await.unwrap().expiry_date, None);
    }

    #[tokio::test]
    async fn metadata_only_when_full_message_is_off() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |c| c.storage.store_full_message = false).await;
        let key = store.store(&NewMessage::new("m", "c", "body")).await.unwrap().key().clone();
        let record = store.fetch(&key).await.unwrap();
        assert_eq!(record.payload, None);
        assert_eq!(record.metadata.message_id.as_deref(), Some("m"));
    }

    #[tokio::test]
    async fn uncompressed_and_text_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |c| c.storage.blobs_compressed = false).await;
        let key = store.store(&NewMessage::new("m", "c", vec![0u8, 1, 2])).await.unwrap();
        let record = store.fetch(key.key()).await.unwrap();
        assert_eq!(record.payload, Some(Payload::Bytes(vec![0, 1, 2])));

        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |c| c.queue.payload_kind = PayloadKind::Text).await;
        let key = store.store(&NewMessage::new("m", "c", "plain")).await.unwrap();
        let record = store.fetch(key.key()).await.unwrap();
        assert_eq!(record.payload, Some(Payload::from("plain")));
    }

    #[tokio::test]
    async fn caller_transaction_controls_the_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |_| {}).await;
        let mut conn = store.browser().database().open_blocking().unwrap();

        let tx = conn.transaction().unwrap();
        store
            .store_on_connection(&tx, &NewMessage::new("m-1", "c", "x"))
            .unwrap();
        tx.rollback().unwrap();
        assert_eq!(store.count().await.unwrap(), 0);

        let tx = conn.transaction().unwrap();
        let outcome = store
            .store_on_connection(&tx, &NewMessage::new("m-2", "c", "x"))
            .unwrap();
        tx.commit().unwrap();
        assert!(store.contains_message_id("m-2").await.unwrap());
        assert!(store.fetch(outcome.key()).await.is_ok());
    }

    #[tokio::test]
    async fn unique_insert_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, |c| {
            c.storage.only_store_when_message_id_unique = true;
            c.storage.columns.label = String::new();
            c.storage.columns.host = String::new();
        })
        .await;
        let plan = store.plan(&NewMessage::new("m-1", "c-1", "x")).unwrap();
        assert!(
            plan.insert.sql.starts_with(
                "INSERT INTO MESSAGE_STORE (STORE_TYPE,SLOT_ID,MESSAGE_ID,CORRELATION_ID,\
                 MESSAGE_DATE,COMMENTS,EXPIRY_DATE,MESSAGE) SELECT ?,?,?,?,?,?,?,? WHERE NOT EXISTS \
                 (SELECT 1 FROM MESSAGE_STORE WHERE MESSAGE_ID=? AND SLOT_ID=?)"
            ),
            "{}",
            plan.insert.sql
        );
        assert!(plan.insert.sql.ends_with("RETURNING MESSAGE_KEY"));
        assert_eq!(plan.insert.params.len(), 10);
        assert_eq!(
            plan.lookup.unwrap().sql,
            "SELECT MESSAGE_KEY,MESSAGE FROM MESSAGE_STORE WHERE MESSAGE_ID=? AND SLOT_ID=? \
             ORDER BY MESSAGE_KEY LIMIT 1"
        );
        assert!(plan.deferred_payload.is_none());
    }

    proptest! {
        #[test]
        fn truncation_keeps_char_boundaries(s in "\\PC{0,300}", max in 0usize..200) {
            let cut = truncate(&s, max);
            prop_assert!(cut.chars().count() <= max);
            prop_assert!(s.starts_with(&cut));
            if s.chars().count() <= max {
                prop_assert_eq!(cut, s);
            }
        }
    }
}
