// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read access to one logical queue inside the message table.
//!
//! Every statement is scoped by a [`Selector`] (slot, store type, status,
//! extra condition). Primary-key lookups skip the selector when the key is
//! known to be unique across the whole table.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use msgstore_config::model::{PayloadKind, StorageConfig};
use msgstore_core::{
    MessageBrowser, MessageRecord, Metadata, MetadataCursor, Payload, SortOrder, StorageKey,
    StorageType, StoreError,
};
use rusqlite::OptionalExtension;
use rusqlite::types::{Value, ValueRef};
use tracing::debug;

use crate::codec;
use crate::database::{
    Database, format_timestamp, key_from_value, key_value, map_sqlite_err, parse_timestamp,
};
use crate::listener::StatusMap;
use crate::schema::{Field, RecordSchema};

/// Upper bound on rows returned by one listing query.
pub const LIST_ROW_CAP: usize = 100;

/// Predicate on the status column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusFilter {
    /// `status = 'v'`
    Is(String),
    /// `status IN ('a','b')`
    AnyOf(Vec<String>),
    /// `status NOT IN ('a','b')`
    NoneOf(Vec<String>),
}

impl StatusFilter {
    pub fn render(&self, column: &str) -> String {
        match self {
            StatusFilter::Is(value) => format!("{column}={}", sql_literal(value)),
            StatusFilter::AnyOf(values) => format!("{column} IN ({})", literal_list(values)),
            StatusFilter::NoneOf(values) if values.is_empty() => format!("{column} IS NOT NULL"),
            StatusFilter::NoneOf(values) => {
                format!("{column} NOT IN ({})", literal_list(values))
            }
        }
    }
}

/// Quotes a string as an SQL literal.
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn literal_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| sql_literal(v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Which rows of the table belong to a store or a per-state view of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    pub slot_id: Option<String>,
    pub store_type: Option<StorageType>,
    pub status: Option<StatusFilter>,
    /// Free-form predicate over alias `t`.
    pub select_condition: Option<String>,
}

impl Selector {
    /// Renders the `WHERE` body and its parameters.
    ///
    /// With `alias` unset the columns are unqualified and the free-form select
    /// condition (which refers to `t`) is left out.
    pub fn render(&self, schema: &RecordSchema, alias: Option<&str>) -> (String, Vec<Value>) {
        let col = |name: &str| match alias {
            Some(a) => format!("{a}.{name}"),
            None => name.to_string(),
        };
        let mut parts = Vec::new();
        let mut params = Vec::new();
        if let (Some(slot), Some(column)) = (&self.slot_id, schema.column(Field::SlotId)) {
            parts.push(format!("{}=?", col(column)));
            params.push(Value::Text(slot.clone()));
        }
        if let (Some(ty), Some(column)) = (self.store_type, schema.column(Field::StoreType)) {
            parts.push(format!("{}=?", col(column)));
            params.push(Value::Text(ty.code().to_string()));
        }
        if let Some(status) = &self.status {
            parts.push(status.render(&col(schema.status())));
        }
        if alias.is_some()
            && let Some(condition) = &self.select_condition
        {
            parts.push(format!("({condition})"));
        }
        if parts.is_empty() {
            ("1=1".to_string(), params)
        } else {
            (parts.join(" AND "), params)
        }
    }
}

/// How the payload column is read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Character column holding the message text.
    Text,
    /// Envelope written by [`crate::storage::TransactionalMessageStore`].
    Envelope { compressed: bool },
    /// Opaque bytes written by another producer.
    RawBlob { compressed: bool },
}

impl PayloadFormat {
    pub fn for_kind(kind: PayloadKind, compressed: bool, envelope: bool) -> Self {
        match kind {
            PayloadKind::Text | PayloadKind::Clob => PayloadFormat::Text,
            PayloadKind::Blob if envelope => PayloadFormat::Envelope { compressed },
            PayloadKind::Blob => PayloadFormat::RawBlob { compressed },
        }
    }

    /// Decodes one payload cell into payload and context.
    pub fn decode(
        self,
        value: Value,
    ) -> Result<(Option<Payload>, BTreeMap<String, String>), StoreError> {
        match (value, self) {
            (Value::Null, _) => Ok((None, BTreeMap::new())),
            (Value::Text(text), _) => Ok((Some(Payload::Text(text)), BTreeMap::new())),
            (Value::Blob(bytes), PayloadFormat::Envelope { compressed }) => {
                let decoded = codec::decode(&bytes, compressed)?;
                Ok((Some(decoded.payload), decoded.context))
            }
            (Value::Blob(bytes), PayloadFormat::RawBlob { compressed }) => {
                Ok((Some(codec::decode_raw(&bytes, compressed)), BTreeMap::new()))
            }
            (Value::Blob(bytes), PayloadFormat::Text) => Ok((
                Some(Payload::Text(String::from_utf8_lossy(&bytes).into_owned())),
                BTreeMap::new(),
            )),
            (Value::Integer(n), _) => Ok((Some(Payload::Text(n.to_string())), BTreeMap::new())),
            (Value::Real(r), _) => Ok((Some(Payload::Text(r.to_string())), BTreeMap::new())),
        }
    }
}

/// Settings that do not affect which rows are visible.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub assume_primary_key_unique: bool,
    /// Order used when the caller passes [`SortOrder::None`]. Never `None` itself.
    pub default_order: SortOrder,
    pub payload: PayloadFormat,
}

impl BrowserOptions {
    pub fn from_config(storage: &StorageConfig, payload_kind: PayloadKind, envelope: bool) -> Self {
        let default_order = match storage.order {
            SortOrder::None if storage.store_type == StorageType::ErrorStore => SortOrder::Asc,
            SortOrder::None => SortOrder::Desc,
            explicit => explicit,
        };
        Self {
            assume_primary_key_unique: storage.assume_primary_key_unique,
            default_order,
            payload: PayloadFormat::for_kind(payload_kind, storage.blobs_compressed, envelope),
        }
    }
}

/// Browser over the rows matched by one [`Selector`].
#[derive(Debug, Clone)]
pub struct MessageRecordStore {
    db: Database,
    schema: Arc<RecordSchema>,
    selector: Selector,
    options: BrowserOptions,
    status_map: Option<Arc<StatusMap>>,
}

impl MessageRecordStore {
    pub fn new(
        db: Database,
        schema: Arc<RecordSchema>,
        selector: Selector,
        options: BrowserOptions,
    ) -> Self {
        Self {
            db,
            schema,
            selector,
            options,
            status_map: None,
        }
    }

    /// Decodes the status column of every row through `map`.
    pub fn with_status_map(mut self, map: Arc<StatusMap>) -> Self {
        self.status_map = Some(map);
        self
    }

    /// Same table and slot, narrowed to one status predicate.
    pub fn scoped(&self, status: StatusFilter, select_condition: Option<String>) -> Self {
        let mut narrowed = self.clone();
        narrowed.selector.status = Some(status);
        narrowed.selector.select_condition = select_condition;
        narrowed
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn options(&self) -> &BrowserOptions {
        &self.options
    }

    fn metadata_fields(&self) -> Vec<Field> {
        self.schema
            .metadata_columns()
            .into_iter()
            .map(|(f, _)| f)
            .collect()
    }

    fn select_list(&self, with_payload: bool) -> String {
        let mut cols: Vec<String> = self
            .schema
            .metadata_columns()
            .into_iter()
            .map(|(_, c)| format!("t.{c}"))
            .collect();
        if with_payload && let Some(payload) = self.schema.column(Field::Payload) {
            cols.push(format!("t.{payload}"));
        }
        cols.join(",")
    }

    /// `SELECT <cols> FROM <table> t WHERE <key>=? [AND selector]`.
    fn key_lookup_sql(&self, key: &StorageKey, with_payload: bool) -> (String, Vec<Value>) {
        let mut sql = format!(
            "SELECT {} FROM {} t WHERE t.{}=?",
            self.select_list(with_payload),
            self.schema.table(),
            self.schema.key()
        );
        let mut params = vec![key_value(key)];
        if !self.options.assume_primary_key_unique {
            let (clause, extra) = self.selector.render(&self.schema, Some("t"));
            sql.push_str(" AND ");
            sql.push_str(&clause);
            params.extend(extra);
        }
        (sql, params)
    }

    /// Listing statement for [`MessageBrowser::iterate`].
    pub fn listing_sql(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        order: SortOrder,
    ) -> (String, Vec<Value>) {
        let (clause, mut params) = self.selector.render(&self.schema, Some("t"));
        let mut sql = format!(
            "SELECT {} FROM {} t WHERE {clause}",
            self.select_list(false),
            self.schema.table()
        );
        let order_column = match self.schema.column(Field::Date) {
            Some(date) => {
                if let Some(start) = start {
                    sql.push_str(&format!(" AND t.{date}>=?"));
                    params.push(Value::Text(format_timestamp(start)));
                }
                if let Some(end) = end {
                    sql.push_str(&format!(" AND t.{date}<?"));
                    params.push(Value::Text(format_timestamp(end)));
                }
                date
            }
            None => self.schema.key(),
        };
        let direction = match order {
            SortOrder::None => self.options.default_order,
            explicit => explicit,
        };
        let direction = if direction == SortOrder::Asc { "ASC" } else { "DESC" };
        sql.push_str(&format!(" ORDER BY t.{order_column} {direction}"));
        (
            self.db.dialect().apply_row_limit(&sql, LIST_ROW_CAP),
            params,
        )
    }

    async fn query_exists(&self, field: Field, value: &str) -> Result<bool, StoreError> {
        let column = self.schema.column(field).ok_or_else(|| {
            StoreError::Config(format!("{} is disabled", field.config_key()))
        })?;
        let (clause, mut params) = self.selector.render(&self.schema, Some("t"));
        let sql = self.db.dialect().apply_row_limit(
            &format!(
                "SELECT 1 FROM {} t WHERE {clause} AND t.{column}=?",
                self.schema.table()
            ),
            1,
        );
        params.push(Value::Text(value.to_string()));
        self.db
            .call(move |conn| {
                conn.query_row(&sql, rusqlite::params_from_iter(params), |_| Ok(()))
                    .optional()
                    .map(|found| found.is_some())
            })
            .await
    }

    /// Fetches metadata and the undecoded payload cell.
    async fn fetch_row(
        &self,
        key: &StorageKey,
        with_payload: bool,
    ) -> Result<(Metadata, Option<Value>), StoreError> {
        let (sql, params) = self.key_lookup_sql(key, with_payload);
        let fields = self.metadata_fields();
        let payload_index = fields.len();
        let status_map = self.status_map.clone();
        let has_payload = with_payload && self.schema.has(Field::Payload);
        let row = self
            .db
            .call(move |conn| {
                conn.query_row(&sql, rusqlite::params_from_iter(params), |row| {
                    let metadata = read_metadata(row, &fields, status_map.as_deref())?;
                    let payload = if has_payload {
                        Some(row.get::<_, Value>(payload_index)?)
                    } else {
                        None
                    };
                    Ok((metadata, payload))
                })
                .optional()
            })
            .await?;
        row.ok_or_else(|| StoreError::not_found(key))
    }
}

/// Maps the metadata columns of `row`, in `fields` order, starting at index 0.
pub(crate) fn read_metadata(
    row: &rusqlite::Row<'_>,
    fields: &[Field],
    status_map: Option<&StatusMap>,
) -> rusqlite::Result<Metadata> {
    let mut metadata = Metadata::new(StorageKey(String::new()));
    for (idx, field) in fields.iter().enumerate() {
        let value = row.get_ref(idx)?;
        match field {
            Field::Key => {
                metadata.key = key_from_value(value).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(idx, value.data_type(), Box::new(e))
                })?;
            }
            Field::MessageId => metadata.message_id = text(value),
            Field::CorrelationId => metadata.correlation_id = text(value),
            Field::Date => metadata.insert_date = text(value).and_then(|s| parse_timestamp(&s)),
            Field::Expiry => metadata.expiry_date = text(value).and_then(|s| parse_timestamp(&s)),
            Field::Comment => metadata.comment = text(value),
            Field::Label => metadata.label = text(value),
            Field::StoreType => {
                metadata.store_type = text(value).and_then(|s| StorageType::from_code(&s))
            }
            Field::Host => metadata.host = text(value),
            Field::SlotId => metadata.slot_id = text(value),
            Field::Status => {
                metadata.status = match (status_map, text(value)) {
                    (Some(map), raw) => map.decode(raw.as_deref()),
                    (None, _) => None,
                }
            }
            Field::Payload => {}
        }
    }
    Ok(metadata)
}

fn text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(n) => Some(n.to_string()),
        ValueRef::Real(r) => Some(r.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}

#[async_trait]
impl MessageBrowser for MessageRecordStore {
    async fn count(&self) -> Result<u64, StoreError> {
        let (clause, params) = self.selector.render(&self.schema, Some("t"));
        let sql = format!("SELECT COUNT(*) FROM {} t WHERE {clause}", self.schema.table());
        let n: i64 = self
            .db
            .call(move |conn| {
                conn.query_row(&sql, rusqlite::params_from_iter(params), |row| row.get(0))
            })
            .await?;
        Ok(n.max(0) as u64)
    }

    async fn contains_message_id(&self, message_id: &str) -> Result<bool, StoreError> {
        self.query_exists(Field::MessageId, message_id).await
    }

    async fn contains_correlation_id(&self, correlation_id: &str) -> Result<bool, StoreError> {
        self.query_exists(Field::CorrelationId, correlation_id).await
    }

    async fn fetch(&self, key: &StorageKey) -> Result<MessageRecord, StoreError> {
        let (metadata, cell) = self.fetch_row(key, true).await?;
        let (payload, context) = match cell {
            Some(value) => self.options.payload.decode(value)?,
            None => (None, BTreeMap::new()),
        };
        Ok(MessageRecord {
            metadata,
            payload,
            context,
        })
    }

    async fn fetch_metadata(&self, key: &StorageKey) -> Result<Metadata, StoreError> {
        self.fetch_row(key, false).await.map(|(metadata, _)| metadata)
    }

    async fn iterate(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        order: SortOrder,
    ) -> Result<MetadataCursor, StoreError> {
        let (sql, params) = self.listing_sql(start, end, order);
        debug!(sql = %sql, "opening listing cursor");
        let fields = self.metadata_fields();
        let status_map = self.status_map.clone();
        let db = self.db.clone();
        let (tx, rx) = MetadataCursor::channel();

        let producer = tokio::task::spawn_blocking(move || {
            let produce = || -> Result<(), StoreError> {
                let conn = db.open_blocking()?;
                let mut stmt = conn.prepare(&sql).map_err(map_sqlite_err)?;
                let mut rows = stmt
                    .query(rusqlite::params_from_iter(params))
                    .map_err(map_sqlite_err)?;
                let mut sent = 0;
                while sent < LIST_ROW_CAP {
                    let Some(row) = rows.next().map_err(map_sqlite_err)? else {
                        break;
                    };
                    let metadata =
                        read_metadata(row, &fields, status_map.as_deref()).map_err(map_sqlite_err)?;
                    if tx.blocking_send(Ok(metadata)).is_err() {
                        // Cursor closed by the consumer.
                        break;
                    }
                    sent += 1;
                }
                Ok(())
            };
            if let Err(e) = produce() {
                let _ = tx.blocking_send(Err(e));
            }
        });

        Ok(MetadataCursor::new(rx, producer))
    }

    async fn delete(&self, key: &StorageKey) -> Result<(), StoreError> {
        let mut sql = format!(
            "DELETE FROM {} WHERE {}=?",
            self.schema.table(),
            self.schema.key()
        );
        let mut params = vec![key_value(key)];
        if !self.options.assume_primary_key_unique {
            let (clause, extra) = self.selector.render(&self.schema, None);
            sql.push_str(" AND ");
            sql.push_str(&clause);
            params.extend(extra);
        }
        let deleted = self
            .db
            .call(move |conn| conn.execute(&sql, rusqlite::params_from_iter(params)))
            .await?;
        if deleted == 0 {
            return Err(StoreError::not_found(key));
        }
        debug!(key = %key, table = %self.schema.table(), "message deleted");
        Ok(())
    }
}
