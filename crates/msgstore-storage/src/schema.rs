// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Logical-to-physical column mapping for the message table.
//!
//! A [`RecordSchema`] is built once, validated, and then shared immutably by
//! every store, browser, and queue over the same table.

use std::collections::BTreeMap;

use msgstore_config::model::{PayloadKind, StorageConfig};
use msgstore_config::validation::is_plain_identifier;
use msgstore_core::StoreError;

use crate::dialect::Dialect;

pub const MAX_ID_LEN: usize = 100;
pub const MAX_CORRELATION_ID_LEN: usize = 256;
pub const MAX_COMMENT_LEN: usize = 1000;
pub const MAX_LABEL_LEN: usize = 1000;
const STATUS_LEN: u32 = 20;

/// Logical fields of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Key,
    MessageId,
    CorrelationId,
    Date,
    Comment,
    Label,
    StoreType,
    Host,
    SlotId,
    Expiry,
    Payload,
    Status,
}

impl Field {
    pub const ALL: [Field; 12] = [
        Field::Key,
        Field::MessageId,
        Field::CorrelationId,
        Field::Date,
        Field::Comment,
        Field::Label,
        Field::StoreType,
        Field::Host,
        Field::SlotId,
        Field::Expiry,
        Field::Payload,
        Field::Status,
    ];

    /// Config key naming this field's column.
    pub fn config_key(self) -> &'static str {
        match self {
            Field::Key => "storage.columns.key",
            Field::MessageId => "storage.columns.message_id",
            Field::CorrelationId => "storage.columns.correlation_id",
            Field::Date => "storage.columns.date",
            Field::Comment => "storage.columns.comment",
            Field::Label => "storage.columns.label",
            Field::StoreType => "storage.columns.store_type",
            Field::Host => "storage.columns.host",
            Field::SlotId => "storage.columns.slot_id",
            Field::Expiry => "storage.columns.expiry",
            Field::Payload => "storage.columns.payload",
            Field::Status => "storage.columns.status",
        }
    }
}

/// Immutable table layout: table name plus the enabled columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    table: String,
    columns: BTreeMap<Field, String>,
    sequence: String,
    index: String,
}

/// Builder for [`RecordSchema`]. All default column names are enabled.
#[derive(Debug, Clone)]
pub struct RecordSchemaBuilder {
    prefix: String,
    table: String,
    columns: BTreeMap<Field, String>,
    sequence: String,
    index: String,
}

impl RecordSchemaBuilder {
    pub fn column(mut self, field: Field, name: impl Into<String>) -> Self {
        let name = name.into();
        if name.is_empty() {
            self.columns.remove(&field);
        } else {
            self.columns.insert(field, name);
        }
        self
    }

    pub fn disable(mut self, field: Field) -> Self {
        self.columns.remove(&field);
        self
    }

    /// Object prefix (such as a schema owner) put before table, sequence, and index names.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn sequence(mut self, name: impl Into<String>) -> Self {
        self.sequence = name.into();
        self
    }

    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = name.into();
        self
    }

    pub fn build(self) -> Result<RecordSchema, StoreError> {
        let prefixed = |name: &str| {
            if name.is_empty() {
                String::new()
            } else {
                format!("{}{name}", self.prefix)
            }
        };
        let table = prefixed(&self.table);
        let sequence = prefixed(&self.sequence);
        let index = prefixed(&self.index);

        if !is_plain_identifier(&table) {
            return Err(StoreError::Config(format!(
                "table name `{table}` is not a plain SQL identifier"
            )));
        }
        for mandatory in [Field::Key, Field::Status] {
            if !self.columns.contains_key(&mandatory) {
                return Err(StoreError::Config(format!(
                    "{} is mandatory",
                    mandatory.config_key()
                )));
            }
        }
        for (field, name) in &self.columns {
            if !is_plain_identifier(name) {
                return Err(StoreError::Config(format!(
                    "{} `{name}` is not a plain SQL identifier",
                    field.config_key()
                )));
            }
        }
        for (what, name) in [("sequence", &sequence), ("index", &index)] {
            if !name.is_empty() && !is_plain_identifier(name) {
                return Err(StoreError::Config(format!(
                    "{what} name `{name}` is not a plain SQL identifier"
                )));
            }
        }
        Ok(RecordSchema {
            table,
            columns: self.columns,
            sequence,
            index,
        })
    }
}

impl RecordSchema {
    pub fn builder(table: impl Into<String>) -> RecordSchemaBuilder {
        let columns = msgstore_config::model::ColumnsConfig::default();
        RecordSchemaBuilder {
            prefix: String::new(),
            table: table.into(),
            columns: columns_from_config(&columns),
            sequence: "SEQ_MESSAGE_STORE".to_string(),
            index: "IX_MESSAGE_STORE".to_string(),
        }
    }

    pub fn from_config(storage: &StorageConfig) -> Result<Self, StoreError> {
        RecordSchemaBuilder {
            prefix: storage.prefix.clone(),
            table: storage.table.clone(),
            columns: columns_from_config(&storage.columns),
            sequence: storage.sequence_name.clone(),
            index: storage.index_name.clone(),
        }
        .build()
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column(&self, field: Field) -> Option<&str> {
        self.columns.get(&field).map(String::as_str)
    }

    pub fn has(&self, field: Field) -> bool {
        self.columns.contains_key(&field)
    }

    pub fn key(&self) -> &str {
        self.column(Field::Key).unwrap_or_default()
    }

    pub fn status(&self) -> &str {
        self.column(Field::Status).unwrap_or_default()
    }

    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Enabled columns other than the payload, in a fixed order.
    pub fn metadata_columns(&self) -> Vec<(Field, &str)> {
        Field::ALL
            .iter()
            .filter(|f| **f != Field::Payload)
            .filter_map(|f| self.column(*f).map(|c| (*f, c)))
            .collect()
    }

    /// Column lists that should each be covered by an index.
    pub fn expected_indices(&self) -> Vec<Vec<&str>> {
        let pick = |fields: &[Field]| -> Vec<&str> {
            fields.iter().filter_map(|f| self.column(*f)).collect()
        };
        let mut wanted = vec![pick(&[Field::Key])];
        wanted.push(pick(&[Field::StoreType, Field::SlotId, Field::Date]));
        wanted.push(pick(&[Field::Expiry]));
        wanted.push(pick(&[Field::SlotId, Field::MessageId]));
        wanted.retain(|cols| !cols.is_empty());
        wanted
    }

    /// Statements creating the table, its key sequence, and its indices.
    pub fn ddl(&self, dialect: &Dialect, payload_kind: PayloadKind) -> Vec<String> {
        let mut statements = Vec::new();
        if !self.sequence.is_empty()
            && let Some(seq) = dialect.create_sequence(&self.sequence)
        {
            statements.push(seq);
        }

        let mut defs = Vec::new();
        for field in Field::ALL {
            let Some(col) = self.column(field) else {
                continue;
            };
            let ty = match field {
                Field::Key => dialect.key_column_definition().to_string(),
                Field::MessageId | Field::Host | Field::SlotId => {
                    dialect.text_column_type(MAX_ID_LEN as u32)
                }
                Field::CorrelationId => dialect.text_column_type(MAX_CORRELATION_ID_LEN as u32),
                Field::Comment => dialect.text_column_type(MAX_COMMENT_LEN as u32),
                Field::Label => dialect.text_column_type(MAX_LABEL_LEN as u32),
                Field::StoreType => dialect.char_type(),
                Field::Date | Field::Expiry => dialect.timestamp_column_type().to_string(),
                Field::Status => dialect.text_column_type(STATUS_LEN),
                Field::Payload => match payload_kind {
                    PayloadKind::Text => dialect.text_column_type(MAX_COMMENT_LEN as u32 * 4),
                    PayloadKind::Clob => dialect.clob_type().to_string(),
                    PayloadKind::Blob => dialect.blob_column_type().to_string(),
                },
            };
            defs.push(format!("{col} {ty}"));
        }
        statements.push(format!(
            "{} {} ({})",
            dialect.create_table_prefix(),
            self.table,
            defs.join(", ")
        ));

        if !self.index.is_empty() {
            // The key is covered by the primary key itself.
            for (n, cols) in self.expected_indices().iter().skip(1).enumerate() {
                let name = match n {
                    0 => self.index.clone(),
                    n => format!("{}_{n}", self.index),
                };
                statements.push(format!(
                    "{} {name} ON {} ({})",
                    dialect.create_index_prefix(),
                    self.table,
                    cols.join(",")
                ));
            }
        }
        statements
    }
}

fn columns_from_config(columns: &msgstore_config::model::ColumnsConfig) -> BTreeMap<Field, String> {
    [
        (Field::Key, &columns.key),
        (Field::MessageId, &columns.message_id),
        (Field::CorrelationId, &columns.correlation_id),
        (Field::Date, &columns.date),
        (Field::Comment, &columns.comment),
        (Field::Label, &columns.label),
        (Field::StoreType, &columns.store_type),
        (Field::Host, &columns.host),
        (Field::SlotId, &columns.slot_id),
        (Field::Expiry, &columns.expiry),
        (Field::Payload, &columns.payload),
        (Field::Status, &columns.status),
    ]
    .into_iter()
    .filter(|(_, name)| !name.is_empty())
    .map(|(field, name)| (field, name.clone()))
    .collect()
}

/// Cuts `value` to at most `max` characters.
pub fn truncate(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{DialectKind, dialect};

    #[test]
    fn defaults_enable_every_column() {
        let schema = RecordSchema::builder("MESSAGE_STORE").build().unwrap();
        for field in Field::ALL {
            assert!(schema.has(field), "{field:?} should be enabled");
        }
        assert_eq!(schema.key(), "MESSAGE_KEY");
        assert_eq!(schema.status(), "STATUS");
        assert_eq!(schema.metadata_columns().len(), 11);
    }

    #[test]
    fn key_and_status_are_mandatory() {
        let err = RecordSchema::builder("T")
            .disable(Field::Key)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("storage.columns.key"));

        let err = RecordSchema::builder("T")
            .column(Field::Status, "")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("storage.columns.status"));
    }

    #[test]
    fn rejects_non_identifier_names() {
        assert!(RecordSchema::builder("T; DROP").build().is_err());
        assert!(
            RecordSchema::builder("T")
                .column(Field::Comment, "a b")
                .build()
                .is_err()
        );
    }

    #[test]
    fn disabled_columns_are_left_out_of_ddl() {
        let schema = RecordSchema::builder("Q")
            .disable(Field::Label)
            .disable(Field::Host)
            .build()
            .unwrap();
        let ddl = schema.ddl(dialect(DialectKind::Sqlite), PayloadKind::Blob);
        let create = ddl.iter().find(|s| s.contains("TABLE")).unwrap();
        assert!(create.starts_with("CREATE TABLE IF NOT EXISTS Q ("));
        assert!(create.contains("MESSAGE_KEY INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(create.contains("MESSAGE BLOB"));
        assert!(!create.contains("LABEL"));
        assert!(!create.contains("HOST"));
    }

    #[test]
    fn sequence_dialects_create_the_sequence_first() {
        let schema = RecordSchema::builder("Q").build().unwrap();
        let ddl = schema.ddl(dialect(DialectKind::Oracle), PayloadKind::Clob);
        assert!(ddl[0].starts_with("CREATE SEQUENCE SEQ_MESSAGE_STORE"));
        assert!(ddl[1].contains("MESSAGE CLOB"));
        assert!(ddl[1].contains("MESSAGE_ID VARCHAR2(100)"));
    }

    #[test]
    fn indices_cover_lookup_paths() {
        let schema = RecordSchema::builder("Q").build().unwrap();
        let expected = schema.expected_indices();
        assert_eq!(expected[0], vec!["MESSAGE_KEY"]);
        assert_eq!(expected[1], vec!["STORE_TYPE", "SLOT_ID", "MESSAGE_DATE"]);
        assert_eq!(expected[3], vec!["SLOT_ID", "MESSAGE_ID"]);

        let ddl = schema.ddl(dialect(DialectKind::Sqlite), PayloadKind::Blob);
        assert!(ddl.contains(
            &"CREATE INDEX IF NOT EXISTS IX_MESSAGE_STORE ON Q (STORE_TYPE,SLOT_ID,MESSAGE_DATE)"
                .to_string()
        ));
        assert!(ddl.iter().any(|s| s.contains("IX_MESSAGE_STORE_2 ON Q (SLOT_ID,MESSAGE_ID)")));
    }

    #[test]
    fn prefix_qualifies_object_names() {
        let schema = RecordSchema::builder("MESSAGE_STORE")
            .prefix("app.")
            .build()
            .unwrap();
        assert_eq!(schema.table(), "app.MESSAGE_STORE");
        assert_eq!(schema.sequence(), "app.SEQ_MESSAGE_STORE");
        assert!(RecordSchema::builder("T").prefix("a.b.").build().is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("ab", 3), "ab");
        assert_eq!(truncate("ééé", 2), "éé");
    }
}
