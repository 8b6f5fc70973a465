// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Startup table checks.
//!
//! A store verifies its table, columns, and indices once per process. Findings
//! are logged and reported, never raised: a missing index slows queries down
//! but does not stop the store from working.

use std::collections::HashSet;
use std::path::PathBuf;

use msgstore_config::model::{PayloadKind, StorageConfig};
use msgstore_core::StoreError;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::schema::RecordSchema;

/// What a table check found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub table: String,
    pub table_exists: bool,
    /// The table was created by this check.
    pub created: bool,
    pub missing_columns: Vec<String>,
    pub missing_indices: Vec<Vec<String>>,
    /// The table had already been verified by this registry.
    pub cached: bool,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.table_exists && self.missing_columns.is_empty() && self.missing_indices.is_empty()
    }

    /// One line per problem.
    pub fn findings(&self) -> Vec<String> {
        if !self.table_exists {
            return vec![format!("table {} does not exist", self.table)];
        }
        let mut findings: Vec<String> = self
            .missing_columns
            .iter()
            .map(|c| format!("table {} has no column {c}", self.table))
            .collect();
        findings.extend(self.missing_indices.iter().map(|cols| {
            format!(
                "table {} has no index on ({})",
                self.table,
                cols.join(",")
            )
        }));
        findings
    }
}

/// Process-wide record of the tables already checked.
#[derive(Debug, Default)]
pub struct StoreRegistry {
    verified: Mutex<HashSet<(PathBuf, String)>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets every verified table so the next `verify` checks again.
    pub async fn reset(&self) {
        self.verified.lock().await.clear();
    }

    pub async fn is_verified(&self, db: &Database, table: &str) -> bool {
        self.verified
            .lock()
            .await
            .contains(&(db.path().to_path_buf(), table.to_string()))
    }

    /// Checks (and with `create_table`, creates) the table once per database.
    pub async fn verify(
        &self,
        db: &Database,
        schema: &RecordSchema,
        storage: &StorageConfig,
        payload_kind: PayloadKind,
    ) -> Result<CheckReport, StoreError> {
        let id = (db.path().to_path_buf(), schema.table().to_string());
        let mut verified = self.verified.lock().await;
        if verified.contains(&id) {
            debug!(table = %schema.table(), "table already verified");
            return Ok(CheckReport {
                table: schema.table().to_string(),
                table_exists: true,
                cached: true,
                ..CheckReport::default()
            });
        }

        let mut report = inspect(db, schema).await?;
        if !report.table_exists && storage.create_table {
            create_table(db, schema, payload_kind).await?;
            report = inspect(db, schema).await?;
            report.created = true;
            info!(table = %schema.table(), "message table created");
        }

        if storage.check_table {
            if !report.table_exists {
                warn!(table = %schema.table(), "message table does not exist");
            }
            for column in &report.missing_columns {
                warn!(table = %schema.table(), column = %column, "configured column is missing");
            }
        }
        if storage.check_indices && report.table_exists {
            for columns in &report.missing_indices {
                warn!(
                    table = %schema.table(),
                    columns = %columns.join(","),
                    "no index covers these columns, queries will scan the table"
                );
            }
        }

        verified.insert(id);
        Ok(report)
    }
}

/// Runs the table, sequence, and index DDL.
pub async fn create_table(
    db: &Database,
    schema: &RecordSchema,
    payload_kind: PayloadKind,
) -> Result<(), StoreError> {
    let statements = schema.ddl(db.dialect(), payload_kind);
    db.call(move |conn| {
        let tx = conn.transaction()?;
        for statement in &statements {
            tx.execute_batch(statement)?;
        }
        tx.commit()
    })
    .await
}

struct TableInfo {
    columns: Vec<(String, bool)>,
    indices: Vec<Vec<String>>,
}

fn split_table(table: &str) -> (String, String) {
    match table.split_once('.') {
        Some((db, name)) => (db.to_string(), name.to_string()),
        None => ("main".to_string(), table.to_string()),
    }
}

/// Compares the live table with the schema without changing anything.
pub async fn inspect(db: &Database, schema: &RecordSchema) -> Result<CheckReport, StoreError> {
    let (database, table) = split_table(schema.table());
    let info = db
        .call(move |conn| {
            let mut stmt = conn.prepare("SELECT name, pk FROM pragma_table_info(?1, ?2)")?;
            let columns = stmt
                .query_map([&table, &database], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? > 0))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut stmt = conn.prepare("SELECT name FROM pragma_index_list(?1, ?2)")?;
            let names = stmt
                .query_map([&table, &database], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            let mut stmt =
                conn.prepare("SELECT name FROM pragma_index_info(?1, ?2) ORDER BY seqno")?;
            let mut indices = Vec::with_capacity(names.len());
            for name in names {
                let cols = stmt
                    .query_map([&name, &database], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                indices.push(cols);
            }
            Ok(TableInfo { columns, indices })
        })
        .await?;

    let mut report = CheckReport {
        table: schema.table().to_string(),
        table_exists: !info.columns.is_empty(),
        ..CheckReport::default()
    };
    if !report.table_exists {
        return Ok(report);
    }

    let has_column = |name: &str| info.columns.iter().any(|(c, _)| c.eq_ignore_ascii_case(name));
    report.missing_columns = schema
        .metadata_columns()
        .into_iter()
        .map(|(_, c)| c)
        .chain(schema.column(crate::schema::Field::Payload))
        .filter(|c| !has_column(c))
        .map(str::to_string)
        .collect();

    let primary_key: Vec<&str> = info
        .columns
        .iter()
        .filter(|(_, pk)| *pk)
        .map(|(c, _)| c.as_str())
        .collect();
    report.missing_indices = schema
        .expected_indices()
        .into_iter()
        .filter(|wanted| {
            let covered_by_pk =
                primary_key.len() == wanted.len() && leading_columns_match(&primary_key, wanted);
            !covered_by_pk
                && !info
                    .indices
                    .iter()
                    .any(|cols| leading_columns_match(cols, wanted))
        })
        .map(|cols| cols.into_iter().map(str::to_string).collect())
        .collect();
    Ok(report)
}

/// Whether the first `wanted.len()` index columns are exactly the wanted set.
fn leading_columns_match<S: AsRef<str>>(index: &[S], wanted: &[&str]) -> bool {
    index.len() >= wanted.len()
        && wanted.iter().all(|w| {
            index[..wanted.len()]
                .iter()
                .any(|c| c.as_ref().eq_ignore_ascii_case(w))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn leading_columns() {
        let index = ["SLOT_ID", "STORE_TYPE", "MESSAGE_DATE"];
        assert!(leading_columns_match(&index, &["store_type", "slot_id"]));
        assert!(!leading_columns_match(&index, &["MESSAGE_DATE"]));
        assert!(!leading_columns_match(&index[..1], &["SLOT_ID", "STORE_TYPE"]));
    }

    #[tokio::test]
    async fn missing_table_is_reported_and_created() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = testing::config(&dir);
        config.storage.create_table = false;
        let db = Database::open(&config.database).await.unwrap();
        let schema = RecordSchema::from_config(&config.storage).unwrap();
        let registry = StoreRegistry::new();

        let report = registry
            .verify(&db, &schema, &config.storage, PayloadKind::Blob)
            .await
            .unwrap();
        assert!(!report.table_exists);
        assert_eq!(report.findings(), vec!["table MESSAGE_STORE does not exist"]);
        assert!(registry.is_verified(&db, "MESSAGE_STORE").await);

        registry.reset().await;
        config.storage.create_table = true;
        let report = registry
            .verify(&db, &schema, &config.storage, PayloadKind::Blob)
            .await
            .unwrap();
        assert!(report.created);
        assert!(report.is_clean(), "{:?}", report.findings());

        let again = registry
            .verify(&db, &schema, &config.storage, PayloadKind::Blob)
            .await
            .unwrap();
        assert!(again.cached);
    }

    #[tokio::test]
    async fn missing_columns_and_indices_are_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = testing::config(&dir);
        let db = Database::open(&config.database).await.unwrap();
        db.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE MESSAGE_STORE (MESSAGE_KEY INTEGER PRIMARY KEY, STATUS TEXT, \
                 MESSAGE_ID TEXT, SLOT_ID TEXT);\
                 CREATE INDEX IX_OLD ON MESSAGE_STORE (SLOT_ID, MESSAGE_ID, STATUS);",
            )
        })
        .await
        .unwrap();
        let schema = RecordSchema::from_config(&config.storage).unwrap();

        let report = inspect(&db, &schema).await.unwrap();
        assert!(report.table_exists);
        assert!(report.missing_columns.contains(&"CORRELATION_ID".to_string()));
        assert!(report.missing_columns.contains(&"MESSAGE".to_string()));
        assert!(!report.missing_columns.contains(&"STATUS".to_string()));
        // Key is the primary key, (slot, message id) has an index.
        assert_eq!(
            report.missing_indices,
            vec![
                vec!["STORE_TYPE".to_string(), "SLOT_ID".into(), "MESSAGE_DATE".into()],
                vec!["EXPIRY_DATE".to_string()],
            ]
        );
    }
}
