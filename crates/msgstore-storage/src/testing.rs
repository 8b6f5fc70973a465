// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Temp-database fixtures for unit tests.

use std::sync::Arc;

use msgstore_config::model::MsgstoreConfig;
use tempfile::TempDir;

use crate::database::Database;
use crate::registry::create_table;
use crate::schema::RecordSchema;

pub(crate) fn config(dir: &TempDir) -> MsgstoreConfig {
    let mut config = MsgstoreConfig::default();
    config.database.path = dir.path().join("store.db").to_string_lossy().into_owned();
    config.storage.create_table = true;
    config
}

/// Opens the database and creates the configured table if needed.
pub(crate) async fn open(config: &MsgstoreConfig) -> (Database, Arc<RecordSchema>) {
    let db = Database::open(&config.database).await.unwrap();
    let schema = RecordSchema::from_config(&config.storage).unwrap();
    create_table(&db, &schema, config.queue.payload_kind)
        .await
        .unwrap();
    (db, Arc::new(schema))
}
