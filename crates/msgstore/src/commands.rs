// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Producer and management commands.
//!
//! Each command opens the configured [`MessageStoreQueue`], performs one
//! operation, and prints the result to stdout.

use chrono::{DateTime, Utc};
use msgstore_config::model::MsgstoreConfig;
use msgstore_core::{
    MessageBrowser, MessageFilter, Metadata, NewMessage, ProcessState, ProcessStateQueue,
    StorageKey, StoreError, StoreOutcome, TransactionalStorage,
};
use msgstore_storage::registry::create_table;
use msgstore_storage::storage::payload_text;
use msgstore_storage::{Database, MessageStoreQueue, RecordSchema, StoreRegistry};
use tokio::io::AsyncReadExt;
use tracing::info;

/// Arguments of `msgstore store`.
#[derive(Debug, Clone)]
pub struct StoreArgs {
    pub message_id: String,
    pub correlation_id: String,
    pub payload: Option<String>,
    pub comment: Option<String>,
    pub label: Option<String>,
}

pub async fn open_queue(config: &MsgstoreConfig) -> Result<MessageStoreQueue, StoreError> {
    MessageStoreQueue::open(config, &StoreRegistry::new()).await
}

/// Parses an RFC 3339 instant given on the command line.
pub fn parse_instant(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("invalid timestamp `{raw}`: {e}")))
}

/// Run `msgstore init`.
pub async fn run_init(config: &MsgstoreConfig) -> Result<(), StoreError> {
    let db = Database::open(&config.database).await?;
    let schema = RecordSchema::from_config(&config.storage)?;
    let report = msgstore_storage::registry::inspect(&db, &schema).await?;
    if report.table_exists {
        println!("table {} already exists", schema.table());
        for finding in report.findings() {
            println!("  {finding}");
        }
        return Ok(());
    }
    create_table(&db, &schema, config.queue.payload_kind).await?;
    info!(table = %schema.table(), path = %db.path().display(), "table created");
    println!("created table {} in {}", schema.table(), db.path().display());
    Ok(())
}

/// Run `msgstore store`.
pub async fn run_store(config: &MsgstoreConfig, args: StoreArgs) -> Result<(), StoreError> {
    let payload = match args.payload {
        Some(payload) => payload,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .map_err(|e| StoreError::Storage {
                    source: Box::new(e),
                })?;
            buf
        }
    };

    let mut message = NewMessage::new(args.message_id, args.correlation_id, payload);
    message.comment = args.comment;
    message.label = args.label;

    let queue = open_queue(config).await?;
    match queue.store(message).await? {
        StoreOutcome::Stored(key) => println!("stored {key}"),
        StoreOutcome::Duplicate {
            key,
            payload_differs,
        } => {
            let note = if payload_differs {
                " with a different payload"
            } else {
                ""
            };
            println!("duplicate of {key}{note}");
        }
    }
    Ok(())
}

/// Run `msgstore claim`.
pub async fn run_claim(config: &MsgstoreConfig, peek: bool) -> Result<(), StoreError> {
    let queue = open_queue(config).await?;
    if peek {
        let available = queue.has_available().await?;
        println!("{}", if available { "available" } else { "empty" });
        return Ok(());
    }

    let Some(record) = queue.claim().await? else {
        println!("empty");
        return Ok(());
    };
    let key = record.key().clone();
    if record.metadata.status != Some(ProcessState::InProcess)
        && !queue
            .change_state(&key, ProcessState::InProcess, None)
            .await?
    {
        println!("lost {key} to another worker");
        return Ok(());
    }
    println!("{}", format_row(&record.metadata));
    println!("{}", payload_text(record.payload.as_ref()));
    Ok(())
}

/// Run `msgstore browse`.
pub async fn run_browse(
    config: &MsgstoreConfig,
    state: Option<ProcessState>,
    filter: &MessageFilter,
    json: bool,
) -> Result<(), StoreError> {
    let queue = open_queue(config).await?;
    let page = match state {
        Some(state) => {
            let browser = queue.browser(state)?;
            let cursor = browser.iterate(filter.start, filter.end, filter.order).await?;
            msgstore_storage::browse::query(cursor, filter).await?
        }
        None => queue.query(filter).await?,
    };

    if json {
        let out = serde_json::to_string_pretty(&page)
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        println!("{out}");
        return Ok(());
    }
    for metadata in &page.items {
        println!("{}", format_row(metadata));
    }
    if page.has_more {
        println!(
            "... more rows after {}, use --skip {}",
            page.items.len(),
            page.skip + page.items.len()
        );
    }
    Ok(())
}

/// Run `msgstore show`.
pub async fn run_show(
    config: &MsgstoreConfig,
    key: &StorageKey,
    json: bool,
) -> Result<(), StoreError> {
    let queue = open_queue(config).await?;
    let record = queue.fetch(key).await?;
    if json {
        let out = serde_json::to_string_pretty(&record)
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        println!("{out}");
        return Ok(());
    }
    let m = &record.metadata;
    let fields = [
        ("key", Some(m.key.to_string())),
        ("status", m.status.map(|s| s.to_string())),
        ("type", m.store_type.map(|t| t.code().to_string())),
        ("slot", m.slot_id.clone()),
        ("host", m.host.clone()),
        ("message id", m.message_id.clone()),
        ("correlation id", m.correlation_id.clone()),
        ("inserted", m.insert_date.map(|d| d.to_rfc3339())),
        ("expires", m.expiry_date.map(|d| d.to_rfc3339())),
        ("label", m.label.clone()),
        ("comment", m.comment.clone()),
    ];
    for (name, value) in fields {
        if let Some(value) = value {
            println!("{name:<16}{value}");
        }
    }
    for (name, value) in &record.context {
        println!("{name:<16}{value}");
    }
    println!();
    println!("{}", payload_text(record.payload.as_ref()));
    Ok(())
}

/// Run `msgstore move`.
pub async fn run_move(
    config: &MsgstoreConfig,
    key: &StorageKey,
    state: ProcessState,
    reason: Option<&str>,
) -> Result<(), StoreError> {
    let queue = open_queue(config).await?;
    if queue.move_to(key, state, reason).await? {
        println!("moved {key} to {state}");
    } else {
        let current = queue.fetch_metadata(key).await?;
        let from = current
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!("{key} cannot move from {from} to {state}");
    }
    Ok(())
}

/// Run `msgstore delete`.
pub async fn run_delete(config: &MsgstoreConfig, key: &StorageKey) -> Result<(), StoreError> {
    let queue = open_queue(config).await?;
    queue.delete(key).await?;
    println!("deleted {key}");
    Ok(())
}

/// Run `msgstore count`.
pub async fn run_count(
    config: &MsgstoreConfig,
    state: Option<ProcessState>,
) -> Result<(), StoreError> {
    let queue = open_queue(config).await?;
    let count = match state {
        Some(state) => queue.browser(state)?.count().await?,
        None => queue.count().await?,
    };
    println!("{count}");
    Ok(())
}

/// One listing line: key, status, insert date, ids and comment.
pub fn format_row(m: &Metadata) -> String {
    let status = m.status.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
    let date = m
        .insert_date
        .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".into());
    let mut line = format!(
        "{:>8}  {:<9}  {}  {}  {}",
        m.key,
        status,
        date,
        m.message_id.as_deref().unwrap_or("-"),
        m.correlation_id.as_deref().unwrap_or("-"),
    );
    if let Some(comment) = m.comment.as_deref().filter(|c| !c.is_empty()) {
        line.push_str("  # ");
        line.push_str(comment);
    }
    line
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn config(dir: &tempfile::TempDir) -> MsgstoreConfig {
        let mut config = MsgstoreConfig::default();
        config.database.path = dir.path().join("cli.db").to_string_lossy().into_owned();
        config
    }

    #[test]
    fn row_format_shows_comment_only_when_present() {
        let mut m = Metadata::new(StorageKey::from(12));
        m.status = Some(ProcessState::Error);
        m.insert_date = Some(Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap());
        m.message_id = Some("m-1".into());
        let line = format_row(&m);
        assert_eq!(line, "      12  ERROR      2026-03-01 08:30:00  m-1  -");

        m.comment = Some("timeout".into());
        assert!(format_row(&m).ends_with("  # timeout"));
    }

    #[test]
    fn instants_must_be_rfc3339() {
        let at = parse_instant("2026-03-01T12:00:00+01:00").unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap());
        let err = parse_instant("yesterday").unwrap_err();
        assert_eq!(err.code(), "invalid_data");
    }

    #[tokio::test]
    async fn init_then_store_and_move() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        run_init(&config).await.unwrap();
        // Second init only reports.
        run_init(&config).await.unwrap();

        run_store(
            &config,
            StoreArgs {
                message_id: "m-1".into(),
                correlation_id: "c-1".into(),
                payload: Some("hello".into()),
                comment: Some("from cli".into()),
                label: None,
            },
        )
        .await
        .unwrap();

        let queue = open_queue(&config).await.unwrap();
        let page = queue.query(&MessageFilter::default()).await.unwrap();
        assert_eq!(page.items.len(), 1);
        let key = page.items[0].key.clone();
        assert_eq!(page.items[0].comment.as_deref(), Some("from cli"));

        run_claim(&config, false).await.unwrap();
        run_move(&config, &key, ProcessState::Error, Some("manual"))
            .await
            .unwrap();
        let metadata = queue.fetch_metadata(&key).await.unwrap();
        assert_eq!(metadata.status, Some(ProcessState::Error));
        assert_eq!(metadata.comment.as_deref(), Some("manual"));

        run_delete(&config, &key).await.unwrap();
        let err = run_delete(&config, &key).await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
