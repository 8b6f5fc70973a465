// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `msgstore check` command implementation.
//!
//! Runs diagnostic checks against the configured database and table to find
//! layout problems and queue settings that cannot work.

use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use msgstore_config::model::MsgstoreConfig;
use msgstore_core::{MessageBrowser, ProcessState, ProcessStateQueue, SortOrder, StoreError};
use msgstore_storage::registry::inspect;
use msgstore_storage::table_queue::{queries_from_config, selector_from_config};
use msgstore_storage::{Database, Dialect, RecordSchema, TableBackedQueue};

/// AVAILABLE rows older than this suggest no consumer is running.
const STALE_AFTER_HOURS: i64 = 24;

/// Status of a diagnostic check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Result of a single diagnostic check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub duration: Duration,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>, start: Instant) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            duration: start.elapsed(),
        }
    }
}

/// Run the `msgstore check` command.
///
/// Runs quick checks, plus integrity and backlog age checks with `--deep`.
/// With `--plain`, disables colored output.
pub async fn run_check(config: &MsgstoreConfig, deep: bool, plain: bool) -> Result<(), StoreError> {
    let use_color = !plain && std::io::stdout().is_terminal();
    let results = collect(config, deep).await;

    println!();
    println!("  msgstore check");
    println!("  {}", "-".repeat(50));

    let mut fail_count = 0;
    let mut warn_count = 0;
    for result in &results {
        match result.status {
            CheckStatus::Pass => {}
            CheckStatus::Warn => warn_count += 1,
            CheckStatus::Fail => fail_count += 1,
        }
        println!("{}", render(result, use_color));
    }

    println!();
    if fail_count > 0 || warn_count > 0 {
        let issues = fail_count + warn_count;
        let issue_word = if issues == 1 { "issue" } else { "issues" };
        println!("  {issues} {issue_word} found.");
        if !deep {
            println!("  Run with --deep for detailed diagnostics.");
        }
    } else {
        println!("  All checks passed.");
    }
    println!();

    if fail_count > 0 {
        return Err(StoreError::Config(format!("{fail_count} check(s) failed")));
    }
    Ok(())
}

/// Runs every check and returns the results in display order.
pub async fn collect(config: &MsgstoreConfig, deep: bool) -> Vec<CheckResult> {
    let mut results = vec![check_config(config), check_dialect(&config.database.dialect)];
    results.extend(check_queue_settings(config));

    let path = Path::new(&config.database.path);
    if !path.exists() {
        let start = Instant::now();
        results.push(CheckResult::new(
            "Database",
            CheckStatus::Warn,
            format!(
                "not found: {} (run `msgstore init`)",
                config.database.path
            ),
            start,
        ));
        return results;
    }

    let start = Instant::now();
    let db = match Database::open(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            results.push(CheckResult::new(
                "Database",
                CheckStatus::Fail,
                format!("open failed: {e}"),
                start,
            ));
            return results;
        }
    };
    results.push(match db.health_check().await {
        Ok(()) => CheckResult::new("Database", CheckStatus::Pass, "connected", start),
        Err(e) => CheckResult::new(
            "Database",
            CheckStatus::Fail,
            format!("query failed: {e}"),
            start,
        ),
    });

    let schema = match RecordSchema::from_config(&config.storage) {
        Ok(schema) => Arc::new(schema),
        Err(e) => {
            results.push(CheckResult::new(
                "Table",
                CheckStatus::Fail,
                e.to_string(),
                Instant::now(),
            ));
            return results;
        }
    };
    let table = check_table(&db, &schema).await;
    let table_ok = table.status != CheckStatus::Fail;
    results.push(table);
    if table_ok {
        results.push(check_backlog(&db, &schema, config).await);
    }

    if deep {
        let scope = table_ok.then(|| schema.table());
        results.push(check_db_integrity(&db, scope).await);
        if table_ok {
            results.push(check_oldest_available(&db, &schema, config).await);
        }
        results.push(check_host());
    }
    results
}

fn render(result: &CheckResult, use_color: bool) -> String {
    let duration_ms = result.duration.as_millis();
    if !use_color {
        let tag = match result.status {
            CheckStatus::Pass => "[OK]  ",
            CheckStatus::Warn => "[WARN]",
            CheckStatus::Fail => "[FAIL]",
        };
        return format!(
            "    {tag} {:<20} {} ({duration_ms}ms)",
            result.name, result.message
        );
    }

    use colored::Colorize;
    let (symbol, message) = match result.status {
        CheckStatus::Pass => ("✓".green().to_string(), result.message.normal()),
        CheckStatus::Warn => ("!".yellow().to_string(), result.message.yellow()),
        CheckStatus::Fail => ("✗".red().to_string(), result.message.red()),
    };
    format!(
        "    {symbol} {:<20} {message} ({duration_ms}ms)",
        result.name
    )
}

fn check_config(config: &MsgstoreConfig) -> CheckResult {
    let start = Instant::now();
    CheckResult::new(
        "Configuration",
        CheckStatus::Pass,
        format!(
            "valid (table {}, slot {})",
            config.storage.table, config.storage.slot_id
        ),
        start,
    )
}

fn check_dialect(name: &str) -> CheckResult {
    let start = Instant::now();
    match Dialect::from_name(name) {
        Ok(dialect) if dialect.is_executable() => {
            CheckResult::new("Dialect", CheckStatus::Pass, dialect.kind.to_string(), start)
        }
        Ok(dialect) => CheckResult::new(
            "Dialect",
            CheckStatus::Fail,
            format!("{} cannot be executed, only rendered", dialect.kind),
            start,
        ),
        Err(e) => CheckResult::new("Dialect", CheckStatus::Fail, e.to_string(), start),
    }
}

/// Status map and select condition problems.
fn check_queue_settings(config: &MsgstoreConfig) -> Vec<CheckResult> {
    let start = Instant::now();
    let mut results = Vec::new();

    let available = config.queue.status.get(&ProcessState::Available);
    results.push(match available {
        Some(value) if !value.is_empty() => CheckResult::new(
            "Queue states",
            CheckStatus::Pass,
            config
                .queue
                .status
                .iter()
                .map(|(state, value)| format!("{state}={value}"))
                .collect::<Vec<_>>()
                .join(" "),
            start,
        ),
        _ => CheckResult::new(
            "Queue states",
            CheckStatus::Warn,
            "AVAILABLE has no value: rows can be consumed but not stored",
            start,
        ),
    });

    let Ok(schema) = RecordSchema::from_config(&config.storage) else {
        return results;
    };
    let queries = queries_from_config(Arc::new(schema), selector_from_config(config), config);
    for warning in queries.condition_warnings() {
        results.push(CheckResult::new(
            "Select condition",
            CheckStatus::Warn,
            warning,
            start,
        ));
    }
    results
}

async fn check_table(db: &Database, schema: &RecordSchema) -> CheckResult {
    let start = Instant::now();
    match inspect(db, schema).await {
        Ok(report) if !report.table_exists => CheckResult::new(
            "Table",
            CheckStatus::Fail,
            format!("{} does not exist (run `msgstore init`)", report.table),
            start,
        ),
        Ok(report) if !report.missing_columns.is_empty() => CheckResult::new(
            "Table",
            CheckStatus::Fail,
            report.findings().join("; "),
            start,
        ),
        Ok(report) if !report.is_clean() => CheckResult::new(
            "Table",
            CheckStatus::Warn,
            report.findings().join("; "),
            start,
        ),
        Ok(report) => CheckResult::new("Table", CheckStatus::Pass, report.table, start),
        Err(e) => CheckResult::new(
            "Table",
            CheckStatus::Fail,
            format!("inspection failed: {e}"),
            start,
        ),
    }
}

/// Row counts per known state in the configured slot.
async fn check_backlog(db: &Database, schema: &Arc<RecordSchema>, config: &MsgstoreConfig) -> CheckResult {
    let start = Instant::now();
    let queue = TableBackedQueue::from_config(db.clone(), schema.clone(), config, true);
    let mut counts = Vec::new();
    for state in queue.known_states() {
        let count = match queue.browser(state) {
            Ok(browser) => browser.count().await,
            Err(e) => Err(e),
        };
        match count {
            Ok(n) => counts.push(format!("{state} {n}")),
            Err(e) => {
                return CheckResult::new(
                    "Backlog",
                    CheckStatus::Fail,
                    format!("count failed: {e}"),
                    start,
                );
            }
        }
    }
    CheckResult::new("Backlog", CheckStatus::Pass, counts.join(", "), start)
}

/// `PRAGMA integrity_check`, limited to one table (and its indexes) when given.
fn integrity_sql(dialect: &Dialect, table: Option<&str>) -> String {
    match table {
        None => "PRAGMA integrity_check".to_string(),
        Some(table) => match table.split_once('.') {
            Some((database, name)) => format!(
                "PRAGMA {}.integrity_check({})",
                dialect.quote_identifier(database),
                dialect.quote_identifier(name)
            ),
            None => format!("PRAGMA integrity_check({})", dialect.quote_identifier(table)),
        },
    }
}

/// Deep check: SQLite integrity check.
async fn check_db_integrity(db: &Database, table: Option<&str>) -> CheckResult {
    let start = Instant::now();
    let sql = integrity_sql(db.dialect(), table);
    let result = db
        .call(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await;
    match result {
        Ok(rows) if rows.len() == 1 && rows[0] == "ok" => {
            CheckResult::new("DB integrity", CheckStatus::Pass, "ok", start)
        }
        Ok(rows) => CheckResult::new(
            "DB integrity",
            CheckStatus::Fail,
            format!("{} issue(s) found", rows.len()),
            start,
        ),
        Err(e) => CheckResult::new(
            "DB integrity",
            CheckStatus::Fail,
            format!("check failed: {e}"),
            start,
        ),
    }
}

/// Deep check: how long the oldest AVAILABLE row has been waiting.
async fn check_oldest_available(
    db: &Database,
    schema: &Arc<RecordSchema>,
    config: &MsgstoreConfig,
) -> CheckResult {
    let start = Instant::now();
    let queue = TableBackedQueue::from_config(db.clone(), schema.clone(), config, true);
    let oldest = match queue.browser(ProcessState::Available) {
        Ok(browser) => match browser.iterate(None, None, SortOrder::Asc).await {
            Ok(mut cursor) => cursor.next().await.transpose(),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };
    match oldest {
        Ok(None) => CheckResult::new("Oldest available", CheckStatus::Pass, "none waiting", start),
        Ok(Some(meta)) => match meta.insert_date {
            Some(at) => {
                let waited = Utc::now().signed_duration_since(at);
                let status = if waited > chrono::Duration::hours(STALE_AFTER_HOURS) {
                    CheckStatus::Warn
                } else {
                    CheckStatus::Pass
                };
                CheckResult::new(
                    "Oldest available",
                    status,
                    format!(
                        "key {} waiting since {} ({}h)",
                        meta.key,
                        at.format("%Y-%m-%d %H:%M:%S"),
                        waited.num_hours()
                    ),
                    start,
                )
            }
            None => CheckResult::new(
                "Oldest available",
                CheckStatus::Pass,
                format!("key {} (no insert date)", meta.key),
                start,
            ),
        },
        Err(e) => CheckResult::new(
            "Oldest available",
            CheckStatus::Fail,
            format!("lookup failed: {e}"),
            start,
        ),
    }
}

/// Deep check: the host name stamped on stored rows.
fn check_host() -> CheckResult {
    let start = Instant::now();
    match sysinfo::System::host_name() {
        Some(host) => CheckResult::new("Host", CheckStatus::Pass, host, start),
        None => CheckResult::new(
            "Host",
            CheckStatus::Warn,
            "host name unknown, rows are stored without one",
            start,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &tempfile::TempDir) -> MsgstoreConfig {
        let mut config = MsgstoreConfig::default();
        config.database.path = dir.path().join("check.db").to_string_lossy().into_owned();
        config
    }

    fn status_of<'a>(results: &'a [CheckResult], name: &str) -> &'a CheckStatus {
        &results
            .iter()
            .find(|r| r.name == name)
            .unwrap_or_else(|| panic!("no {name} check"))
            .status
    }

    #[test]
    fn integrity_check_quotes_the_table() {
        let sqlite = Dialect::from_name("sqlite").unwrap();
        assert_eq!(integrity_sql(sqlite, None), "PRAGMA integrity_check");
        assert_eq!(
            integrity_sql(sqlite, Some("JMS_MESSAGES")),
            "PRAGMA integrity_check(\"JMS_MESSAGES\")"
        );
        assert_eq!(
            integrity_sql(sqlite, Some("aux.Q\"1")),
            "PRAGMA \"aux\".integrity_check(\"Q\"\"1\")"
        );
    }

    #[test]
    fn plain_rendering_uses_tags() {
        let result = CheckResult {
            name: "Table".to_string(),
            status: CheckStatus::Warn,
            message: "no index".to_string(),
            duration: Duration::from_millis(3),
        };
        assert_eq!(
            render(&result, false),
            "    [WARN] Table                no index (3ms)"
        );
    }

    #[test]
    fn unknown_and_render_only_dialects_fail() {
        assert_eq!(check_dialect("sqlite").status, CheckStatus::Pass);
        assert_eq!(check_dialect("oracle").status, CheckStatus::Fail);
        assert_eq!(check_dialect("dbase").status, CheckStatus::Fail);
    }

    #[test]
    fn complement_available_and_bad_condition_warn() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.queue.status.remove(&ProcessState::Available);
        config.queue.select_condition = Some("t.COMMENTS IS NULL".into());
        let results = check_queue_settings(&config);
        assert_eq!(status_of(&results, "Queue states"), &CheckStatus::Warn);
        assert_eq!(status_of(&results, "Select condition"), &CheckStatus::Warn);
    }

    #[tokio::test]
    async fn missing_database_warns_without_creating_it() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let results = collect(&config, false).await;
        assert_eq!(status_of(&results, "Database"), &CheckStatus::Warn);
        assert!(!dir.path().join("check.db").exists());
    }

    #[tokio::test]
    async fn missing_table_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        Database::open(&config.database).await.unwrap();
        let results = collect(&config, false).await;
        assert_eq!(status_of(&results, "Database"), &CheckStatus::Pass);
        assert_eq!(status_of(&results, "Table"), &CheckStatus::Fail);
        assert!(results.iter().all(|r| r.name != "Backlog"));
    }

    #[tokio::test]
    async fn initialised_table_passes_deep_checks() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        crate::commands::run_init(&config).await.unwrap();
        let results = collect(&config, true).await;
        assert_eq!(status_of(&results, "Table"), &CheckStatus::Pass);
        assert_eq!(status_of(&results, "Backlog"), &CheckStatus::Pass);
        assert_eq!(status_of(&results, "DB integrity"), &CheckStatus::Pass);
        let backlog = results.iter().find(|r| r.name == "Backlog").unwrap();
        assert!(backlog.message.contains("AVAILABLE 0"), "{}", backlog.message);
        assert_eq!(status_of(&results, "Oldest available"), &CheckStatus::Pass);
    }

    #[tokio::test]
    async fn stale_available_row_warns() {
        use msgstore_core::{NewMessage, TransactionalStorage};

        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        crate::commands::run_init(&config).await.unwrap();
        let queue = crate::commands::open_queue(&config).await.unwrap();
        let old = Utc::now() - chrono::Duration::days(3);
        queue
            .store(NewMessage::new("stuck", "c", "x").received_at(old))
            .await
            .unwrap();
        queue
            .store(NewMessage::new("fresh", "c", "y"))
            .await
            .unwrap();

        let quick = collect(&config, false).await;
        assert!(quick.iter().all(|r| r.name != "Oldest available"));

        let results = collect(&config, true).await;
        assert_eq!(status_of(&results, "Oldest available"), &CheckStatus::Warn);
        let oldest = results.iter().find(|r| r.name == "Oldest available").unwrap();
        assert!(oldest.message.contains("72h"), "{}", oldest.message);
    }
}
