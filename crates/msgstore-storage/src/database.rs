// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! In [`ConnectionMode::Shared`] every call runs on the single background
//! thread of one `tokio-rusqlite` connection. In [`ConnectionMode::Pooled`]
//! each call opens its own connection on the blocking pool, so no transaction
//! ever spans two calls. Cursors always read through a dedicated connection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use msgstore_config::model::{ConnectionMode, DatabaseConfig};
use msgstore_core::{StorageKey, StoreError};
use rusqlite::ErrorCode;
use rusqlite::types::{Value, ValueRef};
use tracing::{debug, warn};

use crate::dialect::Dialect;

/// Timestamp layout written to and read from text date columns.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Handle on one SQLite database file.
#[derive(Clone)]
pub struct Database {
    path: PathBuf,
    dialect: &'static Dialect,
    mode: ConnectionMode,
    busy_timeout: Duration,
    shared: Option<tokio_rusqlite::Connection>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("dialect", &self.dialect.kind)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Database {
    /// Opens the database, creating the file and its directory when missing.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let dialect = Dialect::from_name(&config.dialect)?;
        if !dialect.is_executable() {
            return Err(StoreError::Config(format!(
                "dialect `{}` has no driver in this build; use `msgstore sql` to render its statements",
                dialect.kind
            )));
        }
        if config.path.trim() == ":memory:" {
            return Err(StoreError::Config(
                "in-memory databases are not supported".to_string(),
            ));
        }

        let path = PathBuf::from(&config.path);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Storage {
                source: Box::new(e),
            })?;
        }

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let conn = tokio_rusqlite::Connection::open(&path)
            .await
            .map_err(|e| StoreError::Storage {
                source: Box::new(e),
            })?;

        let wal_mode = config.wal_mode;
        let journal = conn
            .call(move |conn| -> Result<String, rusqlite::Error> {
                conn.busy_timeout(busy_timeout)?;
                if wal_mode {
                    conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
                } else {
                    conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))
                }
            })
            .await
            .map_err(map_tr_err)?;
        if wal_mode && !journal.eq_ignore_ascii_case("wal") {
            warn!(path = %path.display(), journal = %journal, "WAL mode could not be enabled");
        }

        let shared = match config.connection_mode {
            ConnectionMode::Shared => Some(conn),
            ConnectionMode::Pooled => None,
        };

        debug!(
            path = %path.display(),
            mode = ?config.connection_mode,
            journal = %journal,
            "database opened"
        );

        Ok(Self {
            path,
            dialect,
            mode: config.connection_mode,
            busy_timeout,
            shared,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dialect(&self) -> &'static Dialect {
        self.dialect
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    /// Runs `f` on a connection and maps engine errors.
    pub async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        match &self.shared {
            Some(conn) => conn.call(f).await.map_err(map_tr_err),
            None => {
                let path = self.path.clone();
                let busy_timeout = self.busy_timeout;
                tokio::task::spawn_blocking(move || {
                    let mut conn = open_sync(&path, busy_timeout)?;
                    f(&mut conn)
                })
                .await
                .map_err(|e| StoreError::Internal(format!("database task failed: {e}")))?
                .map_err(map_sqlite_err)
            }
        }
    }

    /// Like [`Database::call`], but gives up once `limit` elapses.
    pub async fn call_with_timeout<T, F>(
        &self,
        limit: Option<Duration>,
        f: F,
    ) -> Result<T, StoreError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        self.call_with_deadline(limit, move |conn, _| f(conn)).await
    }

    /// Runs `f` against a [`Deadline`] `limit` from now.
    ///
    /// Lock waits are capped at the time left and the running statement is
    /// interrupted when the deadline passes. The call is always awaited to
    /// the end, so whatever `f` committed is what the caller gets back; `f`
    /// should [`Deadline::check`] before committing. A call cut short by the
    /// deadline fails with [`StoreError::Timeout`].
    pub async fn call_with_deadline<T, F>(
        &self,
        limit: Option<Duration>,
        f: F,
    ) -> Result<T, StoreError>
    where
        F: FnOnce(&mut rusqlite::Connection, Deadline) -> Result<T, rusqlite::Error>
            + Send
            + 'static,
        T: Send + 'static,
    {
        let Some(limit) = limit else {
            return self.call(move |conn| f(conn, Deadline::default())).await;
        };

        let busy_timeout = self.busy_timeout;
        let deadline = Deadline::after(limit);
        let running = Arc::new(AtomicBool::new(false));
        let in_call = running.clone();
        let guarded = move |conn: &mut rusqlite::Connection| {
            deadline.check()?;
            let bound = deadline.bind(conn, busy_timeout)?;
            in_call.store(true, Ordering::SeqCst);
            let result = f(conn, bound);
            in_call.store(false, Ordering::SeqCst);
            if bound.limits_lock_wait() {
                conn.busy_timeout(busy_timeout)?;
            }
            match result {
                Err(e) if bound.cut_short(&e) => Err(Deadline::passed()),
                other => other,
            }
        };

        let result = match &self.shared {
            Some(conn) => {
                let handle = conn
                    .call(|conn| -> Result<_, rusqlite::Error> { Ok(conn.get_interrupt_handle()) })
                    .await
                    .map_err(map_tr_err)?;
                let call = conn.call(guarded);
                tokio::pin!(call);
                let outcome = tokio::select! {
                    outcome = &mut call => outcome,
                    _ = tokio::time::sleep(limit) => {
                        // Other callers share this connection; only stop our own statement.
                        if running.load(Ordering::SeqCst) {
                            handle.interrupt();
                        }
                        call.await
                    }
                };
                match outcome {
                    Ok(value) => Ok(value),
                    Err(tokio_rusqlite::Error::Error(e)) => Err(e),
                    Err(other) => return Err(map_tr_err(other)),
                }
            }
            None => {
                let path = self.path.clone();
                let (handle_tx, mut handle_rx) = tokio::sync::oneshot::channel();
                let mut task = tokio::task::spawn_blocking(move || {
                    let mut conn = open_sync(&path, busy_timeout)?;
                    let _ = handle_tx.send(conn.get_interrupt_handle());
                    guarded(&mut conn)
                });
                let joined = tokio::select! {
                    joined = &mut task => joined,
                    _ = tokio::time::sleep(limit) => {
                        if let Ok(handle) = handle_rx.try_recv() {
                            handle.interrupt();
                        }
                        task.await
                    }
                };
                joined.map_err(|e| StoreError::Internal(format!("database task failed: {e}")))?
            }
        };

        result.map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::OperationInterrupted) => {
                debug!(limit_ms = limit.as_millis() as u64, "call cut short by deadline");
                StoreError::Timeout { duration: limit }
            }
            _ => map_sqlite_err(e),
        })
    }

    /// Opens a synchronous connection for use on a blocking thread.
    pub fn open_blocking(&self) -> Result<rusqlite::Connection, StoreError> {
        open_sync(&self.path, self.busy_timeout).map_err(map_sqlite_err)
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.call(|conn| conn.execute_batch("SELECT 1;")).await
    }

    /// Folds the WAL back into the main database file.
    pub async fn checkpoint(&self) -> Result<(), StoreError> {
        self.call(|conn| conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);"))
            .await?;
        debug!(path = %self.path.display(), "WAL checkpoint complete");
        Ok(())
    }
}

/// Point in time after which a guarded call gives up.
///
/// The default deadline never passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    at: Option<Instant>,
    limits_lock_wait: bool,
}

impl Deadline {
    fn after(limit: Duration) -> Self {
        Self {
            at: Some(Instant::now() + limit),
            limits_lock_wait: false,
        }
    }

    pub fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Whether lock waits on this connection end at the deadline rather
    /// than at the configured busy timeout.
    pub fn limits_lock_wait(&self) -> bool {
        self.limits_lock_wait
    }

    /// Fails with `SQLITE_INTERRUPT` once the deadline has passed.
    pub fn check(&self) -> rusqlite::Result<()> {
        if self.expired() {
            return Err(Self::passed());
        }
        Ok(())
    }

    fn passed() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
            Some("deadline passed".to_string()),
        )
    }

    /// Caps the busy timeout of `conn` at the time left.
    fn bind(mut self, conn: &rusqlite::Connection, busy_timeout: Duration) -> rusqlite::Result<Self> {
        if let Some(at) = self.at {
            let left = at.saturating_duration_since(Instant::now());
            if left < busy_timeout {
                conn.busy_timeout(left)?;
                self.limits_lock_wait = true;
            }
        }
        Ok(self)
    }

    /// Whether `error` is the deadline ending the call.
    pub fn cut_short(&self, error: &rusqlite::Error) -> bool {
        if self.at.is_none() {
            return false;
        }
        match error.sqlite_error_code() {
            Some(ErrorCode::OperationInterrupted) => true,
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                self.limits_lock_wait || self.expired()
            }
            _ => false,
        }
    }
}

fn open_sync(path: &Path, busy_timeout: Duration) -> Result<rusqlite::Connection, rusqlite::Error> {
    let conn = rusqlite::Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
    Ok(conn)
}

/// Converts a rusqlite error, classifying lock contention as [`StoreError::Busy`].
pub fn map_sqlite_err(e: rusqlite::Error) -> StoreError {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            StoreError::Busy(e.to_string())
        }
        _ => StoreError::Storage {
            source: Box::new(e),
        },
    }
}

/// Convert a tokio-rusqlite error into a [`StoreError`].
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> StoreError {
    match e {
        tokio_rusqlite::Error::Error(inner) => map_sqlite_err(inner),
        other => StoreError::Storage {
            source: Box::new(other),
        },
    }
}

/// Binds a key as an integer when it is one, so it matches integer key columns.
pub fn key_value(key: &StorageKey) -> Value {
    match key.as_str().parse::<i64>() {
        Ok(n) => Value::Integer(n),
        Err(_) => Value::Text(key.as_str().to_string()),
    }
}

/// Reads a key column, whatever its storage class.
pub fn key_from_value(value: ValueRef<'_>) -> Result<StorageKey, rusqlite::types::FromSqlError> {
    match value {
        ValueRef::Integer(n) => Ok(StorageKey::from(n)),
        ValueRef::Text(t) => Ok(StorageKey(String::from_utf8_lossy(t).into_owned())),
        ValueRef::Real(r) => Ok(StorageKey(r.to_string())),
        _ => Err(rusqlite::types::FromSqlError::InvalidType),
    }
}

/// Reads a key column at `idx`.
pub fn row_key(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<StorageKey> {
    let value = row.get_ref(idx)?;
    key_from_value(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, value.data_type(), Box::new(e))
    })
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a stored timestamp. Accepts RFC 3339 and SQLite's `YYYY-MM-DD HH:MM:SS` form.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
