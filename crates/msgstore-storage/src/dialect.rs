// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-engine SQL capabilities.
//!
//! Each supported database engine is described by one static [`Dialect`]
//! value. All methods are pure functions of their inputs; nothing here
//! touches a connection. Only [`DialectKind::Sqlite`] has an executing
//! driver in this crate, the other dialects render SQL for `msgstore sql`
//! and for operators running the same layout elsewhere.

use std::str::FromStr;

use msgstore_core::StoreError;
use strum::{Display, EnumString};

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DialectKind {
    Sqlite,
    Postgresql,
    Oracle,
    Mssql,
    Mysql,
    Mariadb,
    H2,
    Db2,
    Generic,
}

/// How new keys are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGeneration {
    /// Identity / autoincrement column.
    Identity,
    /// Explicit sequence referenced in the insert.
    Sequence,
}

/// How the generated key is handed back from an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returning {
    /// `... RETURNING key`
    Clause,
    /// `INSERT ... OUTPUT INSERTED.key ...`
    Output,
    /// `... RETURNING key INTO ?`
    IntoBind,
    /// Read the connection's last generated key after the insert.
    LastInsertId,
}

/// How payload bytes reach a blob column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobHandling {
    /// Bind the bytes directly as an insert parameter.
    Inline,
    /// Insert an empty locator, then select it for update and stream into it.
    Locator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Locking {
    /// The enclosing write transaction already holds the database lock.
    DatabaseLock,
    ForUpdate,
    ForUpdateSkipLocked,
    OracleSkipLocked,
    Db2SkipLocked,
    TableHint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectHint {
    None,
    OracleFirstRows,
    Top,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrailingLimit {
    None,
    Limit,
    FetchFirst,
}

/// Static capability descriptor for one database engine.
#[derive(Debug)]
pub struct Dialect {
    pub kind: DialectKind,
    quote: (char, char),
    key_generation: KeyGeneration,
    key_column: &'static str,
    sysdate: &'static str,
    locking: Locking,
    readpast_on_peek: bool,
    select_hint: SelectHint,
    trailing_limit: TrailingLimit,
    returning: Returning,
    blob_handling: BlobHandling,
    varchar: &'static str,
    clob_type: &'static str,
    blob_type: &'static str,
    timestamp_type: &'static str,
    dummy_table: Option<&'static str>,
    if_not_exists: bool,
    executable: bool,
}

static DIALECTS: [Dialect; 9] = [
    Dialect {
        kind: DialectKind::Sqlite,
        quote: ('"', '"'),
        key_generation: KeyGeneration::Identity,
        key_column: "INTEGER PRIMARY KEY AUTOINCREMENT",
        sysdate: "strftime('%Y-%m-%dT%H:%M:%fZ','now')",
        locking: Locking::DatabaseLock,
        readpast_on_peek: false,
        select_hint: SelectHint::None,
        trailing_limit: TrailingLimit::Limit,
        returning: Returning::Clause,
        blob_handling: BlobHandling::Inline,
        varchar: "TEXT",
        clob_type: "TEXT",
        blob_type: "BLOB",
        timestamp_type: "TEXT",
        dummy_table: None,
        if_not_exists: true,
        executable: true,
    },
    Dialect {
        kind: DialectKind::Postgresql,
        quote: ('"', '"'),
        key_generation: KeyGeneration::Sequence,
        key_column: "BIGINT PRIMARY KEY",
        sysdate: "CURRENT_TIMESTAMP",
        locking: Locking::ForUpdateSkipLocked,
        readpast_on_peek: false,
        select_hint: SelectHint::None,
        trailing_limit: TrailingLimit::Limit,
        returning: Returning::Clause,
        blob_handling: BlobHandling::Inline,
        varchar: "VARCHAR",
        clob_type: "TEXT",
        blob_type: "BYTEA",
        timestamp_type: "TIMESTAMP",
        dummy_table: None,
        if_not_exists: true,
        executable: false,
    },
    Dialect {
        kind: DialectKind::Oracle,
        quote: ('"', '"'),
        key_generation: KeyGeneration::Sequence,
        key_column: "NUMBER(19) PRIMARY KEY",
        sysdate: "SYSTIMESTAMP",
        locking: Locking::OracleSkipLocked,
        readpast_on_peek: false,
        select_hint: SelectHint::OracleFirstRows,
        trailing_limit: TrailingLimit::None,
        returning: Returning::IntoBind,
        blob_handling: BlobHandling::Locator,
        varchar: "VARCHAR2",
        clob_type: "CLOB",
        blob_type: "BLOB",
        timestamp_type: "TIMESTAMP",
        dummy_table: Some("DUAL"),
        if_not_exists: false,
        executable: false,
    },
    Dialect {
        kind: DialectKind::Mssql,
        quote: ('[', ']'),
        key_generation: KeyGeneration::Identity,
        key_column: "BIGINT IDENTITY(1,1) PRIMARY KEY",
        sysdate: "CURRENT_TIMESTAMP",
        locking: Locking::TableHint,
        readpast_on_peek: true,
        select_hint: SelectHint::Top,
        trailing_limit: TrailingLimit::None,
        returning: Returning::Output,
        blob_handling: BlobHandling::Inline,
        varchar: "VARCHAR",
        clob_type: "VARCHAR(MAX)",
        blob_type: "VARBINARY(MAX)",
        timestamp_type: "DATETIME2",
        dummy_table: None,
        if_not_exists: false,
        executable: false,
    },
    Dialect {
        kind: DialectKind::Mysql,
        quote: ('`', '`'),
        key_generation: KeyGeneration::Identity,
        key_column: "BIGINT AUTO_INCREMENT PRIMARY KEY",
        sysdate: "NOW(3)",
        locking: Locking::ForUpdateSkipLocked,
        readpast_on_peek: false,
        select_hint: SelectHint::None,
        trailing_limit: TrailingLimit::Limit,
        returning: Returning::LastInsertId,
        blob_handling: BlobHandling::Inline,
        varchar: "VARCHAR",
        clob_type: "LONGTEXT",
        blob_type: "LONGBLOB",
        timestamp_type: "DATETIME(3)",
        dummy_table: Some("DUAL"),
        if_not_exists: true,
        executable: false,
    },
    Dialect {
        kind: DialectKind::Mariadb,
        quote: ('`', '`'),
        key_generation: KeyGeneration::Identity,
        key_column: "BIGINT AUTO_INCREMENT PRIMARY KEY",
        sysdate: "NOW(3)",
        locking: Locking::ForUpdateSkipLocked,
        readpast_on_peek: false,
        select_hint: SelectHint::None,
        trailing_limit: TrailingLimit::Limit,
        returning: Returning::Clause,
        blob_handling: BlobHandling::Inline,
        varchar: "VARCHAR",
        clob_type: "LONGTEXT",
        blob_type: "LONGBLOB",
        timestamp_type: "DATETIME(3)",
        dummy_table: Some("DUAL"),
        if_not_exists: true,
        executable: false,
    },
    Dialect {
        kind: DialectKind::H2,
        quote: ('"', '"'),
        key_generation: KeyGeneration::Sequence,
        key_column: "BIGINT PRIMARY KEY",
        sysdate: "CURRENT_TIMESTAMP",
        locking: Locking::ForUpdate,
        readpast_on_peek: false,
        select_hint: SelectHint::None,
        trailing_limit: TrailingLimit::Limit,
        returning: Returning::LastInsertId,
        blob_handling: BlobHandling::Inline,
        varchar: "VARCHAR",
        clob_type: "CLOB",
        blob_type: "BLOB",
        timestamp_type: "TIMESTAMP",
        dummy_table: None,
        if_not_exists: true,
        executable: false,
    },
    Dialect {
        kind: DialectKind::Db2,
        quote: ('"', '"'),
        key_generation: KeyGeneration::Sequence,
        key_column: "BIGINT NOT NULL PRIMARY KEY",
        sysdate: "CURRENT TIMESTAMP",
        locking: Locking::Db2SkipLocked,
        readpast_on_peek: false,
        select_hint: SelectHint::None,
        trailing_limit: TrailingLimit::FetchFirst,
        returning: Returning::LastInsertId,
        blob_handling: BlobHandling::Inline,
        varchar: "VARCHAR",
        clob_type: "CLOB",
        blob_type: "BLOB",
        timestamp_type: "TIMESTAMP",
        dummy_table: Some("SYSIBM.SYSDUMMY1"),
        if_not_exists: false,
        executable: false,
    },
    Dialect {
        kind: DialectKind::Generic,
        quote: ('"', '"'),
        key_generation: KeyGeneration::Identity,
        key_column: "BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY",
        sysdate: "CURRENT_TIMESTAMP",
        locking: Locking::ForUpdate,
        readpast_on_peek: false,
        select_hint: SelectHint::None,
        trailing_limit: TrailingLimit::None,
        returning: Returning::LastInsertId,
        blob_handling: BlobHandling::Inline,
        varchar: "VARCHAR",
        clob_type: "CLOB",
        blob_type: "BLOB",
        timestamp_type: "TIMESTAMP",
        dummy_table: None,
        if_not_exists: false,
        executable: false,
    },
];

/// Looks up the descriptor for `kind`.
pub fn dialect(kind: DialectKind) -> &'static Dialect {
    // The table holds exactly one entry per kind.
    DIALECTS
        .iter()
        .find(|d| d.kind == kind)
        .unwrap_or(&DIALECTS[DIALECTS.len() - 1])
}

fn find_keyword(haystack: &str, keyword: &str) -> Option<usize> {
    haystack.to_ascii_uppercase().find(keyword)
}

impl Dialect {
    /// Resolves a configured dialect name. Unknown names are a setup error.
    pub fn from_name(name: &str) -> Result<&'static Dialect, StoreError> {
        DialectKind::from_str(name.trim())
            .map(dialect)
            .map_err(|_| StoreError::Config(format!("unknown SQL dialect `{name}`")))
    }

    /// Whether this crate can execute statements against the engine.
    pub fn is_executable(&self) -> bool {
        self.executable
    }

    pub fn quote_identifier(&self, name: &str) -> String {
        let (open, close) = self.quote;
        name.split('.')
            .map(|part| {
                let escaped = part.replace(close, &format!("{close}{close}"));
                format!("{open}{escaped}{close}")
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn key_generation(&self) -> KeyGeneration {
        self.key_generation
    }

    /// Expression producing the next key, for sequence-keyed engines.
    pub fn key_generation_expression(&self, sequence: &str) -> Option<String> {
        match (self.key_generation, self.kind) {
            (KeyGeneration::Identity, _) => None,
            (KeyGeneration::Sequence, DialectKind::Oracle) => Some(format!("{sequence}.NEXTVAL")),
            (KeyGeneration::Sequence, DialectKind::Postgresql) => {
                Some(format!("nextval('{sequence}')"))
            }
            (KeyGeneration::Sequence, _) => Some(format!("NEXT VALUE FOR {sequence}")),
        }
    }

    pub fn key_column_definition(&self) -> &'static str {
        self.key_column
    }

    pub fn returning(&self) -> Returning {
        self.returning
    }

    pub fn blob_handling(&self) -> BlobHandling {
        self.blob_handling
    }

    pub fn sysdate(&self) -> &'static str {
        self.sysdate
    }

    /// SQL expression for the database time `days` from now.
    pub fn timestamp_after_days(&self, days: i64) -> String {
        match self.kind {
            DialectKind::Sqlite => {
                format!("strftime('%Y-%m-%dT%H:%M:%fZ','now','{days:+} days')")
            }
            DialectKind::Postgresql => format!("CURRENT_TIMESTAMP + INTERVAL '{days} days'"),
            DialectKind::Oracle => format!("SYSTIMESTAMP + {days}"),
            DialectKind::Mssql => format!("DATEADD(day, {days}, CURRENT_TIMESTAMP)"),
            DialectKind::Mysql | DialectKind::Mariadb => format!("NOW(3) + INTERVAL {days} DAY"),
            DialectKind::H2 => format!("DATEADD('DAY', {days}, CURRENT_TIMESTAMP)"),
            DialectKind::Db2 => format!("CURRENT TIMESTAMP + {days} DAYS"),
            DialectKind::Generic => format!("CURRENT_TIMESTAMP + INTERVAL '{days}' DAY"),
        }
    }

    /// Whether a failed statement only lost a lock race.
    pub fn is_lock_timeout(&self, error: &rusqlite::Error) -> bool {
        matches!(
            error.sqlite_error_code(),
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
        )
    }

    pub fn skip_locked_supported(&self) -> bool {
        matches!(
            self.locking,
            Locking::ForUpdateSkipLocked
                | Locking::OracleSkipLocked
                | Locking::Db2SkipLocked
                | Locking::TableHint
        )
    }

    pub fn text_column_type(&self, len: u32) -> String {
        if self.varchar == "TEXT" {
            "TEXT".to_string()
        } else {
            format!("{}({len})", self.varchar)
        }
    }

    pub fn clob_type(&self) -> &'static str {
        self.clob_type
    }

    pub fn blob_column_type(&self) -> &'static str {
        self.blob_type
    }

    pub fn timestamp_column_type(&self) -> &'static str {
        self.timestamp_type
    }

    pub fn char_type(&self) -> String {
        if self.varchar == "TEXT" {
            "TEXT".to_string()
        } else {
            "CHAR(1)".to_string()
        }
    }

    /// `FROM` clause needed for a table-less select, if the engine requires one.
    pub fn dummy_from(&self) -> String {
        self.dummy_table
            .map(|t| format!(" FROM {t}"))
            .unwrap_or_default()
    }

    /// Prepares a claim query so that concurrent claimers lock different rows.
    ///
    /// `wait_seconds` only matters where the engine can wait for a lock
    /// instead of skipping it.
    pub fn rewrite_for_row_locking(
        &self,
        query: &str,
        wait_seconds: Option<u32>,
    ) -> Result<String, StoreError> {
        ensure_select(query)?;
        let query = query.trim_end();
        Ok(match self.locking {
            Locking::DatabaseLock => query.to_string(),
            Locking::ForUpdate => format!("{query} FOR UPDATE"),
            Locking::ForUpdateSkipLocked => format!("{query} FOR UPDATE SKIP LOCKED"),
            Locking::OracleSkipLocked => match wait_seconds {
                Some(wait) => format!("{query} FOR UPDATE WAIT {wait}"),
                None => format!("{query} FOR UPDATE SKIP LOCKED"),
            },
            Locking::Db2SkipLocked => format!("{query} FOR UPDATE SKIP LOCKED DATA"),
            Locking::TableHint => insert_table_hint(query, "WITH (ROWLOCK, UPDLOCK, READPAST)"),
        })
    }

    /// Prepares a query that must neither take nor wait for row locks.
    pub fn rewrite_for_non_locking_read(&self, query: &str) -> String {
        if self.readpast_on_peek {
            insert_table_hint(query.trim_end(), "WITH (READPAST)")
        } else {
            query.trim_end().to_string()
        }
    }

    /// Non-locking peek returning at most one row.
    pub fn rewrite_for_peek(&self, query: &str) -> String {
        self.apply_row_limit(&self.rewrite_for_non_locking_read(query), 1)
    }

    /// Hint placed right after the `SELECT` keyword.
    pub fn first_rows_hint_after_keyword(&self, rows: usize) -> Option<String> {
        match self.select_hint {
            SelectHint::None => None,
            SelectHint::OracleFirstRows => Some(format!("/*+ FIRST_ROWS({rows}) */")),
            SelectHint::Top => Some(format!("TOP {rows}")),
        }
    }

    /// Row limit appended to the end of a select.
    pub fn trailing_first_rows_hint(&self, rows: usize) -> Option<String> {
        match self.trailing_limit {
            TrailingLimit::None => None,
            TrailingLimit::Limit => Some(format!("LIMIT {rows}")),
            TrailingLimit::FetchFirst => Some(format!("FETCH FIRST {rows} ROWS ONLY")),
        }
    }

    /// Adds the engine's first-rows hint and row limit to a select.
    pub fn apply_row_limit(&self, query: &str, rows: usize) -> String {
        let query = query.trim_end();
        let query = match self.first_rows_hint_after_keyword(rows) {
            Some(hint) => replace_select_keyword(query, &format!("SELECT {hint} ")),
            None => query.to_string(),
        };
        match self.trailing_first_rows_hint(rows) {
            Some(limit) => format!("{query} {limit}"),
            None => query,
        }
    }

    /// `RETURNING` clause appended after the values.
    pub fn insert_returning_clause(&self, key: &str) -> Option<String> {
        match self.returning {
            Returning::Clause => Some(format!("RETURNING {key}")),
            Returning::IntoBind => Some(format!("RETURNING {key} INTO ?")),
            Returning::Output | Returning::LastInsertId => None,
        }
    }

    /// `OUTPUT` clause placed between the column list and the values.
    pub fn insert_output_clause(&self, key: &str) -> Option<String> {
        match self.returning {
            Returning::Output => Some(format!("OUTPUT INSERTED.{key}")),
            _ => None,
        }
    }

    /// Renders an insert that hands back the generated key where the engine can.
    ///
    /// `source` is either a `VALUES (...)` list or a `SELECT ...`.
    pub fn insert_returning(&self, table: &str, columns: &[&str], source: &str, key: &str) -> String {
        let mut sql = format!("INSERT INTO {table} ({})", columns.join(","));
        if let Some(output) = self.insert_output_clause(key) {
            sql.push(' ');
            sql.push_str(&output);
        }
        sql.push(' ');
        sql.push_str(source);
        if let Some(returning) = self.insert_returning_clause(key) {
            sql.push(' ');
            sql.push_str(&returning);
        }
        sql
    }

    pub fn must_insert_empty_blob_before_data(&self) -> bool {
        self.blob_handling == BlobHandling::Locator
    }

    /// Value inserted in place of the payload on locator-based engines.
    pub fn empty_blob_value(&self) -> Option<&'static str> {
        match self.blob_handling {
            BlobHandling::Inline => None,
            BlobHandling::Locator => Some("EMPTY_BLOB()"),
        }
    }

    pub fn create_table_prefix(&self) -> &'static str {
        if self.if_not_exists {
            "CREATE TABLE IF NOT EXISTS"
        } else {
            "CREATE TABLE"
        }
    }

    pub fn create_index_prefix(&self) -> &'static str {
        if self.if_not_exists && self.kind != DialectKind::Mysql {
            "CREATE INDEX IF NOT EXISTS"
        } else {
            "CREATE INDEX"
        }
    }

    pub fn create_sequence(&self, name: &str) -> Option<String> {
        match self.key_generation {
            KeyGeneration::Identity => None,
            KeyGeneration::Sequence => Some(format!(
                "CREATE SEQUENCE {name} START WITH 1 INCREMENT BY 1"
            )),
        }
    }
}

fn ensure_select(query: &str) -> Result<(), StoreError> {
    let starts_with_select = query
        .trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("SELECT"));
    if starts_with_select {
        Ok(())
    } else {
        Err(StoreError::Config(format!(
            "query must start with SELECT to be prepared for row locking: {query}"
        )))
    }
}

fn replace_select_keyword(query: &str, replacement: &str) -> String {
    let trimmed = query.trim_start();
    match trimmed.get(..6) {
        Some(head) if head.eq_ignore_ascii_case("SELECT") => {
            format!("{replacement}{}", trimmed[6..].trim_start())
        }
        _ => query.to_string(),
    }
}

/// Places a table hint right after the first table reference.
fn insert_table_hint(query: &str, hint: &str) -> String {
    let Some(from) = find_keyword(query, " FROM ") else {
        return format!("{query} {hint}");
    };
    let after_from = from + " FROM ".len();
    let rest = &query[after_from..];
    let end = [" WHERE ", " ORDER BY ", " GROUP BY "]
        .iter()
        .filter_map(|kw| find_keyword(rest, kw))
        .min()
        .map(|pos| after_from + pos)
        .unwrap_or(query.len());
    format!("{} {hint}{}", &query[..end], &query[end..])
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLAIM: &str = "SELECT t.K FROM Q t WHERE t.S='A' ORDER BY t.D";

    #[test]
    fn every_kind_has_a_descriptor() {
        for name in [
            "sqlite",
            "postgresql",
            "oracle",
            "mssql",
            "mysql",
            "mariadb",
            "h2",
            "db2",
            "generic",
        ] {
            let d = Dialect::from_name(name).unwrap();
            assert_eq!(d.kind.to_string(), name);
        }
    }

    #[test]
    fn unknown_dialect_is_config_error() {
        let err = Dialect::from_name("informix").unwrap_err();
        assert!(matches!(err, StoreError::Config(msg) if msg.contains("informix")));
    }

    #[test]
    fn dialect_names_are_case_insensitive() {
        assert_eq!(
            Dialect::from_name("PostgreSQL").unwrap().kind,
            DialectKind::Postgresql
        );
    }

    #[test]
    fn only_sqlite_executes() {
        let executable: Vec<_> = DIALECTS.iter().filter(|d| d.is_executable()).collect();
        assert_eq!(executable.len(), 1);
        assert_eq!(executable[0].kind, DialectKind::Sqlite);
    }

    #[test]
    fn quoting_follows_engine() {
        assert_eq!(dialect(DialectKind::Mssql).quote_identifier("T"), "[T]");
        assert_eq!(dialect(DialectKind::Mysql).quote_identifier("T"), "`T`");
        assert_eq!(
            dialect(DialectKind::Postgresql).quote_identifier("app.T"),
            "\"app\".\"T\""
        );
        assert_eq!(
            dialect(DialectKind::Sqlite).quote_identifier("a\"b"),
            "\"a\"\"b\""
        );
    }

    #[test]
    fn skip_locked_support() {
        assert!(!dialect(DialectKind::Sqlite).skip_locked_supported());
        assert!(!dialect(DialectKind::H2).skip_locked_supported());
        assert!(!dialect(DialectKind::Generic).skip_locked_supported());
        assert!(dialect(DialectKind::Postgresql).skip_locked_supported());
        assert!(dialect(DialectKind::Oracle).skip_locked_supported());
        assert!(dialect(DialectKind::Mssql).skip_locked_supported());
    }

    #[test]
    fn row_locking_rewrites() {
        let pg = dialect(DialectKind::Postgresql);
        assert_eq!(
            pg.rewrite_for_row_locking(CLAIM, None).unwrap(),
            format!("{CLAIM} FOR UPDATE SKIP LOCKED")
        );

        let ora = dialect(DialectKind::Oracle);
        assert!(
            ora.rewrite_for_row_locking(CLAIM, Some(5))
                .unwrap()
                .ends_with("FOR UPDATE WAIT 5")
        );

        let mssql = dialect(DialectKind::Mssql);
        assert_eq!(
            mssql.rewrite_for_row_locking(CLAIM, None).unwrap(),
            "SELECT t.K FROM Q t WITH (ROWLOCK, UPDLOCK, READPAST) WHERE t.S='A' ORDER BY t.D"
        );

        let db2 = dialect(DialectKind::Db2);
        assert!(
            db2.rewrite_for_row_locking(CLAIM, None)
                .unwrap()
                .ends_with("FOR UPDATE SKIP LOCKED DATA")
        );

        let sqlite = dialect(DialectKind::Sqlite);
        assert_eq!(sqlite.rewrite_for_row_locking(CLAIM, None).unwrap(), CLAIM);
    }

    #[test]
    fn row_locking_requires_select() {
        let err = dialect(DialectKind::Postgresql)
            .rewrite_for_row_locking("UPDATE Q SET S='I'", None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn peek_is_limited_to_one_row() {
        assert_eq!(
            dialect(DialectKind::Sqlite).rewrite_for_peek(CLAIM),
            format!("{CLAIM} LIMIT 1")
        );
        assert_eq!(
            dialect(DialectKind::Mssql).rewrite_for_peek(CLAIM),
            "SELECT TOP 1 t.K FROM Q t WITH (READPAST) WHERE t.S='A' ORDER BY t.D"
        );
        assert_eq!(
            dialect(DialectKind::Db2).rewrite_for_peek(CLAIM),
            format!("{CLAIM} FETCH FIRST 1 ROWS ONLY")
        );
    }

    #[test]
    fn first_rows_hint() {
        assert_eq!(
            dialect(DialectKind::Oracle).apply_row_limit("SELECT a FROM t", 100),
            "SELECT /*+ FIRST_ROWS(100) */ a FROM t"
        );
        assert_eq!(
            dialect(DialectKind::Generic).apply_row_limit("SELECT a FROM t", 100),
            "SELECT a FROM t"
        );
    }

    #[test]
    fn key_generation_expressions() {
        assert_eq!(dialect(DialectKind::Sqlite).key_generation_expression("S"), None);
        assert_eq!(
            dialect(DialectKind::Oracle).key_generation_expression("S").as_deref(),
            Some("S.NEXTVAL")
        );
        assert_eq!(
            dialect(DialectKind::Postgresql)
                .key_generation_expression("S")
                .as_deref(),
            Some("nextval('S')")
        );
        assert_eq!(
            dialect(DialectKind::Db2).key_generation_expression("S").as_deref(),
            Some("NEXT VALUE FOR S")
        );
        assert!(dialect(DialectKind::Mssql).create_sequence("S").is_none());
        assert!(dialect(DialectKind::Oracle).create_sequence("S").is_some());
    }

    #[test]
    fn insert_returning_shapes() {
        let cols = ["A", "B"];
        assert_eq!(
            dialect(DialectKind::Sqlite).insert_returning("T", &cols, "VALUES (?,?)", "K"),
            "INSERT INTO T (A,B) VALUES (?,?) RETURNING K"
        );
        assert_eq!(
            dialect(DialectKind::Mssql).insert_returning("T", &cols, "VALUES (?,?)", "K"),
            "INSERT INTO T (A,B) OUTPUT INSERTED.K VALUES (?,?)"
        );
        assert_eq!(
            dialect(DialectKind::Mysql).insert_returning("T", &cols, "VALUES (?,?)", "K"),
            "INSERT INTO T (A,B) VALUES (?,?)"
        );
    }

    #[test]
    fn blob_locators_only_on_oracle() {
        let ora = dialect(DialectKind::Oracle);
        assert_eq!(ora.blob_handling(), BlobHandling::Locator);
        assert_eq!(ora.empty_blob_value(), Some("EMPTY_BLOB()"));
        assert!(ora.must_insert_empty_blob_before_data());
        let sqlite = dialect(DialectKind::Sqlite);
        assert!(!sqlite.must_insert_empty_blob_before_data());
        assert_eq!(sqlite.empty_blob_value(), None);
    }

    #[test]
    fn expiry_expressions() {
        assert_eq!(
            dialect(DialectKind::Sqlite).timestamp_after_days(30),
            "strftime('%Y-%m-%dT%H:%M:%fZ','now','+30 days')"
        );
        assert_eq!(
            dialect(DialectKind::Mssql).timestamp_after_days(7),
            "DATEADD(day, 7, CURRENT_TIMESTAMP)"
        );
    }

    #[test]
    fn lock_timeouts_are_recognised() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let sqlite = dialect(DialectKind::Sqlite);
        assert!(sqlite.is_lock_timeout(&busy));
        assert!(!sqlite.is_lock_timeout(&rusqlite::Error::QueryReturnedNoRows));
    }

    #[test]
    fn column_types() {
        assert_eq!(dialect(DialectKind::Oracle).text_column_type(100), "VARCHAR2(100)");
        assert_eq!(dialect(DialectKind::Sqlite).text_column_type(100), "TEXT");
        assert_eq!(dialect(DialectKind::Postgresql).blob_column_type(), "BYTEA");
        assert_eq!(dialect(DialectKind::Oracle).dummy_from(), " FROM DUAL");
        assert_eq!(dialect(DialectKind::Postgresql).dummy_from(), "");
    }
}
