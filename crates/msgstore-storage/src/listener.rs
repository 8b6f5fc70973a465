// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Status-column state machine shared by the table-backed queues.
//!
//! [`StatusMap`] translates between process states and status column values.
//! [`QueueQueries`] renders the claim, peek, and transition statements; it is
//! pure so the exact SQL can be printed and tested without a database.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use msgstore_core::{ProcessState, StateGraph, StorageKey, StoreError};
use rusqlite::types::Value;
use tracing::warn;

use crate::browser::{Selector, StatusFilter};
use crate::database::key_value;
use crate::dialect::Dialect;
use crate::schema::{Field, RecordSchema};

/// Status column value per process state.
///
/// AVAILABLE either has its own value or, when left empty, stands for every
/// non-null value not used by another known state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMap {
    values: BTreeMap<ProcessState, String>,
}

impl StatusMap {
    /// Builds the map, dropping states whose value is empty.
    pub fn new(values: &BTreeMap<ProcessState, String>) -> Self {
        Self {
            values: values
                .iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(s, v)| (*s, v.clone()))
                .collect(),
        }
    }

    pub fn available_is_complement(&self) -> bool {
        !self.values.contains_key(&ProcessState::Available)
    }

    /// States the queue can put rows into or find rows in. AVAILABLE is always known.
    pub fn known_states(&self) -> BTreeSet<ProcessState> {
        let mut known: BTreeSet<_> = self.values.keys().copied().collect();
        known.insert(ProcessState::Available);
        known
    }

    /// Value written when a row moves to `state`, if it can be written.
    pub fn value(&self, state: ProcessState) -> Option<&str> {
        self.values.get(&state).map(String::as_str)
    }

    /// Predicate selecting rows in `state`.
    pub fn filter(&self, state: ProcessState) -> Option<StatusFilter> {
        match self.values.get(&state) {
            Some(value) => Some(StatusFilter::Is(value.clone())),
            None if state == ProcessState::Available => Some(StatusFilter::NoneOf(
                self.values.values().cloned().collect(),
            )),
            None => None,
        }
    }

    pub fn decode(&self, raw: Option<&str>) -> Option<ProcessState> {
        let raw = raw?;
        self.values
            .iter()
            .find(|(_, v)| v.as_str() == raw)
            .map(|(s, _)| *s)
            .or_else(|| {
                self.available_is_complement()
                    .then_some(ProcessState::Available)
            })
    }

    /// `(a OR b ...)` over the filters of `states`, or `None` when no state has one.
    pub fn any_of(&self, states: &BTreeSet<ProcessState>, column: &str) -> Option<String> {
        let parts: Vec<String> = states
            .iter()
            .filter_map(|s| self.filter(*s))
            .map(|f| f.render(column))
            .collect();
        match parts.len() {
            0 => None,
            1 => parts.into_iter().next(),
            _ => Some(format!("({})", parts.join(" OR "))),
        }
    }
}

/// How `claim` takes a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimMode {
    /// Select only. The row is returned still AVAILABLE and the caller moves it.
    Optimistic,
    /// Select with row locking and move to INPROCESS in the same transaction.
    LockAndMark,
}

/// A rendered statement with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Everything needed to render the queue's statements.
#[derive(Debug, Clone)]
pub struct QueueQueries {
    schema: Arc<RecordSchema>,
    base: Selector,
    statuses: Arc<StatusMap>,
    graph: StateGraph,
    select_condition: Option<String>,
    order_field: Option<String>,
    timestamp_column: Option<String>,
}

impl QueueQueries {
    pub fn new(
        schema: Arc<RecordSchema>,
        base: Selector,
        statuses: Arc<StatusMap>,
        graph: &StateGraph,
    ) -> Self {
        let graph = graph.restrict_to(&statuses.known_states());
        Self {
            schema,
            base: Selector {
                status: None,
                select_condition: None,
                ..base
            },
            statuses,
            graph,
            select_condition: None,
            order_field: None,
            timestamp_column: None,
        }
    }

    pub fn with_select_condition(mut self, condition: Option<String>) -> Self {
        self.select_condition = condition.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn with_order_field(mut self, field: Option<String>) -> Self {
        self.order_field = field.filter(|f| !f.is_empty());
        self
    }

    pub fn with_timestamp_column(mut self, column: Option<String>) -> Self {
        self.timestamp_column = column.filter(|c| !c.is_empty());
        self
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    pub fn statuses(&self) -> &Arc<StatusMap> {
        &self.statuses
    }

    pub fn graph(&self) -> &StateGraph {
        &self.graph
    }

    pub fn base_selector(&self) -> &Selector {
        &self.base
    }

    pub fn select_condition(&self) -> Option<&str> {
        self.select_condition.as_deref()
    }

    /// Columns the select condition must not reference, because transitions rewrite them.
    pub fn condition_warnings(&self) -> Vec<String> {
        let Some(condition) = &self.select_condition else {
            return Vec::new();
        };
        let tokens: BTreeSet<String> = condition
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
            .filter(|t| !t.is_empty())
            .map(str::to_ascii_uppercase)
            .collect();
        [
            self.timestamp_column.as_deref(),
            self.schema.column(Field::Comment),
        ]
        .into_iter()
        .flatten()
        .filter(|col| tokens.contains(&col.to_ascii_uppercase()))
        .map(|col| {
            format!(
                "select_condition may not reference the timestamp or comment column. Found: [{col}]"
            )
        })
        .collect()
    }

    /// Logs every [`QueueQueries::condition_warnings`] entry.
    pub fn warn_on_condition(&self) {
        for warning in self.condition_warnings() {
            warn!(table = %self.schema.table(), "{warning}");
        }
    }

    /// Selector for rows in `state`, narrowed by the select condition.
    pub fn selector_for(&self, state: ProcessState) -> Option<Selector> {
        let status = self.statuses.filter(state)?;
        Some(Selector {
            status: Some(status),
            select_condition: self.select_condition.clone(),
            ..self.base.clone()
        })
    }

    /// Columns returned by a claim: metadata first, then the payload when configured.
    pub fn claim_columns(&self) -> (Vec<Field>, bool) {
        let fields = self
            .schema
            .metadata_columns()
            .into_iter()
            .map(|(f, _)| f)
            .collect();
        (fields, self.schema.has(Field::Payload))
    }

    /// Unlimited, unlocked claim select.
    pub fn select(&self) -> Result<Statement, StoreError> {
        let selector = self.selector_for(ProcessState::Available).ok_or_else(|| {
            StoreError::Config("AVAILABLE has no status condition".to_string())
        })?;
        let (clause, params) = selector.render(&self.schema, Some("t"));
        let (fields, with_payload) = self.claim_columns();
        let mut cols: Vec<String> = fields
            .iter()
            .filter_map(|f| self.schema.column(*f))
            .map(|c| format!("t.{c}"))
            .collect();
        if with_payload && let Some(payload) = self.schema.column(Field::Payload) {
            cols.push(format!("t.{payload}"));
        }
        let mut sql = format!(
            "SELECT {} FROM {} t WHERE {clause}",
            cols.join(","),
            self.schema.table()
        );
        if let Some(order) = &self.order_field {
            sql.push_str(&format!(" ORDER BY t.{order}"));
        }
        Ok(Statement { sql, params })
    }

    /// Cheap peek for an AVAILABLE row.
    pub fn peek(&self, dialect: &Dialect) -> Result<Statement, StoreError> {
        let Statement { sql, params } = self.select()?;
        Ok(Statement {
            sql: dialect.rewrite_for_peek(&sql),
            params,
        })
    }

    /// Claim select for one row, prepared for `mode`.
    pub fn claim(
        &self,
        dialect: &Dialect,
        mode: ClaimMode,
        lock_wait_secs: Option<u32>,
    ) -> Result<Statement, StoreError> {
        let Statement { sql, params } = self.select()?;
        let limited = dialect.apply_row_limit(&sql, 1);
        let sql = match mode {
            ClaimMode::Optimistic => dialect.rewrite_for_non_locking_read(&limited),
            ClaimMode::LockAndMark => dialect.rewrite_for_row_locking(&limited, lock_wait_secs)?,
        };
        Ok(Statement { sql, params })
    }

    /// Conditional update moving one row to `target`.
    ///
    /// Returns `None` when the move can never succeed: the target has no
    /// writable value or no known state leads to it.
    pub fn transition(
        &self,
        dialect: &Dialect,
        key: &StorageKey,
        target: ProcessState,
        comment: Option<Option<String>>,
        extra_assignments: &[String],
    ) -> Option<Statement> {
        let value = self.statuses.value(target)?;
        let status = self.schema.status();
        let prior = self
            .statuses
            .any_of(&self.graph.sources(target), status)?;

        let mut sets = vec![format!("{status}=?")];
        let mut params = vec![Value::Text(value.to_string())];
        if let Some(ts) = &self.timestamp_column {
            sets.push(format!("{ts}={}", dialect.sysdate()));
        }
        if let (Some(column), Some(comment)) = (self.schema.column(Field::Comment), comment) {
            sets.push(format!("{column}=?"));
            params.push(comment.map(Value::Text).unwrap_or(Value::Null));
        }
        sets.extend(extra_assignments.iter().cloned());
        params.push(Value::Text(value.to_string()));
        params.push(key_value(key));

        Some(Statement {
            sql: format!(
                "UPDATE {} SET {} WHERE {status}<>? AND {}=? AND {prior}",
                self.schema.table(),
                sets.join(","),
                self.schema.key()
            ),
            params,
        })
    }

    /// Conditional delete for a row currently in a state that may reach `target`.
    pub fn delete_on(&self, target: ProcessState) -> Option<String> {
        let prior = self
            .statuses
            .any_of(&self.graph.sources(target), self.schema.status())?;
        Some(format!(
            "DELETE FROM {} WHERE {}=? AND {prior}",
            self.schema.table(),
            self.schema.key()
        ))
    }
}

#[cfg(test)]
mod tests {
    use msgstore_core::StorageType;

    use super::*;
    use crate::dialect::{DialectKind, dialect};

    fn default_values() -> BTreeMap<ProcessState, String> {
        BTreeMap::from([
            (ProcessState::Available, "A".to_string()),
            (ProcessState::InProcess, "I".to_string()),
            (ProcessState::Done, "D".to_string()),
            (ProcessState::Error, "E".to_string()),
            (ProcessState::Hold, String::new()),
        ])
    }

    fn queries(values: &BTreeMap<ProcessState, String>) -> QueueQueries {
        let schema = Arc::new(
            RecordSchema::builder("Q")
                .disable(Field::Label)
                .disable(Field::Host)
                .disable(Field::Expiry)
                .disable(Field::StoreType)
                .disable(Field::Date)
                .disable(Field::SlotId)
                .disable(Field::Payload)
                .disable(Field::MessageId)
                .disable(Field::CorrelationId)
                .build()
                .unwrap(),
        );
        QueueQueries::new(
            schema,
            Selector::default(),
            Arc::new(StatusMap::new(values)),
            &StateGraph::default(),
        )
    }

    #[test]
    fn unknown_states_are_dropped() {
        let map = StatusMap::new(&default_values());
        assert!(!map.known_states().contains(&ProcessState::Hold));
        assert_eq!(map.value(ProcessState::Error), Some("E"));
        assert_eq!(map.decode(Some("I")), Some(ProcessState::InProcess));
        assert_eq!(map.decode(Some("X")), None);
        assert_eq!(map.decode(None), None);
    }

    #[test]
    fn complement_available() {
        let mut values = default_values();
        values.insert(ProcessState::Available, String::new());
        let map = StatusMap::new(&values);
        assert!(map.available_is_complement());
        assert!(map.known_states().contains(&ProcessState::Available));
        assert_eq!(map.value(ProcessState::Available), None);
        assert_eq!(
            map.filter(ProcessState::Available).unwrap().render("S"),
            "S NOT IN ('I','D','E')"
        );
        assert_eq!(map.decode(Some("new")), Some(ProcessState::Available));
        assert_eq!(map.decode(None), None);
    }

    #[test]
    fn select_and_peek_shapes() {
        let q = queries(&default_values()).with_order_field(Some("ORDRFLD".into()));
        let select = q.select().unwrap();
        assert_eq!(
            select.sql,
            "SELECT t.MESSAGE_KEY,t.COMMENTS,t.STATUS FROM Q t WHERE t.STATUS='A' ORDER BY t.ORDRFLD"
        );
        let peek = q.peek(dialect(DialectKind::Sqlite)).unwrap();
        assert!(peek.sql.ends_with("ORDER BY t.ORDRFLD LIMIT 1"));
    }

    #[test]
    fn select_condition_is_parenthesised() {
        let q = queries(&default_values()).with_select_condition(Some("t.TVARCHAR='x'".into()));
        assert!(
            q.select()
                .unwrap()
                .sql
                .ends_with("WHERE t.STATUS='A' AND (t.TVARCHAR='x')")
        );
    }

    #[test]
    fn claim_with_row_locking() {
        let q = queries(&default_values());
        let claim = q
            .claim(dialect(DialectKind::Postgresql), ClaimMode::LockAndMark, None)
            .unwrap();
        assert!(claim.sql.ends_with("LIMIT 1 FOR UPDATE SKIP LOCKED"));
        let claim = q
            .claim(dialect(DialectKind::Sqlite), ClaimMode::Optimistic, None)
            .unwrap();
        assert!(claim.sql.ends_with("WHERE t.STATUS='A' LIMIT 1"));
    }

    #[test]
    fn transition_shape() {
        let q = queries(&default_values()).with_timestamp_column(Some("TS".into()));
        let stmt = q
            .transition(
                dialect(DialectKind::Sqlite),
                &StorageKey::from(7),
                ProcessState::Error,
                Some(Some("boom".into())),
                &[],
            )
            .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE Q SET STATUS=?,TS=strftime('%Y-%m-%dT%H:%M:%fZ','now'),COMMENTS=? \
             WHERE STATUS<>? AND MESSAGE_KEY=? AND (STATUS='A' OR STATUS='I')"
        );
        assert_eq!(
            stmt.params,
            vec![
                Value::Text("E".into()),
                Value::Text("boom".into()),
                Value::Text("E".into()),
                Value::Integer(7)
            ]
        );
    }

    #[test]
    fn transition_without_comment_column_value() {
        let q = queries(&default_values());
        let stmt = q
            .transition(
                dialect(DialectKind::Sqlite),
                &StorageKey::from(1),
                ProcessState::Done,
                None,
                &["EXPIRY_DATE=NULL".to_string()],
            )
            .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE Q SET STATUS=?,EXPIRY_DATE=NULL WHERE STATUS<>? AND MESSAGE_KEY=? AND (STATUS='A' OR STATUS='I')"
        );
    }

    #[test]
    fn impossible_transitions_render_nothing() {
        let q = queries(&default_values());
        // HOLD has no value.
        assert!(
            q.transition(dialect(DialectKind::Sqlite), &StorageKey::from(1), ProcessState::Hold, None, &[])
                .is_none()
        );

        let mut values = default_values();
        values.insert(ProcessState::Available, String::new());
        let q = queries(&values);
        // A complement AVAILABLE cannot be written.
        assert!(
            q.transition(dialect(DialectKind::Sqlite), &StorageKey::from(1), ProcessState::Available, None, &[])
                .is_none()
        );
    }

    #[test]
    fn complement_available_as_prior_state() {
        let mut values = default_values();
        values.insert(ProcessState::Available, String::new());
        let q = queries(&values);
        let stmt = q
            .transition(dialect(DialectKind::Sqlite), &StorageKey::from(1), ProcessState::InProcess, None, &[])
            .unwrap();
        assert!(stmt.sql.ends_with("AND STATUS NOT IN ('I','D','E')"));
    }

    #[test]
    fn forbidden_columns_in_select_condition() {
        let q = queries(&default_values())
            .with_timestamp_column(Some("T_TIMESTAMP".into()))
            .with_select_condition(Some("t.T_TIMESTAMP IS NULL".into()));
        let warnings = q.condition_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Found: [T_TIMESTAMP]"));

        let q = queries(&default_values())
            .with_timestamp_column(Some("T_TIMESTAMP".into()))
            .with_select_condition(Some("COMMENTS2 IS NULL AND t.T_TIMESTAMP2 IS NULL".into()));
        assert!(q.condition_warnings().is_empty());
    }

    #[test]
    fn base_selector_keeps_slot_and_type() {
        let schema = Arc::new(RecordSchema::builder("Q").build().unwrap());
        let q = QueueQueries::new(
            schema,
            Selector {
                slot_id: Some("s1".into()),
                store_type: Some(StorageType::MessageStorage),
                status: Some(StatusFilter::Is("X".into())),
                select_condition: None,
            },
            Arc::new(StatusMap::new(&default_values())),
            &StateGraph::default(),
        );
        let error = q.selector_for(ProcessState::Error).unwrap();
        assert_eq!(error.slot_id.as_deref(), Some("s1"));
        assert_eq!(error.status, Some(StatusFilter::Is("E".into())));
        assert!(q.selector_for(ProcessState::Hold).is_none());
    }

    #[test]
    fn delete_on_done() {
        let q = queries(&default_values());
        assert_eq!(
            q.delete_on(ProcessState::Done).unwrap(),
            "DELETE FROM Q WHERE MESSAGE_KEY=? AND (STATUS='A' OR STATUS='I')"
        );
    }
}
