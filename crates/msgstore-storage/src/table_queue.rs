// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Polling queue over a table with a status column.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use msgstore_config::model::MsgstoreConfig;
use msgstore_core::{
    MessageBrowser, MessageRecord, Metadata, ProcessState, ProcessStateQueue, StateGraph,
    StorageKey, StoreError,
};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, TransactionBehavior};
use tracing::debug;

use crate::browser::{BrowserOptions, MessageRecordStore, Selector, read_metadata};
use crate::database::{Database, Deadline};
use crate::dialect::Dialect;
use crate::listener::{ClaimMode, QueueQueries, Statement, StatusMap};
use crate::schema::{Field, MAX_COMMENT_LEN, RecordSchema, truncate};

/// Claim behaviour of a [`TableBackedQueue`].
#[derive(Debug, Clone, Default)]
pub struct QueueSettings {
    /// Interrupt claims and peeks running longer than this.
    pub claim_timeout: Option<Duration>,
    pub lock_wait_secs: Option<u32>,
    /// Select and mark INPROCESS in one write transaction even without skip-locked.
    pub claim_in_transaction: bool,
}

impl QueueSettings {
    pub fn from_config(config: &MsgstoreConfig) -> Self {
        Self {
            claim_timeout: config.queue.claim_timeout_ms.map(Duration::from_millis),
            lock_wait_secs: config.queue.lock_wait_secs,
            claim_in_transaction: config.queue.claim_in_transaction,
        }
    }
}

/// Builds the transition graph from `queue.transitions`, or the default one.
pub fn graph_from_config(config: &MsgstoreConfig) -> StateGraph {
    match &config.queue.transitions {
        Some(transitions) => {
            let mut graph = StateGraph::empty();
            for (from, targets) in transitions {
                graph.allow(*from, targets);
            }
            graph
        }
        None => StateGraph::default(),
    }
}

type ClaimedRow = (Metadata, Option<Value>);

/// [`ProcessStateQueue`] bound to one table.
#[derive(Debug, Clone)]
pub struct TableBackedQueue {
    browser: MessageRecordStore,
    queries: Arc<QueueQueries>,
    settings: QueueSettings,
}

impl TableBackedQueue {
    /// Queue over the rows `browser` sees. `queries` must use the same schema.
    pub fn new(browser: MessageRecordStore, queries: QueueQueries, settings: QueueSettings) -> Self {
        queries.warn_on_condition();
        let browser = browser.with_status_map(queries.statuses().clone());
        Self {
            browser,
            queries: Arc::new(queries),
            settings,
        }
    }

    /// Queue over the configured table and slot.
    ///
    /// `envelope` says whether blob payloads are envelopes written by a
    /// message store or raw bytes written by another producer.
    pub fn from_config(
        db: Database,
        schema: Arc<RecordSchema>,
        config: &MsgstoreConfig,
        envelope: bool,
    ) -> Self {
        let selector = selector_from_config(config);
        let options = BrowserOptions::from_config(&config.storage, config.queue.payload_kind, envelope);
        let queries = queries_from_config(schema.clone(), selector.clone(), config);
        let browser = MessageRecordStore::new(db, schema, selector, options);
        Self::new(browser, queries, QueueSettings::from_config(config))
    }

    pub fn queries(&self) -> &QueueQueries {
        &self.queries
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Browser over every row of the queue regardless of state.
    pub fn records(&self) -> &MessageRecordStore {
        &self.browser
    }

    fn database(&self) -> &Database {
        self.browser.database()
    }

    /// Whether `claim` marks rows INPROCESS itself.
    pub fn claim_mode(&self) -> ClaimMode {
        let wants_lock = self.database().dialect().skip_locked_supported()
            || self.settings.claim_in_transaction;
        let can_mark = self.queries.statuses().value(ProcessState::InProcess).is_some()
            && self
                .queries
                .graph()
                .allows(ProcessState::Available, ProcessState::InProcess);
        if wants_lock && can_mark {
            ClaimMode::LockAndMark
        } else {
            ClaimMode::Optimistic
        }
    }

    /// Runs a rendered transition; `false` when it cannot apply or matched no row.
    pub async fn transition(
        &self,
        key: &StorageKey,
        target: ProcessState,
        comment: Option<Option<String>>,
        extra_assignments: &[String],
    ) -> Result<bool, StoreError> {
        let Some(update) = self.queries.transition(
            self.database().dialect(),
            key,
            target,
            comment,
            extra_assignments,
        ) else {
            debug!(key = %key, target = %target, "transition not possible in this queue");
            return Ok(false);
        };
        debug!(sql = %update.sql, "changing state");
        let changed = self
            .database()
            .call(move |conn| conn.execute(&update.sql, rusqlite::params_from_iter(update.params)))
            .await?;
        debug!(key = %key, target = %target, changed = changed > 0, "state change");
        Ok(changed > 0)
    }

    /// Deletes the row if it is in a state that may move to `target`.
    pub async fn delete_on(&self, key: &StorageKey, target: ProcessState) -> Result<bool, StoreError> {
        let Some(sql) = self.queries.delete_on(target) else {
            return Ok(false);
        };
        let params = vec![crate::database::key_value(key)];
        let deleted = self
            .database()
            .call(move |conn| conn.execute(&sql, rusqlite::params_from_iter(params)))
            .await?;
        debug!(key = %key, target = %target, deleted = deleted > 0, "row removed on transition");
        Ok(deleted > 0)
    }
}

/// Rows of the configured slot and storage type.
pub fn selector_from_config(config: &MsgstoreConfig) -> Selector {
    Selector {
        slot_id: Some(config.storage.slot_id.clone()).filter(|s| !s.is_empty()),
        store_type: Some(config.storage.store_type),
        ..Selector::default()
    }
}

/// Statement renderer for the configured queue over the rows `selector` picks.
pub fn queries_from_config(
    schema: Arc<RecordSchema>,
    selector: Selector,
    config: &MsgstoreConfig,
) -> QueueQueries {
    let statuses = Arc::new(StatusMap::new(&config.queue.status));
    let order_field = config
        .queue
        .order_field
        .clone()
        .or_else(|| schema.column(Field::Date).map(str::to_string));
    QueueQueries::new(schema, selector, statuses, &graph_from_config(config))
        .with_select_condition(config.queue.select_condition.clone())
        .with_order_field(order_field)
        .with_timestamp_column(config.queue.timestamp_column.clone())
}

fn select_one(
    conn: &rusqlite::Connection,
    statement: &Statement,
    fields: &[Field],
    with_payload: bool,
    statuses: &StatusMap,
) -> rusqlite::Result<Option<ClaimedRow>> {
    conn.query_row(
        &statement.sql,
        rusqlite::params_from_iter(statement.params.iter()),
        |row| {
            let metadata = read_metadata(row, fields, Some(statuses))?;
            let payload = if with_payload {
                Some(row.get::<_, Value>(fields.len())?)
            } else {
                None
            };
            Ok((metadata, payload))
        },
    )
    .optional()
}

/// Selects one row and marks it INPROCESS in a single write transaction.
fn claim_and_mark(
    conn: &mut rusqlite::Connection,
    select: &Statement,
    fields: &[Field],
    with_payload: bool,
    queries: &QueueQueries,
    dialect: &Dialect,
    deadline: Deadline,
) -> rusqlite::Result<Option<ClaimedRow>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let Some((mut metadata, payload)) =
        select_one(&tx, select, fields, with_payload, queries.statuses())?
    else {
        return Ok(None);
    };
    let Some(mark) = queries.transition(dialect, &metadata.key, ProcessState::InProcess, None, &[])
    else {
        return Ok(None);
    };
    if tx.execute(&mark.sql, rusqlite::params_from_iter(mark.params))? == 0 {
        return Ok(None);
    }
    // A claim that outlived its timeout reports Timeout, so it must not keep the row.
    deadline.check()?;
    tx.commit()?;
    metadata.status = Some(ProcessState::InProcess);
    Ok(Some((metadata, payload)))
}

#[async_trait]
impl ProcessStateQueue for TableBackedQueue {
    fn known_states(&self) -> BTreeSet<ProcessState> {
        self.queries.statuses().known_states()
    }

    fn target_states(&self, from: ProcessState) -> BTreeSet<ProcessState> {
        self.queries.graph().targets(from)
    }

    async fn has_available(&self) -> Result<bool, StoreError> {
        let peek = self.queries.peek(self.database().dialect())?;
        self.database()
            .call_with_timeout(self.settings.claim_timeout, move |conn| {
                conn.query_row(&peek.sql, rusqlite::params_from_iter(peek.params), |_| Ok(()))
                    .optional()
                    .map(|row| row.is_some())
            })
            .await
    }

    async fn claim(&self) -> Result<Option<MessageRecord>, StoreError> {
        let dialect = self.database().dialect();
        let mode = self.claim_mode();
        let select = self
            .queries
            .claim(dialect, mode, self.settings.lock_wait_secs)?;
        debug!(sql = %select.sql, mode = ?mode, "claiming");
        let (fields, with_payload) = self.queries.claim_columns();
        let queries = self.queries.clone();

        let claimed = self
            .database()
            .call_with_deadline(self.settings.claim_timeout, move |conn, deadline| {
                let statuses = queries.statuses();
                let attempt = match mode {
                    ClaimMode::Optimistic => select_one(conn, &select, &fields, with_payload, statuses),
                    ClaimMode::LockAndMark => claim_and_mark(
                        conn,
                        &select,
                        &fields,
                        with_payload,
                        &queries,
                        dialect,
                        deadline,
                    ),
                };
                match attempt {
                    Err(e)
                        if !dialect.skip_locked_supported()
                            && dialect.is_lock_timeout(&e)
                            && !deadline.cut_short(&e) =>
                    {
                        debug!(reason = %e, "claim lost a lock race");
                        Ok(None)
                    }
                    other => other,
                }
            })
            .await?;

        let Some((metadata, cell)) = claimed else {
            return Ok(None);
        };
        let (payload, context) = match cell {
            Some(value) => self.browser.options().payload.decode(value)?,
            None => (None, Default::default()),
        };
        debug!(key = %metadata.key, "claimed");
        Ok(Some(MessageRecord {
            metadata,
            payload,
            context,
        }))
    }

    async fn change_state(
        &self,
        key: &StorageKey,
        target: ProcessState,
        reason: Option<&str>,
    ) -> Result<bool, StoreError> {
        let comment = Some(reason.map(|r| truncate(r, MAX_COMMENT_LEN)));
        self.transition(key, target, comment, &[]).await
    }

    fn browser(&self, state: ProcessState) -> Result<Box<dyn MessageBrowser>, StoreError> {
        let status = self.queries.statuses().filter(state).ok_or_else(|| {
            StoreError::Config(format!("state {state} has no status value in this queue"))
        })?;
        let condition = self.queries.select_condition().map(str::to_string);
        Ok(Box::new(self.browser.scoped(status, condition)))
    }
}
