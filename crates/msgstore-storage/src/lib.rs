// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Table-backed message storage for msgstore.
//!
//! Provides the message browser, the transactional writer, the polling queue
//! with its status state machine, and the combined store/queue façade, all
//! over a single relational table accessed through `tokio-rusqlite`.

pub mod browse;
pub mod browser;
pub mod codec;
pub mod database;
pub mod dialect;
pub mod listener;
pub mod message_store_queue;
pub mod registry;
pub mod schema;
pub mod storage;
pub mod table_queue;
pub mod worker;

#[cfg(test)]
mod testing;

pub use browser::{BrowserOptions, MessageRecordStore, PayloadFormat, Selector, StatusFilter};
pub use database::Database;
pub use dialect::{Dialect, DialectKind};
pub use listener::{ClaimMode, QueueQueries, StatusMap};
pub use message_store_queue::MessageStoreQueue;
pub use registry::{CheckReport, StoreRegistry};
pub use schema::{Field, RecordSchema};
pub use storage::{StoreSettings, TransactionalMessageStore};
pub use table_queue::{QueueSettings, TableBackedQueue};
pub use worker::{MessageHandler, PollingConsumer};
