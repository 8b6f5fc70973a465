// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the msgstore message store.
//!
//! This crate provides the trait definitions, error taxonomy, and common
//! types shared by the storage engine, the configuration layer, and the
//! command-line tool.

pub mod cursor;
pub mod error;
pub mod state;
pub mod traits;
pub mod types;

pub use cursor::MetadataCursor;
pub use error::StoreError;
pub use state::StateGraph;
pub use types::{
    AdapterType, HealthStatus, MessageFilter, MessageRecord, Metadata, NewMessage, Page,
    Payload, ProcessState, SortOrder, StorageKey, StorageType, StoreOutcome,
};

pub use traits::{MessageBrowser, PluginAdapter, ProcessStateQueue, TransactionalStorage};
