// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait definitions for message-store components.
//!
//! All traits use `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod browser;
pub mod queue;
pub mod storage;

pub use adapter::PluginAdapter;
pub use browser::MessageBrowser;
pub use queue::ProcessStateQueue;
pub use storage::TransactionalStorage;
