// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for msgstore integration tests.
//!
//! Provides a temp-database harness and a scripted message handler for fast,
//! deterministic tests of stores, queues, and consumers.
//!
//! # Components
//!
//! - [`TestHarness`] - Configured [`msgstore_storage::MessageStoreQueue`] over a temp database
//! - [`MockHandler`] - Message handler that records payloads and fails on request

pub mod harness;
pub mod mock_handler;

pub use harness::TestHarness;
pub use mock_handler::MockHandler;
