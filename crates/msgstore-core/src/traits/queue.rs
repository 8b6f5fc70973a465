// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Polling consumer contract over process states.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::traits::browser::MessageBrowser;
use crate::types::{MessageRecord, ProcessState, StorageKey};

/// The at-most-once hand-off primitive.
///
/// A consumer calls [`claim`](Self::claim) and, when the returned record is
/// still [`ProcessState::Available`], immediately moves it to
/// [`ProcessState::InProcess`] with [`change_state`](Self::change_state).
/// Only one of several racing consumers sees `true` from that call.
#[async_trait]
pub trait ProcessStateQueue: Send + Sync {
    /// States this queue can recognise in its status column.
    fn known_states(&self) -> BTreeSet<ProcessState>;

    /// States a row may move to from `from`.
    fn target_states(&self, from: ProcessState) -> BTreeSet<ProcessState>;

    /// Cheap unlocked peek for available rows.
    async fn has_available(&self) -> Result<bool, StoreError>;

    /// Selects at most one available row.
    ///
    /// The returned record carries its status: `InProcess` when the claim
    /// was completed inside the same transaction, `Available` when the
    /// caller still has to move it.
    async fn claim(&self) -> Result<Option<MessageRecord>, StoreError>;

    /// Moves a row to `target`, recording `reason` in the comment column.
    ///
    /// Returns `false` when the transition is not declared, the target is
    /// unknown, or the row no longer has an expected prior status.
    async fn change_state(
        &self,
        key: &StorageKey,
        target: ProcessState,
        reason: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// A browser scoped to rows currently in `state`.
    fn browser(&self, state: ProcessState) -> Result<Box<dyn MessageBrowser>, StoreError>;
}
