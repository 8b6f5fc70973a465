// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transactional message storage.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::traits::browser::MessageBrowser;
use crate::types::{NewMessage, StoreOutcome};

/// A browser that can also persist new messages.
#[async_trait]
pub trait TransactionalStorage: MessageBrowser {
    /// Persists a message in its own short transaction.
    ///
    /// With duplicate detection enabled, an existing message with the same
    /// message id in the same slot is returned as
    /// [`StoreOutcome::Duplicate`] and nothing is written.
    async fn store(&self, message: NewMessage) -> Result<StoreOutcome, StoreError>;
}
