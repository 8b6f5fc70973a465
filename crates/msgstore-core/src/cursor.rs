// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-pass, scoped metadata cursor.
//!
//! A cursor is fed by a producer task that owns the database connection and
//! the open statement. The producer stops as soon as the receiving side is
//! closed or dropped, which releases the statement and the connection. A
//! cursor that is abandoned half-way therefore never leaks a connection.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::types::Metadata;

/// Number of rows a producer may read ahead of the consumer.
pub const CURSOR_BUFFER: usize = 16;

pub type CursorItem = Result<Metadata, StoreError>;

/// Lazy, single-pass sequence of [`Metadata`]. Not restartable.
pub struct MetadataCursor {
    rx: mpsc::Receiver<CursorItem>,
    producer: Option<JoinHandle<()>>,
}

impl MetadataCursor {
    /// Creates the channel a producer writes into.
    pub fn channel() -> (mpsc::Sender<CursorItem>, mpsc::Receiver<CursorItem>) {
        mpsc::channel(CURSOR_BUFFER)
    }

    pub fn new(rx: mpsc::Receiver<CursorItem>, producer: JoinHandle<()>) -> Self {
        Self {
            rx,
            producer: Some(producer),
        }
    }

    /// A cursor that yields nothing.
    pub fn empty() -> Self {
        let (_tx, rx) = Self::channel();
        Self { rx, producer: None }
    }

    /// Returns the next item, or `None` once the producer is exhausted.
    pub async fn next(&mut self) -> Option<CursorItem> {
        self.rx.recv().await
    }

    /// Stops the producer and waits for it to release its connection.
    pub async fn close(mut self) -> Result<(), StoreError> {
        self.rx.close();
        while self.rx.recv().await.is_some() {}
        if let Some(producer) = self.producer.take() {
            producer
                .await
                .map_err(|e| StoreError::Internal(format!("cursor producer failed: {e}")))?;
        }
        Ok(())
    }

    /// Drains the cursor, stopping at the first error.
    pub async fn try_collect(mut self) -> Result<Vec<Metadata>, StoreError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        self.close().await?;
        Ok(items)
    }
}

impl Stream for MetadataCursor {
    type Item = CursorItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for MetadataCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCursor")
            .field("open", &self.producer.is_some())
            .finish()
    }
}
