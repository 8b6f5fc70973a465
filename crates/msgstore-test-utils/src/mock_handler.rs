// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted message handler for consumer tests.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use msgstore_core::MessageRecord;
use msgstore_storage::worker::{HandlerError, MessageHandler};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Records the payload text of every message it handles.
///
/// Messages whose payload is in the failure set are rejected. When a stop
/// count is set, the token is cancelled once that many messages were seen.
pub struct MockHandler {
    seen: Arc<Mutex<Vec<String>>>,
    fail_on: HashSet<String>,
    stop_after: Option<(usize, CancellationToken)>,
}

impl MockHandler {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
            fail_on: HashSet::new(),
            stop_after: None,
        }
    }

    /// Reject messages with this payload.
    pub fn failing_on(mut self, payload: impl Into<String>) -> Self {
        self.fail_on.insert(payload.into());
        self
    }

    pub fn stop_after(mut self, count: usize, cancel: CancellationToken) -> Self {
        self.stop_after = Some((count, cancel));
        self
    }

    /// Payloads handled so far, in order.
    pub async fn seen(&self) -> Vec<String> {
        self.seen.lock().await.clone()
    }
}

impl Default for MockHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageHandler for MockHandler {
    async fn handle(&self, record: &MessageRecord) -> Result<(), HandlerError> {
        let text = record
            .payload
            .as_ref()
            .map(|p| p.as_text().into_owned())
            .unwrap_or_default();
        let count = {
            let mut seen = self.seen.lock().await;
            seen.push(text.clone());
            seen.len()
        };
        if let Some((limit, cancel)) = &self.stop_after
            && count >= *limit
        {
            cancel.cancel();
        }
        if self.fail_on.contains(&text) {
            return Err(format!("rejected payload {text}").into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use msgstore_core::{Metadata, Payload, StorageKey};

    use super::*;

    fn record(text: &str) -> MessageRecord {
        MessageRecord {
            metadata: Metadata::new(StorageKey::from(1)),
            payload: Some(Payload::from(text)),
            context: Default::default(),
        }
    }

    #[tokio::test]
    async fn records_and_fails_as_scripted() {
        let cancel = CancellationToken::new();
        let handler = MockHandler::new()
            .failing_on("bad")
            .stop_after(2, cancel.clone());

        handler.handle(&record("good")).await.unwrap();
        assert!(!cancel.is_cancelled());
        let err = handler.handle(&record("bad")).await.unwrap_err();
        assert_eq!(err.to_string(), "rejected payload bad");
        assert!(cancel.is_cancelled());
        assert_eq!(handler.seen().await, vec!["good", "bad"]);
    }
}
