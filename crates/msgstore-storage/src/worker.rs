// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reference poll loop for queue consumers.
//!
//! Each worker peeks, claims one row, marks it INPROCESS, hands it to a
//! [`MessageHandler`], and finally moves it to DONE or ERROR. Several workers
//! may poll the same queue; the conditional updates decide who wins a row.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use msgstore_core::{MessageRecord, ProcessState, ProcessStateQueue, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::schema::{MAX_COMMENT_LEN, truncate};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes one claimed message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, record: &MessageRecord) -> Result<(), HandlerError>;
}

/// Result of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing was available.
    Idle,
    /// Another worker moved the row first.
    Lost,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub done: u64,
    pub failed: u64,
    pub lost: u64,
}

pub struct PollingConsumer<Q: ?Sized, H: ?Sized> {
    queue: Arc<Q>,
    handler: Arc<H>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl<Q, H> PollingConsumer<Q, H>
where
    Q: ProcessStateQueue + ?Sized,
    H: MessageHandler + ?Sized,
{
    pub fn new(
        queue: Arc<Q>,
        handler: Arc<H>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            handler,
            poll_interval,
            cancel,
        }
    }

    /// Polls until cancelled or a non-transient error occurs.
    pub async fn run(&self) -> Result<ConsumerStats, StoreError> {
        let mut stats = ConsumerStats::default();
        info!(interval_ms = self.poll_interval.as_millis() as u64, "consumer started");
        while !self.cancel.is_cancelled() {
            match self.poll_once().await {
                Ok(PollOutcome::Done) => stats.done += 1,
                Ok(PollOutcome::Failed) => stats.failed += 1,
                Ok(PollOutcome::Lost) => stats.lost += 1,
                Ok(PollOutcome::Idle) => self.pause().await,
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "poll failed, retrying after the poll interval");
                    self.pause().await;
                }
                Err(e) => {
                    error!(error = %e, code = e.code(), "consumer stopped");
                    return Err(e);
                }
            }
        }
        info!(
            done = stats.done,
            failed = stats.failed,
            lost = stats.lost,
            "consumer stopped"
        );
        Ok(stats)
    }

    async fn pause(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(self.poll_interval) => {}
        }
    }

    /// Takes and processes at most one message.
    pub async fn poll_once(&self) -> Result<PollOutcome, StoreError> {
        if !self.queue.has_available().await? {
            return Ok(PollOutcome::Idle);
        }
        let Some(record) = self.queue.claim().await? else {
            return Ok(PollOutcome::Idle);
        };
        let key = record.key().clone();

        let tracks_in_process = self.queue.known_states().contains(&ProcessState::InProcess);
        if tracks_in_process
            && record.metadata.status != Some(ProcessState::InProcess)
            && !self
                .queue
                .change_state(&key, ProcessState::InProcess, None)
                .await?
        {
            debug!(key = %key, "row taken by another worker");
            return Ok(PollOutcome::Lost);
        }

        match self.handler.handle(&record).await {
            Ok(()) => {
                if !self.queue.change_state(&key, ProcessState::Done, None).await? {
                    warn!(key = %key, "processed message could not be moved to DONE");
                }
                debug!(key = %key, "message processed");
                Ok(PollOutcome::Done)
            }
            Err(e) => {
                let reason = truncate(&e.to_string(), MAX_COMMENT_LEN);
                warn!(key = %key, error = %reason, "message processing failed");
                if !self
                    .queue
                    .change_state(&key, ProcessState::Error, Some(&reason))
                    .await?
                {
                    warn!(key = %key, "failed message could not be moved to ERROR");
                }
                Ok(PollOutcome::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use msgstore_core::{MessageBrowser, NewMessage, TransactionalStorage};

    use super::*;
    use crate::message_store_queue::MessageStoreQueue;
    use crate::registry::StoreRegistry;
    use crate::testing;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        stop_after: usize,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, record: &MessageRecord) -> Result<(), HandlerError> {
            let text = record
                .payload
                .as_ref()
                .map(|p| p.as_text().into_owned())
                .unwrap_or_default();
            let count = {
                let mut seen = self.seen.lock().unwrap();
                seen.push(text.clone());
                seen.len()
            };
            if count >= self.stop_after {
                self.cancel.cancel();
            }
            if text.starts_with("bad") {
                return Err(format!("cannot handle {text}").into());
            }
            Ok(())
        }
    }

    async fn queue(dir: &tempfile::TempDir) -> Arc<MessageStoreQueue> {
        let config = testing::config(dir);
        Arc::new(
            MessageStoreQueue::open(&config, &StoreRegistry::new())
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn poll_once_moves_to_done_or_error() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue(&dir).await;
        let handler = Arc::new(Recorder {
            stop_after: usize::MAX,
            ..Default::default()
        });
        let consumer = PollingConsumer::new(
            queue.clone(),
            handler.clone(),
            Duration::from_millis(10),
            CancellationToken::new(),
        );
        assert_eq!(consumer.poll_once().await.unwrap(), PollOutcome::Idle);

        queue.store(NewMessage::new("m-1", "c", "good")).await.unwrap();
        queue.store(NewMessage::new("m-2", "c", "bad one")).await.unwrap();

        let mut outcomes = vec![
            consumer.poll_once().await.unwrap(),
            consumer.poll_once().await.unwrap(),
        ];
        outcomes.sort_by_key(|o| *o as u8);
        assert_eq!(outcomes, vec![PollOutcome::Done, PollOutcome::Failed]);
        assert_eq!(consumer.poll_once().await.unwrap(), PollOutcome::Idle);

        let errors = queue.browser(ProcessState::Error).unwrap();
        assert_eq!(errors.count().await.unwrap(), 1);
        let failed = errors
            .iterate(None, None, msgstore_core::SortOrder::None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(failed[0].comment.as_deref(), Some("cannot handle bad one"));
        assert_eq!(
            queue.browser(ProcessState::Done).unwrap().count().await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue(&dir).await;
        for n in 0..3 {
            queue
                .store(NewMessage::new(format!("m-{n}"), "c", format!("msg {n}")))
                .await
                .unwrap();
        }
        let cancel = CancellationToken::new();
        let handler = Arc::new(Recorder {
            stop_after: 3,
            cancel: cancel.clone(),
            ..Default::default()
        });
        let consumer =
            PollingConsumer::new(queue.clone(), handler.clone(), Duration::from_millis(10), cancel);

        let stats = tokio::time::timeout(Duration::from_secs(10), consumer.run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.done, 3);
        assert_eq!(handler.seen.lock().unwrap().len(), 3);
        assert!(!queue.has_available().await.unwrap());
    }

    #[tokio::test]
    async fn idle_consumer_exits_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue(&dir).await;
        let cancel = CancellationToken::new();
        let consumer = PollingConsumer::new(
            queue,
            Arc::new(Recorder::default()),
            Duration::from_secs(60),
            cancel.clone(),
        );
        let run = tokio::spawn(async move { consumer.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let stats = run.await.unwrap().unwrap();
        assert_eq!(stats, ConsumerStats::default());
    }
}
