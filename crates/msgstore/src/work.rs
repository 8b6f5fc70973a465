// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `msgstore work` command implementation.
//!
//! Runs one or more [`PollingConsumer`]s over the configured queue until
//! SIGINT or SIGTERM. Messages are either printed or piped into a shell
//! command; a non-zero exit moves the message to ERROR.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use msgstore_config::model::MsgstoreConfig;
use msgstore_core::{MessageRecord, PluginAdapter, StoreError};
use msgstore_storage::storage::payload_text;
use msgstore_storage::worker::{ConsumerStats, HandlerError};
use msgstore_storage::{MessageHandler, MessageStoreQueue, PollingConsumer};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::commands::open_queue;
use crate::shutdown::install_signal_handler;

/// Prints each message to stdout.
pub struct PrintHandler;

#[async_trait]
impl MessageHandler for PrintHandler {
    async fn handle(&self, record: &MessageRecord) -> Result<(), HandlerError> {
        println!("{}\t{}", record.key(), payload_text(record.payload.as_ref()));
        Ok(())
    }
}

/// Pipes each payload into `sh -c <command>`.
///
/// The message key and ids are exported as `MSGSTORE_KEY`,
/// `MSGSTORE_MESSAGE_ID` and `MSGSTORE_CORRELATION_ID`.
pub struct ExecHandler {
    command: String,
}

impl ExecHandler {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for ExecHandler {
    async fn handle(&self, record: &MessageRecord) -> Result<(), HandlerError> {
        let m = &record.metadata;
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("MSGSTORE_KEY", m.key.as_str())
            .env("MSGSTORE_MESSAGE_ID", m.message_id.as_deref().unwrap_or_default())
            .env(
                "MSGSTORE_CORRELATION_ID",
                m.correlation_id.as_deref().unwrap_or_default(),
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = payload_text(record.payload.as_ref());
            match stdin.write_all(payload.as_bytes()).await {
                // The command may exit without reading its input.
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e.into()),
                _ => {}
            }
        }
        let output = child.wait_with_output().await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        Err(if stderr.is_empty() {
            format!("command exited with {}", output.status).into()
        } else {
            format!("command exited with {}: {stderr}", output.status).into()
        })
    }
}

/// Run the `msgstore work` command.
pub async fn run_work(
    config: &MsgstoreConfig,
    exec: Option<String>,
    interval_ms: Option<u64>,
    workers: usize,
) -> Result<(), StoreError> {
    let queue = Arc::new(open_queue(config).await?);
    let handler: Arc<dyn MessageHandler> = match exec {
        Some(command) => Arc::new(ExecHandler::new(command)),
        None => Arc::new(PrintHandler),
    };
    let interval = Duration::from_millis(interval_ms.unwrap_or(config.queue.poll_interval_ms));
    let cancel = install_signal_handler();

    let stats = run_workers(queue.clone(), handler, interval, workers.max(1), cancel).await;
    queue.shutdown().await?;
    let stats = stats?;
    println!(
        "processed {} message(s): {} done, {} failed, {} lost",
        stats.done + stats.failed,
        stats.done,
        stats.failed,
        stats.lost
    );
    Ok(())
}

/// Runs `workers` consumers until `cancel` fires, summing their stats.
///
/// A fatal error in one worker cancels the others and is returned.
pub async fn run_workers(
    queue: Arc<MessageStoreQueue>,
    handler: Arc<dyn MessageHandler>,
    interval: Duration,
    workers: usize,
    cancel: CancellationToken,
) -> Result<ConsumerStats, StoreError> {
    info!(workers, interval_ms = interval.as_millis() as u64, "starting workers");
    let mut tasks = Vec::with_capacity(workers);
    for _ in 0..workers {
        let consumer =
            PollingConsumer::new(queue.clone(), handler.clone(), interval, cancel.clone());
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let result = consumer.run().await;
            if result.is_err() {
                cancel.cancel();
            }
            result
        }));
    }

    let mut total = ConsumerStats::default();
    let mut failure = None;
    for task in tasks {
        match task.await {
            Ok(Ok(stats)) => {
                total.done += stats.done;
                total.failed += stats.failed;
                total.lost += stats.lost;
            }
            Ok(Err(e)) => {
                failure.get_or_insert(e);
            }
            Err(e) => {
                error!(error = %e, "worker task panicked");
                failure.get_or_insert(StoreError::Internal(format!("worker task failed: {e}")));
            }
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(total),
    }
}
