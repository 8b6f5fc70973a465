// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! msgstore - table-backed message store and polling queue.
//!
//! This is the binary entry point: producer, consumer and management
//! commands over the configured table.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod check;
mod commands;
mod shutdown;
mod sql;
mod work;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use msgstore_config::model::MsgstoreConfig;
use msgstore_core::{ProcessState, SortOrder, StoreError};

/// msgstore - table-backed message store and polling queue.
#[derive(Parser, Debug)]
#[command(name = "msgstore", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the message table, sequence and index.
    Init,
    /// Check configuration, database and table layout.
    Check {
        /// Also check integrity and the age of the oldest AVAILABLE row.
        #[arg(long)]
        deep: bool,
        /// Disable colored output.
        #[arg(long)]
        plain: bool,
    },
    /// Store a message. The payload is read from stdin when not given.
    Store {
        message_id: String,
        correlation_id: String,
        payload: Option<String>,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long)]
        label: Option<String>,
    },
    /// Claim the oldest available message and mark it INPROCESS.
    Claim {
        /// Only report whether a message is available.
        #[arg(long)]
        peek: bool,
    },
    /// List stored messages.
    Browse {
        /// Only rows in this state.
        #[arg(long)]
        state: Option<ProcessState>,
        /// Inclusive lower bound on the insert date (RFC 3339).
        #[arg(long)]
        from: Option<String>,
        /// Exclusive upper bound on the insert date (RFC 3339).
        #[arg(long)]
        to: Option<String>,
        #[arg(long, default_value = "none")]
        order: SortOrder,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long)]
        max: Option<usize>,
        #[arg(long)]
        message_id: Option<String>,
        #[arg(long)]
        correlation_id: Option<String>,
        /// Case-insensitive substring of the comment.
        #[arg(long)]
        comment: Option<String>,
        #[arg(long)]
        label: Option<String>,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Show one message with its payload.
    Show {
        key: String,
        #[arg(long)]
        json: bool,
    },
    /// Move a message to another state.
    Move {
        key: String,
        state: ProcessState,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Delete a message.
    Delete { key: String },
    /// Count stored messages.
    Count {
        #[arg(long)]
        state: Option<ProcessState>,
    },
    /// Consume messages until interrupted.
    Work {
        /// Run this shell command per message with the payload on stdin.
        #[arg(long)]
        exec: Option<String>,
        /// Poll interval in milliseconds; defaults to `queue.poll_interval_ms`.
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Number of concurrent workers.
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },
    /// Print the statements used for a dialect.
    Sql {
        /// Dialect name; defaults to `database.dialect`.
        #[arg(long)]
        dialect: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => msgstore_config::load_and_validate_path(path),
        None => msgstore_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            msgstore_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.log_level);

    let result = match cli.command {
        Some(command) => run(command, config).await,
        None => {
            println!("msgstore: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("msgstore: error [{}]: {e}", e.code());
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: MsgstoreConfig) -> Result<(), StoreError> {
    match command {
        Commands::Init => commands::run_init(&config).await,
        Commands::Check { deep, plain } => check::run_check(&config, deep, plain).await,
        Commands::Store {
            message_id,
            correlation_id,
            payload,
            comment,
            label,
        } => {
            commands::run_store(
                &config,
                commands::StoreArgs {
                    message_id,
                    correlation_id,
                    payload,
                    comment,
                    label,
                },
            )
            .await
        }
        Commands::Claim { peek } => commands::run_claim(&config, peek).await,
        Commands::Browse {
            state,
            from,
            to,
            order,
            skip,
            max,
            message_id,
            correlation_id,
            comment,
            label,
            json,
        } => {
            let filter = msgstore_core::MessageFilter {
                start: from.as_deref().map(commands::parse_instant).transpose()?,
                end: to.as_deref().map(commands::parse_instant).transpose()?,
                order,
                skip,
                max,
                message_id,
                correlation_id,
                comment,
                label,
            };
            commands::run_browse(&config, state, &filter, json).await
        }
        Commands::Show { key, json } => commands::run_show(&config, &key.into(), json).await,
        Commands::Move { key, state, reason } => {
            commands::run_move(&config, &key.into(), state, reason.as_deref()).await
        }
        Commands::Delete { key } => commands::run_delete(&config, &key.into()).await,
        Commands::Count { state } => commands::run_count(&config, state).await,
        Commands::Work {
            exec,
            interval_ms,
            workers,
        } => work::run_work(&config, exec, interval_ms, workers).await,
        Commands::Sql { dialect } => sql::run_sql(&config, dialect.as_deref()),
    }
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "msgstore={log_level},msgstore_storage={log_level},warn"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
}
