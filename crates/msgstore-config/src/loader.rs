// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./msgstore.toml` > `~/.config/msgstore/msgstore.toml` > `/etc/msgstore/msgstore.toml`
//! with environment variable overrides via `MSGSTORE_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::MsgstoreConfig;

pub const SYSTEM_CONFIG_PATH: &str = "/etc/msgstore/msgstore.toml";
pub const LOCAL_CONFIG_FILE: &str = "msgstore.toml";

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/msgstore/msgstore.toml` (system-wide)
/// 3. `~/.config/msgstore/msgstore.toml` (user XDG config)
/// 4. `./msgstore.toml` (local directory)
/// 5. `MSGSTORE_*` environment variables
pub fn load_config() -> Result<MsgstoreConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env vars).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<MsgstoreConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(MsgstoreConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<MsgstoreConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(MsgstoreConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading (exposed for diagnostic use).
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(MsgstoreConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG_FILE))
        .merge(env_provider())
}

pub fn user_config_path() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|d| d.join("msgstore").join(LOCAL_CONFIG_FILE))
}

/// Create the environment variable provider using explicit `map()` for section-to-dot mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `MSGSTORE_DATABASE_BUSY_TIMEOUT_MS` must map to
/// `database.busy_timeout_ms`, not `database.busy.timeout.ms`. Nested tables
/// are matched before their parent section.
fn env_provider() -> Env {
    Env::prefixed("MSGSTORE_").map(|key| {
        let key_str = key.as_str();
        let mapped = if let Some(rest) = key_str.strip_prefix("storage_columns_") {
            format!("storage.columns.{rest}")
        } else if let Some(rest) = key_str.strip_prefix("queue_status_") {
            format!("queue.status.{rest}")
        } else {
            key_str
                .replacen("database_", "database.", 1)
                .replacen("storage_", "storage.", 1)
                .replacen("queue_", "queue.", 1)
        };
        mapped.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_map_to_sections() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("MSGSTORE_DATABASE_BUSY_TIMEOUT_MS", "250");
            jail.set_env("MSGSTORE_STORAGE_COLUMNS_COMMENT", "REMARKS");
            jail.set_env("MSGSTORE_QUEUE_STATUS_HOLD", "P");
            jail.set_env("MSGSTORE_QUEUE_ON_DONE", "delete");

            let config: MsgstoreConfig = Figment::new()
                .merge(Serialized::defaults(MsgstoreConfig::default()))
                .merge(env_provider())
                .extract()?;

            assert_eq!(config.database.busy_timeout_ms, 250);
            assert_eq!(config.storage.columns.comment, "REMARKS");
            assert_eq!(
                config.queue.status.get(&msgstore_core::ProcessState::Hold),
                Some(&"P".to_string())
            );
            assert_eq!(config.queue.on_done, crate::model::DonePolicy::Delete);
            Ok(())
        });
    }
}
