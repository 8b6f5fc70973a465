// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration diagnostics.
//!
//! Figment errors become miette reports pointing at the offending key in the
//! TOML file, with "did you mean?" hints for misspelled keys and enum values
//! (Jaro-Winkler similarity via `strsim`).

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Minimum Jaro-Winkler similarity for a suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// A configuration problem, renderable as a miette report.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("unknown configuration key `{key}`")]
    #[diagnostic(
        code(msgstore::config::unknown_key),
        help("{}", did_you_mean(suggestion.as_deref(), "valid keys", valid_keys))
    )]
    UnknownKey {
        key: String,
        suggestion: Option<String>,
        /// Comma-separated keys accepted in the same table.
        valid_keys: String,
        #[label("not a key of this table")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A string that names none of the variants of an enum setting.
    #[error("`{value}` is not a valid value for `{key}`")]
    #[diagnostic(
        code(msgstore::config::unknown_value),
        help("{}", did_you_mean(suggestion.as_deref(), "expected one of", expected))
    )]
    UnknownValue {
        key: String,
        value: String,
        suggestion: Option<String>,
        expected: String,
        #[label("unknown value")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("invalid type for key `{key}`: {detail}")]
    #[diagnostic(code(msgstore::config::invalid_type), help("expected {expected}"))]
    InvalidType {
        key: String,
        detail: String,
        expected: String,
        #[label("wrong type here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("missing required key `{key}`")]
    #[diagnostic(
        code(msgstore::config::missing_key),
        help("add `{key} = <value>` to your msgstore.toml")
    )]
    MissingKey { key: String },

    /// A value that deserialized but is not usable.
    #[error("invalid value for `{key}`: {message}")]
    #[diagnostic(
        code(msgstore::config::validation),
        help("set `{key}` in msgstore.toml or via MSGSTORE_{}", key.replace('.', "_").to_uppercase())
    )]
    Validation {
        /// Dotted path of the offending key.
        key: String,
        message: String,
    },

    #[error("configuration error: {0}")]
    #[diagnostic(code(msgstore::config::other))]
    Other(String),
}

impl ConfigError {
    pub fn validation(key: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Validation {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl From<ConfigError> for msgstore_core::StoreError {
    fn from(err: ConfigError) -> Self {
        msgstore_core::StoreError::Config(err.to_string())
    }
}

fn did_you_mean(suggestion: Option<&str>, listing: &str, candidates: &str) -> String {
    match suggestion {
        Some(s) => format!("did you mean `{s}`? {listing}: {candidates}"),
        None => format!("{listing}: {candidates}"),
    }
}

/// Converts every error carried by `err` into a [`ConfigError`].
///
/// `toml_sources` holds `(path, content)` pairs of the files that were
/// merged; they are searched to attach a source span to key errors.
pub fn figment_to_config_errors(
    err: figment::Error,
    toml_sources: &[(String, String)],
) -> Vec<ConfigError> {
    use figment::error::Kind;

    err.into_iter()
        .map(|error| {
            let path: Vec<String> = error.path.iter().map(|s| s.to_string()).collect();
            match &error.kind {
                Kind::UnknownField(field, expected) => {
                    let (span, src) = locate(&error, &path, field, toml_sources);
                    ConfigError::UnknownKey {
                        key: field.clone(),
                        suggestion: suggest_key(field, expected),
                        valid_keys: expected.join(", "),
                        span,
                        src,
                    }
                }
                Kind::UnknownVariant(value, expected) => {
                    let (section, key) = split_last(&path);
                    let (span, src) = locate(&error, section, key, toml_sources);
                    ConfigError::UnknownValue {
                        key: path.join("."),
                        value: value.clone(),
                        suggestion: suggest_key(&value.to_ascii_lowercase(), expected)
                            .or_else(|| suggest_key(value, expected)),
                        expected: expected.join(", "),
                        span,
                        src,
                    }
                }
                Kind::MissingField(field) => ConfigError::MissingKey {
                    key: dotted(&path, field),
                },
                Kind::InvalidType(actual, expected) => {
                    let (section, key) = split_last(&path);
                    let (span, src) = locate(&error, section, key, toml_sources);
                    ConfigError::InvalidType {
                        key: path.join("."),
                        detail: format!("found {actual}, expected {expected}"),
                        expected: expected.to_string(),
                        span,
                        src,
                    }
                }
                _ => ConfigError::Other(error.to_string()),
            }
        })
        .collect()
}

fn dotted(section: &[String], field: &str) -> String {
    if section.is_empty() {
        field.to_string()
    } else {
        format!("{}.{field}", section.join("."))
    }
}

fn split_last(path: &[String]) -> (&[String], &str) {
    match path.split_last() {
        Some((last, section)) => (section, last.as_str()),
        None => (&[], ""),
    }
}

/// Span of `field` under `section` in the file the error came from.
fn locate(
    error: &figment::error::Error,
    section: &[String],
    field: &str,
    toml_sources: &[(String, String)],
) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
    if field.is_empty() {
        return (None, None);
    }
    let Some(origin) = error
        .metadata
        .as_ref()
        .and_then(|m| m.source.as_ref())
        .and_then(|s| match s {
            figment::Source::File(path) => Some(path.display().to_string()),
            _ => None,
        })
    else {
        return (None, None);
    };
    let Some((path, content)) = toml_sources.iter().find(|(p, _)| *p == origin) else {
        return (None, None);
    };
    match find_key_offset(content, section, field) {
        Some(offset) => (
            Some(SourceSpan::new(offset.into(), field.len())),
            Some(NamedSource::new(path, content.clone())),
        ),
        None => (None, None),
    }
}

/// Byte offset of `field` inside the table named by `path`.
///
/// An empty `path` means the root table, i.e. keys before the first header.
/// Headers are compared by their dotted name, so `["storage", "columns"]`
/// matches `[storage.columns]` and `[ storage . columns ]`.
pub fn find_key_offset(content: &str, path: &[String], field: &str) -> Option<usize> {
    let wanted = path.join(".");
    // `None` inside an array of tables, which never holds msgstore settings.
    let mut table = Some(String::new());
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();

        if let Some(header) = trimmed.strip_prefix('[') {
            table = match header.split_once(']') {
                Some((name, _)) if !name.starts_with('[') => Some(
                    name.split('.')
                        .map(|part| part.trim().trim_matches('"'))
                        .collect::<Vec<_>>()
                        .join("."),
                ),
                _ => None,
            };
            continue;
        }
        if table.as_deref() != Some(wanted.as_str()) {
            continue;
        }

        let key = trimmed.strip_prefix('"').unwrap_or(trimmed);
        if let Some(after) = key.strip_prefix(field) {
            let after = after.strip_prefix('"').unwrap_or(after);
            if after.trim_start().starts_with('=') {
                let quote = usize::from(trimmed.starts_with('"'));
                return Some(start + indent + quote);
            }
        }
    }
    None
}

/// Best match for `unknown` among `valid_keys`, if any is similar enough.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|&key| (key, strsim::jaro_winkler(unknown, key)))
        .filter(|(_, score)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(key, _)| key.to_string())
}

/// Prints each error to stderr with miette's graphical handler.
pub fn render_errors(errors: &[ConfigError]) {
    use miette::GraphicalReportHandler;

    let handler = GraphicalReportHandler::new();
    for error in errors {
        let mut buf = String::new();
        let diagnostic: &dyn Diagnostic = error;
        if handler.render_report(&mut buf, diagnostic).is_ok() {
            eprint!("{buf}");
        } else {
            eprintln!("Error: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn suggests_close_keys_only() {
        let valid = &["path", "dialect", "connection_mode", "busy_timeout_ms"];
        assert_eq!(suggest_key("dialcet", valid), Some("dialect".to_string()));
        assert_eq!(
            suggest_key("retension_days", &["retention_days", "store_type"]),
            Some("retention_days".to_string())
        );
        assert_eq!(suggest_key("zzzzzz", valid), None);
    }

    #[test]
    fn key_offset_in_section() {
        let content = "[database]\npath = \"a.db\"\n\n[queue]\non_dnoe = \"delete\"\n";
        let offset = find_key_offset(content, &path(&["queue"]), "on_dnoe").unwrap();
        assert_eq!(&content[offset..offset + 7], "on_dnoe");
    }

    #[test]
    fn key_offset_in_nested_table() {
        let content = "[storage]\nstatus = \"x\"\n\n[ storage . columns ]\n  status = \"STATE\"\n";
        let offset =
            find_key_offset(content, &path(&["storage", "columns"]), "status").unwrap();
        assert_eq!(offset, content.rfind("status").unwrap());
    }

    #[test]
    fn key_offset_of_quoted_map_key() {
        let content = "[queue.status]\n\"PAUSED\" = \"P\"\n";
        let offset = find_key_offset(content, &path(&["queue", "status"]), "PAUSED").unwrap();
        assert_eq!(&content[offset..offset + 6], "PAUSED");
    }

    #[test]
    fn top_level_key_offset() {
        let content = "log_levle = \"debug\"\n[queue]\nlog_levle = 1\n";
        assert_eq!(find_key_offset(content, &[], "log_levle"), Some(0));
        assert_eq!(find_key_offset(content, &[], "missing"), None);
    }

    #[test]
    fn prefix_of_longer_key_is_not_a_match() {
        let content = "[queue]\norder_field = \"X\"\n";
        assert_eq!(find_key_offset(content, &path(&["queue"]), "order"), None);
    }

    #[test]
    fn unknown_value_help_lists_expected() {
        let err = ConfigError::UnknownValue {
            key: "queue.on_done".into(),
            value: "delet".into(),
            suggestion: Some("delete".into()),
            expected: "retain, delete".into(),
            span: None,
            src: None,
        };
        let help = err.help().map(|h| h.to_string()).unwrap_or_default();
        assert_eq!(help, "did you mean `delete`? expected one of: retain, delete");
        assert_eq!(err.to_string(), "`delet` is not a valid value for `queue.on_done`");
    }
}
