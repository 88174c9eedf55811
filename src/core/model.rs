// harvest - core/model.rs
//
// Core data model types. Pure data definitions with no I/O.
//
// These types are the shared vocabulary across all layers: a `Target` is
// resolved once from configuration, every physical output line becomes a
// `Line`, and parsers turn lines into `Log` records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Target
// =============================================================================

/// Session backend selected by a target URL's scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Remote host reached through the OpenSSH client.
    Ssh,
    /// The local machine, reached through `sh -c`.
    File,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Ssh => "ssh",
            Scheme::File => "file",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which parser strategy turns a target's lines into records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    /// Pass-through, optionally stitching multi-line records.
    #[default]
    None,
    /// Regex capture + time format timestamp extraction.
    Regexp,
}

/// A resolved source descriptor: one log path on one host, with its parsing
/// rules.
///
/// Immutable once resolved. Parsers and records share it through
/// `Arc<Target>` and never mutate it.
#[derive(Clone, Serialize)]
pub struct Target {
    /// The URL this target was resolved from.
    pub url: String,

    /// Free-text description from the target set.
    pub description: String,

    /// Parser strategy.
    #[serde(rename = "type")]
    pub parser: ParserKind,

    /// Pattern whose first capture group is the timestamp token.
    pub regexp: String,

    /// Whether indented lines are stitched onto the preceding record.
    pub multi_line: bool,

    /// chrono format string for the timestamp token. Empty disables
    /// timestamp extraction.
    pub time_format: String,

    /// Offset override (e.g. `+0900`). Empty means use the offset detected
    /// on the remote host.
    pub time_zone: String,

    /// Tags, de-duplicated, in first-seen order.
    pub tags: Vec<String>,

    pub scheme: Scheme,
    pub host: String,
    pub user: Option<String>,

    /// Port, 0 meaning the backend default.
    pub port: u16,

    /// Log path on the host; the last component may be a glob.
    pub path: String,

    /// Private key passphrase. Never serialised or printed.
    #[serde(skip)]
    pub ssh_key_passphrase: Vec<u8>,
}

impl Target {
    /// Build a target for the local machine with default parsing rules.
    pub fn local(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            url: format!("file://{path}"),
            description: String::new(),
            parser: ParserKind::None,
            regexp: String::new(),
            multi_line: false,
            time_format: String::new(),
            time_zone: String::new(),
            tags: Vec::new(),
            scheme: Scheme::File,
            host: "localhost".to_string(),
            user: None,
            port: 0,
            path,
            ssh_key_passphrase: Vec::new(),
        }
    }

    /// Returns `true` if the target carries any of `tags`.
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("url", &self.url)
            .field("description", &self.description)
            .field("parser", &self.parser)
            .field("regexp", &self.regexp)
            .field("multi_line", &self.multi_line)
            .field("time_format", &self.time_format)
            .field("time_zone", &self.time_zone)
            .field("tags", &self.tags)
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("user", &self.user)
            .field("port", &self.port)
            .field("path", &self.path)
            .field(
                "ssh_key_passphrase",
                &if self.ssh_key_passphrase.is_empty() {
                    "<none>"
                } else {
                    "<redacted>"
                },
            )
            .finish()
    }
}

/// Remove duplicate tags, keeping the first occurrence of each.
pub fn unique_tags(tags: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.iter()
        .filter(|t| seen.insert(t.as_str()))
        .cloned()
        .collect()
}

// =============================================================================
// Line (raw output of a session)
// =============================================================================

/// One physical line of remote command output.
///
/// Host, path, and timezone are shared across every line of a session, so
/// they are reference-counted rather than copied per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub host: Arc<str>,
    pub path: Arc<str>,
    /// Line content with the trailing newline removed.
    pub content: String,
    /// Remote UTC offset (`±HHMM`) captured once per session.
    pub timezone: Arc<str>,
}

// =============================================================================
// Log (normalised output of parsing)
// =============================================================================

/// One normalised record.
#[derive(Debug, Clone)]
pub struct Log {
    pub host: Arc<str>,
    pub path: Arc<str>,

    /// Nanoseconds since the Unix epoch. 0 means unresolved.
    pub timestamp: i64,

    /// Reserved for forward-filling unresolved timestamps from the previous
    /// record. Always `false` in this crate.
    pub filled_by_prev_ts: bool,

    /// One or more physical lines joined by `\n`.
    pub content: String,

    /// Originating target, for tagging downstream.
    pub target: Arc<Target>,
}

impl Log {
    /// A record with an unresolved timestamp.
    pub fn unresolved(
        host: Arc<str>,
        path: Arc<str>,
        content: String,
        target: Arc<Target>,
    ) -> Self {
        Self {
            host,
            path,
            timestamp: 0,
            filled_by_prev_ts: false,
            content,
            target,
        }
    }

    /// The timestamp as a UTC date-time, or `None` when unresolved.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        if self.timestamp == 0 {
            None
        } else {
            Some(DateTime::from_timestamp_nanos(self.timestamp))
        }
    }
}
