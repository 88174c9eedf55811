// harvest - app/output.rs
//
// Record rendering for stdout.
//
// Text: `<RFC 3339 UTC timestamp or '-'>\t<host>:<path>\t<content>`, one
// record per entry (multi-line content keeps its embedded newlines).
// JSON: one object per line (JSON Lines).

use crate::core::model::Log;
use chrono::SecondsFormat;
use serde::Serialize;
use std::io::{self, Write};

/// Output format selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    host: &'a str,
    path: &'a str,
    /// Nanoseconds since the epoch; 0 when unresolved.
    timestamp: i64,
    time: Option<String>,
    filled_by_prev_ts: bool,
    content: &'a str,
    description: &'a str,
    tags: &'a [String],
}

/// Render one record without a trailing newline.
pub fn format_record(log: &Log, format: OutputFormat) -> String {
    let time = log
        .datetime()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true));
    match format {
        OutputFormat::Text => format!(
            "{}\t{}:{}\t{}",
            time.as_deref().unwrap_or("-"),
            log.host,
            log.path,
            log.content
        ),
        OutputFormat::Json => {
            let record = JsonRecord {
                host: &log.host,
                path: &log.path,
                timestamp: log.timestamp,
                time,
                filled_by_prev_ts: log.filled_by_prev_ts,
                content: &log.content,
                description: &log.target.description,
                tags: &log.target.tags,
            };
            // Serialising plain strings and integers cannot fail.
            serde_json::to_string(&record).unwrap_or_default()
        }
    }
}

/// Write one record followed by a newline.
pub fn write_record<W: Write>(out: &mut W, log: &Log, format: OutputFormat) -> io::Result<()> {
    writeln!(out, "{}", format_record(log, format))
}
