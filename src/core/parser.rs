// harvest - core/parser.rs
//
// Stream parsers: consume a channel of `Line`s, produce a channel of `Log`s.
//
// Each `parse` call spawns one background thread that owns the output
// sender. The sender is dropped exactly once, when the thread exits, which is
// how the consumer observes end-of-stream. The output channel is a rendezvous
// channel (capacity 0): a slow consumer stalls the parser, which stalls the
// ingestion thread feeding it, which stalls the remote read.
//
// Cancellation is cooperative and checked once per input line.

use crate::core::cancel::CancelToken;
use crate::core::model::{Line, Log, ParserKind, Target};
use crate::core::stitch::Stash;
use crate::core::timestamp;
use crate::util::constants;
use crate::util::error::ParseError;
use regex::Regex;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;

/// Configuration for parsers.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Continuation lines a multi-line record may hold before it is split.
    pub max_content_stash: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_content_stash: constants::DEFAULT_MAX_CONTENT_STASH,
        }
    }
}

/// A strategy turning a line stream into a record stream.
pub trait Parser: Send + Sync {
    /// Start parsing `lines` on a background thread and return the record
    /// stream. The returned receiver disconnects once `lines` is exhausted
    /// (or `cancel` fires) and all buffered content has been emitted.
    fn parse(&self, lines: Receiver<Line>, cancel: CancelToken) -> Receiver<Log>;
}

/// Build the parser a target asks for.
pub fn build_parser(
    target: Arc<Target>,
    config: &ParserConfig,
) -> Result<Box<dyn Parser>, ParseError> {
    match target.parser {
        ParserKind::None => Ok(Box::new(NoneParser::new(target, config))),
        ParserKind::Regexp => {
            if target.multi_line {
                tracing::warn!(
                    target_url = %target.url,
                    "multi_line is not supported by the regexp parser; ignoring"
                );
            }
            let pattern = target.regexp.clone();
            let time_format = target.time_format.clone();
            Ok(Box::new(RegexpParser::new(&pattern, &time_format, target)?))
        }
    }
}

/// Send one record; `false` means the consumer has gone away.
fn emit(tx: &SyncSender<Log>, log: Log) -> bool {
    tx.send(log).is_ok()
}

// =============================================================================
// Pass-through / multi-line parser
// =============================================================================

/// Emits every line as-is with an unresolved timestamp, optionally stitching
/// indented continuation lines onto the record above them.
#[derive(Debug, Clone)]
pub struct NoneParser {
    target: Arc<Target>,
    max_content_stash: usize,
}

impl NoneParser {
    pub fn new(target: Arc<Target>, config: &ParserConfig) -> Self {
        Self {
            target,
            max_content_stash: config.max_content_stash,
        }
    }
}

impl Parser for NoneParser {
    fn parse(&self, lines: Receiver<Line>, cancel: CancelToken) -> Receiver<Log> {
        let (tx, rx) = mpsc::sync_channel(0);
        let this = self.clone();
        if self.target.multi_line {
            std::thread::spawn(move || this.run_multi_line(lines, tx, cancel));
        } else {
            std::thread::spawn(move || this.run_single_line(lines, tx, cancel));
        }
        rx
    }
}

impl NoneParser {
    fn run_single_line(self, lines: Receiver<Line>, tx: SyncSender<Log>, cancel: CancelToken) {
        let mut emitted: u64 = 0;
        for line in lines.iter() {
            if cancel.is_cancelled() {
                tracing::debug!(emitted, "Parser cancelled");
                break;
            }
            let log = Log::unresolved(line.host, line.path, line.content, Arc::clone(&self.target));
            if !emit(&tx, log) {
                break;
            }
            emitted += 1;
        }
        tracing::trace!(emitted, "Single-line parser finished");
    }

    fn run_multi_line(self, lines: Receiver<Line>, tx: SyncSender<Log>, cancel: CancelToken) {
        let mut stash = Stash::new(Arc::clone(&self.target), self.max_content_stash);
        let mut out: Vec<Log> = Vec::with_capacity(2);

        for line in lines.iter() {
            // A line already taken off the channel belongs to the stash.
            stash.push(line, &mut out);
            for log in out.drain(..) {
                if !emit(&tx, log) {
                    return;
                }
            }
            if cancel.is_cancelled() {
                tracing::debug!(pending = stash.len(), "Parser cancelled; flushing stash");
                break;
            }
        }
        // Upstream sends fail from here on instead of waiting on the flush.
        drop(lines);

        // Stream closed (or cancelled): nothing buffered may be lost.
        if let Some(log) = stash.finish() {
            emit(&tx, log);
        }
    }
}

// =============================================================================
// Regex + time-format parser
// =============================================================================

/// Extracts a timestamp from capture group 1 of a pattern and parses it with
/// a chrono format string. One record per line, never buffered.
#[derive(Debug, Clone)]
pub struct RegexpParser {
    regexp: Regex,
    time_format: String,
    target: Arc<Target>,
}

impl RegexpParser {
    /// Compile `pattern`. Fails if it does not compile or is too long.
    pub fn new(pattern: &str, time_format: &str, target: Arc<Target>) -> Result<Self, ParseError> {
        if pattern.len() > constants::MAX_REGEX_PATTERN_LENGTH {
            return Err(ParseError::RegexTooLong {
                length: pattern.len(),
                max_length: constants::MAX_REGEX_PATTERN_LENGTH,
            });
        }
        let regexp = Regex::new(pattern).map_err(|e| ParseError::InvalidRegex {
            pattern: pattern.to_string(),
            source: e,
        })?;
        Ok(Self {
            regexp,
            time_format: time_format.to_string(),
            target,
        })
    }

    /// Timestamp of `line` in nanoseconds, 0 when it cannot be resolved.
    pub fn timestamp(&self, line: &Line) -> i64 {
        if self.time_format.is_empty() {
            return 0;
        }
        let Some(token) = self
            .regexp
            .captures(&line.content)
            .and_then(|caps| caps.get(1))
        else {
            return 0;
        };
        let offset = timestamp::effective_offset(&self.target.time_zone, &line.timezone);
        match timestamp::parse_to_nanos(&self.time_format, offset, token.as_str()) {
            Some(ts) => ts,
            None => {
                tracing::trace!(
                    host = %line.host,
                    token = token.as_str(),
                    format = %self.time_format,
                    "Timestamp token did not parse"
                );
                0
            }
        }
    }
}

impl Parser for RegexpParser {
    fn parse(&self, lines: Receiver<Line>, cancel: CancelToken) -> Receiver<Log> {
        let (tx, rx) = mpsc::sync_channel(0);
        let this = self.clone();
        std::thread::spawn(move || {
            for line in lines.iter() {
                if cancel.is_cancelled() {
                    tracing::debug!("Parser cancelled");
                    break;
                }
                let ts = this.timestamp(&line);
                let log = Log {
                    host: line.host,
                    path: line.path,
                    timestamp: ts,
                    filled_by_prev_ts: false,
                    content: line.content,
                    target: Arc::clone(&this.target),
                };
                if !emit(&tx, log) {
                    break;
                }
            }
        });
        rx
    }
}
