// harvest - client/ingest.rs
//
// Line ingestion: turns a session's stdout byte stream into `Line` values on
// a rendezvous channel.
//
// One ingestion thread runs per session. It ends on end-of-stream, on a read
// error, or when the consumer drops the receiving end, and in every case
// cancels the session-scoped token so the transport can close.

use crate::core::cancel::CancelToken;
use crate::core::model::Line;
use crate::util::constants;
use crate::util::logging::preview;
use std::io::{self, BufRead, BufReader, Read};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Fields stamped onto every line of one session.
#[derive(Debug, Clone)]
pub struct LineContext {
    pub host: Arc<str>,
    pub path: Arc<str>,
    pub timezone: Arc<str>,
}

/// How an ingestion thread ended.
#[derive(Debug)]
pub enum IngestOutcome {
    /// The stream reached its end; every line was delivered.
    Eof { lines: u64 },
    /// The consumer hung up before the stream ended.
    ConsumerGone { lines: u64 },
    /// Reading failed mid-stream.
    ReadError { lines: u64, source: io::Error },
}

impl IngestOutcome {
    pub fn lines(&self) -> u64 {
        match self {
            Self::Eof { lines } | Self::ConsumerGone { lines } | Self::ReadError { lines, .. } => {
                *lines
            }
        }
    }
}

/// Start ingesting `reader` on a new thread.
///
/// The sender is moved into the thread and dropped when it exits, which
/// closes the line channel for the parser.
pub fn spawn<R>(
    reader: R,
    ctx: LineContext,
    tx: SyncSender<Line>,
    session: CancelToken,
) -> JoinHandle<IngestOutcome>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let outcome = ingest(reader, &ctx, &tx);
        tracing::debug!(
            host = %ctx.host,
            path = %ctx.path,
            lines = outcome.lines(),
            ?outcome,
            "Ingestion finished"
        );
        session.cancel();
        outcome
    })
}

fn ingest<R: Read>(reader: R, ctx: &LineContext, tx: &SyncSender<Line>) -> IngestOutcome {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut lines = 0u64;

    loop {
        buf.clear();
        let (read, truncated) =
            match read_line_bounded(&mut reader, &mut buf, constants::MAX_LINE_BYTES) {
                Ok(r) => r,
                Err(source) => return IngestOutcome::ReadError { lines, source },
            };
        if read == 0 {
            return IngestOutcome::Eof { lines };
        }

        let mut content = decode_line(&buf);
        if truncated {
            tracing::warn!(
                host = %ctx.host,
                path = %ctx.path,
                bytes = read,
                "Line exceeds {} bytes; truncated",
                constants::MAX_LINE_BYTES
            );
            content.push_str(constants::TRUNCATED_SUFFIX);
        }
        tracing::trace!(host = %ctx.host, line = preview(&content), "Ingested line");

        let line = Line {
            host: Arc::clone(&ctx.host),
            path: Arc::clone(&ctx.path),
            content,
            timezone: Arc::clone(&ctx.timezone),
        };
        if tx.send(line).is_err() {
            return IngestOutcome::ConsumerGone { lines };
        }
        lines += 1;
    }
}

/// Strip the line terminator and decode, replacing invalid UTF-8.
fn decode_line(buf: &[u8]) -> String {
    let mut end = buf.len();
    if end > 0 && buf[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && buf[end - 1] == b'\r' {
            end -= 1;
        }
    }
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Read one `\n`-terminated line, keeping at most `max` bytes of it in `buf`.
///
/// Returns the number of bytes consumed from the stream (0 at end-of-stream)
/// and whether the kept bytes were cut short.
fn read_line_bounded<R: BufRead>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
) -> io::Result<(usize, bool)> {
    let mut consumed = 0usize;
    let mut truncated = false;
    loop {
        let available = match reader.fill_buf() {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return Ok((consumed, truncated));
        }
        let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (&available[..=i], true),
            None => (available, false),
        };
        let room = max.saturating_sub(buf.len());
        if chunk.len() > room {
            buf.extend_from_slice(&chunk[..room]);
            truncated = true;
        } else {
            buf.extend_from_slice(chunk);
        }
        let used = chunk.len();
        reader.consume(used);
        consumed += used;
        if done {
            return Ok((consumed, truncated));
        }
    }
}

/// Forward a session's stderr to the log, one event per line.
pub fn spawn_stderr_logger<R>(reader: R, host: Arc<str>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let reader = BufReader::new(reader);
        for line in reader.split(b'\n') {
            match line {
                Ok(bytes) => {
                    let text = decode_line(&bytes);
                    if !text.trim().is_empty() {
                        tracing::warn!(host = %host, stderr = preview(&text), "Remote stderr");
                    }
                }
                Err(e) => {
                    tracing::debug!(host = %host, error = %e, "Stderr read ended");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc;

    fn ctx() -> LineContext {
        LineContext {
            host: "web-1".into(),
            path: "/var/log/app.log".into(),
            timezone: "+0900".into(),
        }
    }

    fn collect(input: &'static [u8]) -> (Vec<Line>, IngestOutcome, bool) {
        let (tx, rx) = mpsc::sync_channel(0);
        let token = CancelToken::new();
        let handle = spawn(Cursor::new(input), ctx(), tx, token.clone());
        let lines: Vec<Line> = rx.iter().collect();
        let outcome = handle.join().unwrap();
        (lines, outcome, token.is_cancelled())
    }

    #[test]
    fn test_lines_stamped_and_delivered_in_order() {
        let (lines, outcome, cancelled) = collect(b"one\ntwo\r\nthree");
        let contents: Vec<_> = lines.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        assert!(lines.iter().all(|l| &*l.host == "web-1" && &*l.timezone == "+0900"));
        assert!(matches!(outcome, IngestOutcome::Eof { lines: 3 }));
        // End-of-stream releases the session.
        assert!(cancelled);
    }

    #[test]
    fn test_empty_stream_closes_channel_with_no_lines() {
        let (lines, outcome, cancelled) = collect(b"");
        assert!(lines.is_empty());
        assert!(matches!(outcome, IngestOutcome::Eof { lines: 0 }));
        assert!(cancelled);
    }

    #[test]
    fn test_blank_lines_are_preserved() {
        let (lines, _, _) = collect(b"a\n\nb\n");
        let contents: Vec<_> = lines.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "", "b"]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let (lines, _, _) = collect(b"ok \xff\xfe end\n");
        assert_eq!(lines[0].content, "ok \u{fffd}\u{fffd} end");
    }

    #[test]
    fn test_consumer_gone_ends_ingestion() {
        let (tx, rx) = mpsc::sync_channel(0);
        let token = CancelToken::new();
        let handle = spawn(Cursor::new(b"a\nb\nc\n".to_vec()), ctx(), tx, token.clone());
        assert_eq!(rx.recv().unwrap().content, "a");
        drop(rx);
        let outcome = handle.join().unwrap();
        assert!(matches!(outcome, IngestOutcome::ConsumerGone { lines: 1 }));
        assert!(token.is_cancelled());
    }

    /// Yields its bytes, then fails instead of reporting end-of-stream.
    struct BrokenStream(Cursor<&'static [u8]>);

    impl Read for BrokenStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.read(buf)? {
                0 => Err(io::Error::new(io::ErrorKind::ConnectionReset, "channel reset")),
                n => Ok(n),
            }
        }
    }

    #[test]
    fn test_read_error_ends_ingestion_after_delivered_lines() {
        let (tx, rx) = mpsc::sync_channel(0);
        let token = CancelToken::new();
        let reader = BrokenStream(Cursor::new(&b"one\ntwo\n"[..]));
        let handle = spawn(reader, ctx(), tx, token.clone());

        let contents: Vec<String> = rx.iter().map(|l| l.content).collect();
        assert_eq!(contents, vec!["one", "two"]);

        match handle.join().unwrap() {
            IngestOutcome::ReadError { lines, source } => {
                assert_eq!(lines, 2);
                assert_eq!(source.kind(), io::ErrorKind::ConnectionReset);
            }
            other => panic!("expected ReadError, got {other:?}"),
        }
        // A failed stream releases the session like any other end.
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_read_line_bounded_truncates_and_resyncs() {
        let mut reader = BufReader::with_capacity(4, Cursor::new(b"abcdefgh\nxy\n".to_vec()));
        let mut buf = Vec::new();

        let (read, truncated) = read_line_bounded(&mut reader, &mut buf, 5).unwrap();
        assert_eq!(read, 9);
        assert!(truncated);
        assert_eq!(buf, b"abcde");

        buf.clear();
        let (read, truncated) = read_line_bounded(&mut reader, &mut buf, 5).unwrap();
        assert_eq!(read, 3);
        assert!(!truncated);
        assert_eq!(buf, b"xy\n");
    }
}
