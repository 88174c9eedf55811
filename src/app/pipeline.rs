// harvest - app/pipeline.rs
//
// Per-target pipeline assembly:
//
//   Client (session thread) --Line--> Parser (parser thread) --Log--> caller
//
// Both hops are rendezvous channels, so back-pressure from the caller reaches
// the remote read. The parser is built before connecting: a target whose
// parser cannot be constructed never opens a session.

use crate::client::session::{Client, ExecOutcome, Operation, TransportConfig};
use crate::core::cancel::CancelToken;
use crate::core::model::{Log, Target};
use crate::core::parser::{build_parser, ParserConfig};
use crate::util::error::{HarvestError, Result, SessionError};
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A running pipeline for one target.
pub struct TargetStream {
    pub target: Arc<Target>,
    /// Parsed records. Disconnects when the pipeline has fully drained.
    pub logs: Receiver<Log>,
    session: JoinHandle<std::result::Result<ExecOutcome, SessionError>>,
}

impl TargetStream {
    /// Wait for the session thread and return how the run ended.
    ///
    /// Call after `logs` has been drained (or dropped); the session cannot
    /// finish while the parser is blocked on an unread record.
    pub fn finish(self) -> Result<ExecOutcome> {
        let host = self.target.host.clone();
        drop(self.logs);
        match self.session.join() {
            Ok(result) => result.map_err(HarvestError::from),
            Err(_) => Err(SessionError::Wait {
                host,
                source: std::io::Error::other("session thread panicked"),
            }
            .into()),
        }
    }
}

/// Connect to `target` and start streaming `op`'s output through its parser.
pub fn start(
    target: Arc<Target>,
    op: Operation,
    transport: &TransportConfig,
    parser_config: &ParserConfig,
    cancel: &CancelToken,
) -> Result<TargetStream> {
    let parser = build_parser(Arc::clone(&target), parser_config)?;
    let mut client = Client::connect(Arc::clone(&target), transport)?;

    let (line_tx, line_rx) = mpsc::sync_channel(0);
    let logs = parser.parse(line_rx, cancel.clone());

    let session_cancel = cancel.clone();
    let session = thread::spawn(move || client.run(op, &session_cancel, line_tx));

    tracing::debug!(host = %target.host, path = %target.path, ?op, "Pipeline started");
    Ok(TargetStream {
        target,
        logs,
        session,
    })
}

/// Result of copying a target's files.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CopySummary {
    pub copied: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Copy each of `files` from `target` into `<dst_dir>/<host>/...`.
///
/// A failed file is logged and counted; the remaining files are still
/// attempted.
pub fn copy_files(
    target: Arc<Target>,
    files: &[String],
    dst_dir: &Path,
    transport: &TransportConfig,
    cancel: &CancelToken,
) -> Result<CopySummary> {
    let client = Client::connect(Arc::clone(&target), transport)?;
    let mut summary = CopySummary::default();

    for file in files {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }
        match client.copy(file, dst_dir, cancel) {
            Ok(ExecOutcome::Completed) => summary.copied += 1,
            Ok(ExecOutcome::Cancelled) => {
                summary.cancelled = true;
                break;
            }
            Err(e) => {
                tracing::warn!(host = %target.host, file = %file, error = %e, "Copy failed");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::model::ParserKind;
    use std::fs;

    fn target_for(path: &Path, multi_line: bool) -> Arc<Target> {
        let mut t = Target::local(path.to_string_lossy());
        t.multi_line = multi_line;
        Arc::new(t)
    }

    #[test]
    fn test_read_pipeline_stitches_multi_line_records() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.log");
        fs::write(&file, "ERROR boom\n  at a\n  at b\nINFO ok\n").unwrap();

        let stream = start(
            target_for(&file, true),
            Operation::Read { since: None },
            &TransportConfig::default(),
            &ParserConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();
        let contents: Vec<String> = stream.logs.iter().map(|l| l.content).collect();
        assert_eq!(contents, vec!["ERROR boom\n  at a\n  at b", "INFO ok"]);
        assert_eq!(stream.finish().unwrap(), ExecOutcome::Completed);
    }

    #[test]
    fn test_invalid_parser_never_connects() {
        let mut t = Target::local("/tmp/never-read.log");
        t.parser = ParserKind::Regexp;
        t.regexp = "([".to_string();
        let result = start(
            Arc::new(t),
            Operation::Tailf,
            &TransportConfig::default(),
            &ParserConfig::default(),
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(HarvestError::Parse(_))));
    }

    #[test]
    fn test_copy_files_counts_failures_and_continues() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let good = src.path().join("good.log");
        fs::write(&good, "x\n").unwrap();
        let files = vec![
            src.path().join("missing.log").to_string_lossy().into_owned(),
            good.to_string_lossy().into_owned(),
        ];

        let summary = copy_files(
            target_for(&good, false),
            &files,
            dst.path(),
            &TransportConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(
            summary,
            CopySummary {
                copied: 1,
                failed: 1,
                cancelled: false
            }
        );
    }
}
