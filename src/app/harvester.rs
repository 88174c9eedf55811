// harvest - app/harvester.rs
//
// Multi-target fan-in.
//
// One worker thread per target runs that target's pipeline and forwards its
// records into a single bounded channel. A target that fails to start or
// fails mid-stream is reported in its `TargetReport`; the other targets keep
// running. Records from different targets interleave in arrival order;
// records from one target keep their order.

use crate::app::pipeline;
use crate::client::session::{ExecOutcome, Operation, TransportConfig};
use crate::core::cancel::CancelToken;
use crate::core::model::{Log, Target};
use crate::core::parser::ParserConfig;
use crate::util::constants;
use crate::util::error::HarvestError;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Settings shared by every target of a harvest.
#[derive(Debug, Clone, Default)]
pub struct HarvestOptions {
    pub transport: TransportConfig,
    pub parser: ParserConfig,
}

/// How one target's run ended.
#[derive(Debug)]
pub struct TargetReport {
    pub target: Arc<Target>,
    /// Records forwarded to the consumer.
    pub records: u64,
    pub result: Result<ExecOutcome, HarvestError>,
}

/// A running multi-target harvest.
pub struct Harvester {
    logs: Receiver<Log>,
    workers: Vec<JoinHandle<TargetReport>>,
}

impl Harvester {
    /// Start one pipeline per target.
    pub fn start(
        targets: Vec<Arc<Target>>,
        op: Operation,
        options: &HarvestOptions,
        cancel: &CancelToken,
    ) -> Self {
        let (tx, logs) = mpsc::sync_channel(constants::FAN_IN_CHANNEL_CAPACITY);
        tracing::info!(targets = targets.len(), ?op, "Harvest starting");

        let workers = targets
            .into_iter()
            .map(|target| {
                let tx = tx.clone();
                let options = options.clone();
                let cancel = cancel.child();
                thread::spawn(move || run_target(target, op, &options, &cancel, tx))
            })
            .collect();

        // Only workers hold senders, so `logs` disconnects when the last
        // target finishes.
        drop(tx);
        Self { logs, workers }
    }

    /// The merged record stream.
    pub fn logs(&self) -> &Receiver<Log> {
        &self.logs
    }

    /// Wait for every target and return their reports in start order.
    ///
    /// Unread records are discarded.
    pub fn wait(self) -> Vec<TargetReport> {
        drop(self.logs);
        self.workers
            .into_iter()
            .filter_map(|w| match w.join() {
                Ok(report) => Some(report),
                Err(_) => {
                    tracing::error!("Harvest worker panicked");
                    None
                }
            })
            .collect()
    }
}

fn run_target(
    target: Arc<Target>,
    op: Operation,
    options: &HarvestOptions,
    cancel: &CancelToken,
    tx: SyncSender<Log>,
) -> TargetReport {
    let stream = match pipeline::start(
        Arc::clone(&target),
        op,
        &options.transport,
        &options.parser,
        cancel,
    ) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(host = %target.host, path = %target.path, error = %e, "Target failed to start");
            return TargetReport {
                target,
                records: 0,
                result: Err(e),
            };
        }
    };

    let mut records = 0u64;
    for log in stream.logs.iter() {
        if tx.send(log).is_err() {
            // Consumer gone: stop this target and drain what is in flight.
            cancel.cancel();
            continue;
        }
        records += 1;
    }

    let result = stream.finish();
    match &result {
        Ok(outcome) => tracing::info!(
            host = %target.host,
            path = %target.path,
            records,
            ?outcome,
            "Target finished"
        ),
        Err(e) => tracing::error!(
            host = %target.host,
            path = %target.path,
            records,
            error = %e,
            "Target failed"
        ),
    }
    TargetReport {
        target,
        records,
        result,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::model::ParserKind;
    use std::fs;

    #[test]
    fn test_fan_in_merges_targets_and_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log");
        fs::write(&a, "a1\na2\n").unwrap();
        fs::write(&b, "b1\n").unwrap();

        let mut broken = Target::local(a.to_string_lossy());
        broken.parser = ParserKind::Regexp;
        broken.regexp = "([".to_string();

        let targets = vec![
            Arc::new(Target::local(a.to_string_lossy())),
            Arc::new(Target::local(b.to_string_lossy())),
            Arc::new(broken),
        ];
        let harvester = Harvester::start(
            targets,
            Operation::Read { since: None },
            &HarvestOptions::default(),
            &CancelToken::new(),
        );

        let mut contents: Vec<String> = harvester.logs().iter().map(|l| l.content).collect();
        contents.sort();
        assert_eq!(contents, vec!["a1", "a2", "b1"]);

        let reports = harvester.wait();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].records, 2);
        assert!(matches!(reports[0].result, Ok(ExecOutcome::Completed)));
        assert_eq!(reports[1].records, 1);
        assert_eq!(reports[2].records, 0);
        assert!(matches!(reports[2].result, Err(HarvestError::Parse(_))));
    }

    #[test]
    fn test_cancel_ends_endless_targets() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("live.log");
        fs::write(&file, "first\n").unwrap();

        let cancel = CancelToken::new();
        let harvester = Harvester::start(
            vec![Arc::new(Target::local(file.to_string_lossy()))],
            Operation::Tailf,
            &HarvestOptions::default(),
            &cancel,
        );

        let first = harvester.logs().recv().unwrap();
        assert_eq!(first.content, "first");
        cancel.cancel();

        // The stream closes without further input.
        while harvester.logs().recv().is_ok() {}
        let reports = harvester.wait();
        assert!(matches!(reports[0].result, Ok(ExecOutcome::Cancelled)));
    }
}
