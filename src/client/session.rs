// harvest - client/session.rs
//
// Session transport: one `Client` per target, one primary command per
// client.
//
// Lifecycle:
//
//   Created -> Connected -> SessionOpen -> Streaming -> Completed -> Closed
//                                                    \-> Cancelled -> Closed
//   (any failure after Connected goes straight to Closed)
//
// `exec` probes the remote UTC offset, starts the command, hands its stdout
// to an ingestion thread, and then supervises the process until one of:
//   - the process exits on its own,
//   - the caller's token is cancelled (external shutdown),
//   - ingestion finishes (end-of-stream, read error, consumer gone).
//
// On every path the process group is killed, both helper threads are joined,
// and the line sender has been dropped, so the parser sees the channel close
// exactly once.

use crate::client::command::CommandBuilder;
use crate::client::ingest::{self, IngestOutcome, LineContext};
use crate::core::cancel::CancelToken;
use crate::core::model::{Line, Scheme, Target};
use crate::core::timestamp::parse_offset;
use crate::platform::shell::{self, LocalShell, OpenSsh, OpenSshOptions, Shell};
use crate::util::constants;
use crate::util::error::{HarvestError, SessionError};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// =============================================================================
// Types
// =============================================================================

/// Transport settings shared by every client of a run.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// OpenSSH client executable.
    pub ssh_command: String,
    /// Seconds allowed for establishing a connection.
    pub connect_timeout_secs: u64,
    /// Run file access through `sudo -n`.
    pub sudo: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ssh_command: constants::DEFAULT_SSH_COMMAND.to_string(),
            connect_timeout_secs: constants::DEFAULT_CONNECT_TIMEOUT_SECS,
            sudo: false,
        }
    }
}

/// Where a client is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Connected,
    SessionOpen,
    Streaming,
    Completed,
    Cancelled,
    Closed,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Connected => "connected",
            Self::SessionOpen => "session-open",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Closed => "closed",
        }
    }
}

/// How a successful command run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The command finished and its output was fully delivered.
    Completed,
    /// The run was cut short by cancellation. Not an error.
    Cancelled,
}

/// Which operation to run against a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Dump matching files, oldest first.
    Read { since: Option<DateTime<Utc>> },
    /// Follow matching files until cancelled.
    Tailf,
    /// List matching file paths.
    Ls { since: Option<DateTime<Utc>> },
    /// Sample the newest matching file.
    RandomOne,
}

/// How the supervised process ended.
enum Termination {
    Exited(ExitStatus),
    Killed,
}

// =============================================================================
// Client
// =============================================================================

/// A connection to one target that runs exactly one primary command.
#[derive(Debug)]
pub struct Client {
    target: Arc<Target>,
    shell: Box<dyn Shell>,
    commands: CommandBuilder,
    state: SessionState,
}

impl Client {
    /// Connect to `target` and verify it is reachable.
    pub fn connect(target: Arc<Target>, config: &TransportConfig) -> Result<Self, SessionError> {
        let shell: Box<dyn Shell> = match target.scheme {
            Scheme::Ssh => Box::new(OpenSsh::new(OpenSshOptions {
                program: config.ssh_command.clone(),
                host: target.host.clone(),
                user: target.user.clone(),
                port: target.port,
                connect_timeout_secs: config.connect_timeout_secs,
                passphrase: target.ssh_key_passphrase.clone(),
            })),
            Scheme::File => Box::new(LocalShell),
        };
        let mut client = Self {
            target,
            shell,
            commands: CommandBuilder::new(config.sudo),
            state: SessionState::Created,
        };
        client.probe_connection()?;
        client.state = SessionState::Connected;
        tracing::debug!(host = %client.target.host, scheme = %client.target.scheme, "Connected");
        Ok(client)
    }

    pub fn target(&self) -> &Arc<Target> {
        &self.target
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run `op` against the target path, streaming lines into `lines`.
    pub fn run(
        &mut self,
        op: Operation,
        cancel: &CancelToken,
        lines: SyncSender<Line>,
    ) -> Result<ExecOutcome, SessionError> {
        match op {
            Operation::Read { since } => self.read(since, cancel, lines),
            Operation::Tailf => self.tailf(cancel, lines),
            Operation::Ls { since } => self.ls(since, cancel, lines),
            Operation::RandomOne => self.random_one(cancel, lines),
        }
    }

    pub fn read(
        &mut self,
        since: Option<DateTime<Utc>>,
        cancel: &CancelToken,
        lines: SyncSender<Line>,
    ) -> Result<ExecOutcome, SessionError> {
        let command = self.commands.read(&self.target.path, since);
        self.exec(&command, cancel, lines)
    }

    pub fn tailf(
        &mut self,
        cancel: &CancelToken,
        lines: SyncSender<Line>,
    ) -> Result<ExecOutcome, SessionError> {
        let command = self.commands.tailf(&self.target.path);
        self.exec(&command, cancel, lines)
    }

    pub fn ls(
        &mut self,
        since: Option<DateTime<Utc>>,
        cancel: &CancelToken,
        lines: SyncSender<Line>,
    ) -> Result<ExecOutcome, SessionError> {
        let command = self.commands.ls(&self.target.path, since);
        self.exec(&command, cancel, lines)
    }

    pub fn random_one(
        &mut self,
        cancel: &CancelToken,
        lines: SyncSender<Line>,
    ) -> Result<ExecOutcome, SessionError> {
        let command = self.commands.random_one(&self.target.path);
        self.exec(&command, cancel, lines)
    }

    /// Run one command, streaming its stdout into `lines` until it ends or
    /// `cancel` fires.
    ///
    /// `lines` is dropped before this returns on every path, success or not.
    /// Cancellation yields `Ok(ExecOutcome::Cancelled)`; a command that exits
    /// unsuccessfully on its own yields `SessionError::CommandFailed`.
    pub fn exec(
        &mut self,
        command: &str,
        cancel: &CancelToken,
        lines: SyncSender<Line>,
    ) -> Result<ExecOutcome, SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::InvalidState {
                host: self.target.host.clone(),
                state: self.state.label(),
            });
        }
        let result = self.exec_inner(command, cancel, lines);
        self.state = match &result {
            Ok(ExecOutcome::Completed) => SessionState::Completed,
            Ok(ExecOutcome::Cancelled) => SessionState::Cancelled,
            Err(_) => SessionState::Closed,
        };
        tracing::debug!(
            host = %self.target.host,
            path = %self.target.path,
            state = self.state.label(),
            "Session finished"
        );
        self.state = SessionState::Closed;
        result
    }

    fn exec_inner(
        &mut self,
        command: &str,
        cancel: &CancelToken,
        lines: SyncSender<Line>,
    ) -> Result<ExecOutcome, SessionError> {
        let host = self.target.host.clone();
        let session = cancel.child();

        self.state = SessionState::SessionOpen;
        let timezone = self.probe_timezone()?;

        let mut cmd = self.shell.command(command);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        tracing::debug!(host = %host, command, timezone = %timezone, "Starting remote command");
        let mut child = shell::spawn_in_group(&mut cmd).map_err(|source| SessionError::Spawn {
            host: host.clone(),
            operation: "exec",
            source,
        })?;

        let Some(stdout) = child.stdout.take() else {
            shell::kill_group(&mut child);
            let _ = child.wait();
            return Err(SessionError::Spawn {
                host,
                operation: "exec",
                source: std::io::Error::other("stdout was not captured"),
            });
        };
        self.state = SessionState::Streaming;

        let ctx = LineContext {
            host: Arc::from(host.as_str()),
            path: Arc::from(self.target.path.as_str()),
            timezone: Arc::from(timezone.as_str()),
        };
        let stderr_logger = child
            .stderr
            .take()
            .map(|e| ingest::spawn_stderr_logger(e, Arc::clone(&ctx.host)));
        let mut ingestion = Some(ingest::spawn(stdout, ctx, lines, session.clone()));
        let mut ingest_outcome: Option<IngestOutcome> = None;

        let termination = supervise(&mut child, &session, &mut ingestion, &mut ingest_outcome);

        // Reap stragglers that inherited the pipe after the leader exited.
        shell::kill_group(&mut child);
        if let Some(handle) = ingestion.take() {
            ingest_outcome = Some(join_ingestion(handle));
        }
        if let Some(handle) = stderr_logger {
            let _ = handle.join();
        }

        let termination = termination.map_err(|source| SessionError::Wait {
            host: host.clone(),
            source,
        })?;

        if session.is_parent_cancelled() {
            tracing::info!(host = %host, path = %self.target.path, "Session cancelled");
            return Ok(ExecOutcome::Cancelled);
        }

        match ingest_outcome {
            Some(IngestOutcome::ReadError { source, .. }) => {
                return Err(SessionError::StreamRead {
                    host,
                    path: self.target.path.clone(),
                    source,
                })
            }
            Some(IngestOutcome::ConsumerGone { lines }) => {
                tracing::debug!(host = %host, lines, "Consumer stopped reading; session released");
                return Ok(ExecOutcome::Cancelled);
            }
            _ => {}
        }

        match termination {
            Termination::Exited(status) if status.success() => Ok(ExecOutcome::Completed),
            Termination::Exited(status) => Err(SessionError::CommandFailed {
                host,
                path: self.target.path.clone(),
                code: status.code(),
            }),
            Termination::Killed => {
                tracing::warn!(
                    host = %host,
                    path = %self.target.path,
                    "Remote command kept running after its output closed; closed forcibly"
                );
                Ok(ExecOutcome::Completed)
            }
        }
    }

    /// Copy one remote file to `<dst_dir>/<host>/<remote_file>`.
    ///
    /// Does not consume the client's single primary command. A cancelled copy
    /// removes its partial output.
    pub fn copy(
        &self,
        remote_file: &str,
        dst_dir: &Path,
        cancel: &CancelToken,
    ) -> crate::util::error::Result<ExecOutcome> {
        let dst = self.copy_destination(remote_file, dst_dir);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|source| HarvestError::Io {
                path: parent.to_path_buf(),
                operation: "create directory",
                source,
            })?;
        }
        let file = fs::File::create(&dst).map_err(|source| HarvestError::Io {
            path: dst.clone(),
            operation: "create file",
            source,
        })?;

        let host = self.target.host.clone();
        let mut cmd = self.shell.command(&self.commands.cat(remote_file));
        cmd.stdout(Stdio::from(file)).stderr(Stdio::piped());
        let mut child = shell::spawn_in_group(&mut cmd).map_err(|source| SessionError::Spawn {
            host: host.clone(),
            operation: "copy",
            source,
        })?;

        let status = wait_or_cancel(&mut child, cancel).map_err(|source| SessionError::Wait {
            host: host.clone(),
            source,
        })?;
        match status {
            None => {
                let _ = fs::remove_file(&dst);
                Ok(ExecOutcome::Cancelled)
            }
            Some(status) if status.success() => {
                tracing::info!(host = %host, file = remote_file, dst = %dst.display(), "Copied");
                Ok(ExecOutcome::Completed)
            }
            Some(status) => {
                let mut stderr = String::new();
                if let Some(mut e) = child.stderr.take() {
                    let _ = e.read_to_string(&mut stderr);
                }
                tracing::warn!(host = %host, file = remote_file, stderr = stderr.trim(), "Copy failed");
                let _ = fs::remove_file(&dst);
                Err(SessionError::CommandFailed {
                    host,
                    path: remote_file.to_string(),
                    code: status.code(),
                }
                .into())
            }
        }
    }

    /// Local path a copy of `remote_file` is written to. Only plain path
    /// components are kept, so a remote name cannot climb out of `dst_dir`.
    pub fn copy_destination(&self, remote_file: &str, dst_dir: &Path) -> PathBuf {
        let mut dst = dst_dir.join(&self.target.host);
        for part in Path::new(remote_file).components() {
            if let Component::Normal(p) = part {
                dst.push(p);
            }
        }
        dst
    }

    fn probe_connection(&self) -> Result<(), SessionError> {
        let output = self
            .shell
            .command(constants::CONNECT_PROBE_COMMAND)
            .output()
            .map_err(|source| SessionError::Spawn {
                host: self.target.host.clone(),
                operation: "connect",
                source,
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(SessionError::ConnectFailed {
                host: self.target.host.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }

    /// Read the remote UTC offset on a short-lived secondary session.
    fn probe_timezone(&self) -> Result<String, SessionError> {
        let host = &self.target.host;
        let output = self
            .shell
            .command(constants::TIMEZONE_PROBE_COMMAND)
            .output()
            .map_err(|source| SessionError::Spawn {
                host: host.clone(),
                operation: "timezone probe",
                source,
            })?;
        if !output.status.success() {
            return Err(SessionError::TimezoneProbe {
                host: host.clone(),
                reason: format!(
                    "'{}' exited with {:?}: {}",
                    constants::TIMEZONE_PROBE_COMMAND,
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        let tz = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if parse_offset(&tz).is_none() {
            return Err(SessionError::TimezoneProbe {
                host: host.clone(),
                reason: format!("unexpected offset '{tz}'"),
            });
        }
        Ok(tz)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shell.close();
    }
}

// =============================================================================
// Process supervision
// =============================================================================

/// Poll `child` until it exits, the session's parent token fires, or
/// ingestion ends and the drain grace period runs out.
fn supervise(
    child: &mut Child,
    session: &CancelToken,
    ingestion: &mut Option<JoinHandle<IngestOutcome>>,
    outcome: &mut Option<IngestOutcome>,
) -> std::io::Result<Termination> {
    let poll = Duration::from_millis(constants::SESSION_POLL_INTERVAL_MS);
    let grace = Duration::from_millis(constants::SESSION_DRAIN_GRACE_MS);
    let mut drain_deadline: Option<Instant> = None;

    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Termination::Exited(status)),
            Ok(None) => {}
            Err(e) => {
                shell::kill_group(child);
                let _ = child.wait();
                return Err(e);
            }
        }

        if session.is_parent_cancelled() {
            shell::kill_group(child);
            child.wait()?;
            return Ok(Termination::Killed);
        }

        if session.is_cancelled() {
            if outcome.is_none() && ingestion.as_ref().is_some_and(|h| h.is_finished()) {
                if let Some(handle) = ingestion.take() {
                    *outcome = Some(join_ingestion(handle));
                }
            }
            // Output fully read: give the command a moment to exit cleanly.
            // Read error or consumer gone: close now.
            let deadline = match outcome {
                Some(IngestOutcome::Eof { .. }) => {
                    *drain_deadline.get_or_insert_with(|| Instant::now() + grace)
                }
                Some(_) => Instant::now(),
                None => Instant::now() + poll,
            };
            if Instant::now() >= deadline {
                shell::kill_group(child);
                child.wait()?;
                return Ok(Termination::Killed);
            }
        }

        std::thread::sleep(poll);
    }
}

/// Wait for a helper process, killing it if `cancel` fires first.
/// Returns `None` when cancelled.
fn wait_or_cancel(child: &mut Child, cancel: &CancelToken) -> std::io::Result<Option<ExitStatus>> {
    let poll = Duration::from_millis(constants::SESSION_POLL_INTERVAL_MS);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if cancel.is_cancelled() {
            shell::kill_group(child);
            child.wait()?;
            return Ok(None);
        }
        std::thread::sleep(poll);
    }
}

fn join_ingestion(handle: JoinHandle<IngestOutcome>) -> IngestOutcome {
    handle.join().unwrap_or_else(|_| IngestOutcome::ReadError {
        lines: 0,
        source: std::io::Error::other("ingestion thread panicked"),
    })
}
