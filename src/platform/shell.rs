// harvest - platform/shell.rs
//
// Shell backends: how a command string becomes an OS process that runs it on
// a target.
//
// - `OpenSsh` runs the command on a remote host through the system `ssh`
//   client. Each `OpenSsh` owns one multiplexed master connection
//   (ControlMaster), so the connect probe, the timezone probe and the primary
//   command ride a single authenticated connection. Masters are never shared
//   between clients: closing one client must not cut another's stream.
// - `LocalShell` runs the command through `sh -c` on this machine, for
//   `file://` targets.
//
// Processes are spawned as leaders of their own process group so a forced
// close reaches every process of a pipeline (`find | xargs | zcat`) and the
// stdout pipe is guaranteed to close.
//
// # Security notes
// - A key passphrase reaches `ssh` only through the askpass helper (this
//   binary re-invoked with `ASKPASS_SECRET_ENV` set). It never appears on a
//   command line and is never logged.

use crate::util::constants;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};

/// Distinguishes the control sockets of clients within one process.
static NEXT_CONTROL_ID: AtomicU64 = AtomicU64::new(0);

/// A way of running shell command text on one target.
pub trait Shell: Send + Sync + fmt::Debug {
    /// Host label used in records, logs, and errors.
    fn host(&self) -> &str;

    /// Build a process that runs `script` on the target. Stdin is null;
    /// callers choose stdout/stderr handling.
    fn command(&self, script: &str) -> Command;

    /// Release any connection state held for the target.
    fn close(&self) {}
}

// =============================================================================
// OpenSSH
// =============================================================================

/// Options for reaching a host through the OpenSSH client.
#[derive(Clone)]
pub struct OpenSshOptions {
    pub program: String,
    pub host: String,
    pub user: Option<String>,
    /// 0 means the client default.
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub passphrase: Vec<u8>,
}

/// Remote shell over the system `ssh` binary.
pub struct OpenSsh {
    options: OpenSshOptions,
    control_path: PathBuf,
}

impl OpenSsh {
    pub fn new(options: OpenSshOptions) -> Self {
        // `%C` is expanded by ssh to a hash of host, port, and user. The
        // client id keeps two clients for one destination on separate masters.
        let id = NEXT_CONTROL_ID.fetch_add(1, Ordering::Relaxed);
        let control_path =
            std::env::temp_dir().join(format!("hrv-{}-{id}-%C", std::process::id()));
        Self {
            options,
            control_path,
        }
    }

    fn base_command(&self) -> Command {
        let o = &self.options;
        let mut cmd = Command::new(&o.program);
        cmd.arg("-T")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", o.connect_timeout_secs))
            .arg("-o")
            .arg("ControlMaster=auto")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-o")
            .arg(format!(
                "ControlPersist={}",
                constants::SSH_CONTROL_PERSIST_SECS
            ));
        if let Some(user) = &o.user {
            cmd.arg("-l").arg(user);
        }
        if o.port > 0 {
            cmd.arg("-p").arg(o.port.to_string());
        }

        if o.passphrase.is_empty() {
            // Never block on an interactive prompt.
            cmd.arg("-o").arg("BatchMode=yes");
        } else {
            match std::env::current_exe() {
                Ok(exe) => {
                    cmd.env("SSH_ASKPASS", exe)
                        .env("SSH_ASKPASS_REQUIRE", "force")
                        .env(
                            constants::ASKPASS_SECRET_ENV,
                            String::from_utf8_lossy(&o.passphrase).into_owned(),
                        );
                }
                Err(e) => {
                    tracing::warn!(
                        host = %o.host,
                        error = %e,
                        "Cannot locate own executable for askpass; passphrase unavailable"
                    );
                    cmd.arg("-o").arg("BatchMode=yes");
                }
            }
        }
        cmd.stdin(Stdio::null());
        cmd
    }
}

impl fmt::Debug for OpenSsh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenSsh")
            .field("program", &self.options.program)
            .field("host", &self.options.host)
            .field("user", &self.options.user)
            .field("port", &self.options.port)
            .field("control_path", &self.control_path)
            .finish()
    }
}

impl Shell for OpenSsh {
    fn host(&self) -> &str {
        &self.options.host
    }

    fn command(&self, script: &str) -> Command {
        let mut cmd = self.base_command();
        cmd.arg(&self.options.host).arg("--").arg(script);
        cmd
    }

    fn close(&self) {
        let mut cmd = self.base_command();
        cmd.arg("-O")
            .arg("exit")
            .arg(&self.options.host)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        match cmd.status() {
            Ok(_) => tracing::debug!(host = %self.options.host, "Master connection closed"),
            Err(e) => {
                tracing::debug!(host = %self.options.host, error = %e, "Master close failed")
            }
        }
    }
}

// =============================================================================
// Local shell
// =============================================================================

/// Runs commands on this machine through `sh -c`.
#[derive(Debug, Clone, Default)]
pub struct LocalShell;

impl Shell for LocalShell {
    fn host(&self) -> &str {
        "localhost"
    }

    fn command(&self, script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script).stdin(Stdio::null());
        cmd
    }
}

// =============================================================================
// Process groups
// =============================================================================

/// Spawn `cmd` as the leader of a new process group.
pub fn spawn_in_group(cmd: &mut Command) -> io::Result<Child> {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd.spawn()
}

/// Kill every process in `child`'s group (just `child` off Unix).
///
/// Safe to call after the leader has exited: stragglers that inherited the
/// output pipe are still reached. A group that no longer exists is not an
/// error.
pub fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Ok(pid) = i32::try_from(child.id()) else {
            let _ = child.kill();
            return;
        };
        match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => {
                tracing::debug!(pid, error = %e, "killpg failed; killing leader only");
                let _ = child.kill();
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }
}

// =============================================================================
// Askpass helper
// =============================================================================

/// If this process was started by `ssh` as the askpass helper, print the
/// passphrase and return `true`; the caller must then exit immediately.
pub fn run_askpass_if_requested() -> bool {
    match std::env::var(constants::ASKPASS_SECRET_ENV) {
        Ok(secret) if std::env::var_os("SSH_ASKPASS").is_some() => {
            println!("{secret}");
            true
        }
        _ => false,
    }
}
