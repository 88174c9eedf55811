// harvest - util/constants.rs
//
// Single source of truth for named constants, limits, and defaults.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "harvest";

/// Application identifier used for config directories.
pub const APP_ID: &str = "harvest";

/// Current application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Parsing limits
// =============================================================================

/// Default number of continuation lines a multi-line stash may hold before it
/// is force-flushed together with the overflow marker.
pub const DEFAULT_MAX_CONTENT_STASH: usize = 1_000;

/// Minimum user-configurable stash threshold.
pub const MIN_MAX_CONTENT_STASH: usize = 1;

/// Maximum user-configurable stash threshold.
pub const ABSOLUTE_MAX_CONTENT_STASH: usize = 100_000;

/// Content of the synthetic record emitted after a forced stash flush.
pub const TOO_MANY_ROWS_MARKER: &str = "Harvest parse error: too many rows";

/// Maximum regex pattern length to prevent ReDoS.
pub const MAX_REGEX_PATTERN_LENGTH: usize = 4_096;

/// Maximum bytes kept for a single physical output line. Longer lines are
/// truncated so a stream with no newlines cannot grow the read buffer forever.
pub const MAX_LINE_BYTES: usize = 1024 * 1024; // 1 MiB

/// Suffix appended to a truncated line.
pub const TRUNCATED_SUFFIX: &str = "... [truncated]";

// =============================================================================
// Remote sessions
// =============================================================================

/// Default OpenSSH client executable.
pub const DEFAULT_SSH_COMMAND: &str = "ssh";

/// Default ssh `ConnectTimeout` in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Minimum user-configurable connect timeout (seconds).
pub const MIN_CONNECT_TIMEOUT_SECS: u64 = 1;

/// Maximum user-configurable connect timeout (seconds).
pub const MAX_CONNECT_TIMEOUT_SECS: u64 = 300;

/// Seconds an idle multiplexed master connection stays alive.
pub const SSH_CONTROL_PERSIST_SECS: u64 = 60;

/// Command used to read the remote wall-clock UTC offset (`±HHMM`).
pub const TIMEZONE_PROBE_COMMAND: &str = "date +%z";

/// Command run by `connect` to verify the target is reachable.
pub const CONNECT_PROBE_COMMAND: &str = "true";

/// How often a running session checks for process exit and cancellation (ms).
pub const SESSION_POLL_INTERVAL_MS: u64 = 50;

/// Grace period granted to a remote command after its output closed before
/// the session is force-closed (ms).
pub const SESSION_DRAIN_GRACE_MS: u64 = 2_000;

/// Number of lines `random_one` samples from the newest file.
pub const SAMPLE_LINES: usize = 100;

/// Environment variable consulted for the private key passphrase.
pub const PASSPHRASE_ENV: &str = "HARVEST_SSH_KEY_PASSPHRASE";

/// Internal environment variable through which the askpass helper receives
/// the passphrase from the parent process.
pub const ASKPASS_SECRET_ENV: &str = "HARVEST_ASKPASS_SECRET";

// =============================================================================
// Harvester
// =============================================================================

/// Capacity of the fan-in channel shared by all target pipelines.
pub const FAN_IN_CHANNEL_CAPACITY: usize = 1_024;

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Maximum length of a log line included in debug output.
pub const DEBUG_MAX_LINE_PREVIEW: usize = 200;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration file name looked up in the platform config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Maximum size of a configuration file in bytes.
pub const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024; // 1 MiB
