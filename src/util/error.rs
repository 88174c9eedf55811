// harvest - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// Every variant names the host, path, or file it concerns so a failure in one
// target pipeline can be reported without guessing which target it came from.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all harvest operations.
/// Errors are categorised by the subsystem that produced them.
#[derive(Debug)]
pub enum HarvestError {
    /// Configuration loading or target resolution failed.
    Config(ConfigError),

    /// A remote (or local) shell session failed.
    Session(SessionError),

    /// A parser could not be constructed.
    Parse(ParseError),

    /// Local I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },
}

impl fmt::Display for HarvestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::Session(e) => write!(f, "Session error: {e}"),
            Self::Parse(e) => write!(f, "Parser error: {e}"),
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {operation} on '{}': {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for HarvestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Session(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Io { source, .. } => Some(source),
        }
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading and URL-to-target resolution.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading the config file.
    Io { path: PathBuf, source: io::Error },

    /// Config file exceeds the maximum allowed size.
    FileTooLarge {
        path: PathBuf,
        size: u64,
        max_size: u64,
    },

    /// TOML parsing failed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A target URL could not be parsed.
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    /// A target URL uses a scheme with no session backend.
    UnsupportedScheme { url: String, scheme: String },

    /// An `ssh://` URL has no host component.
    MissingHost { url: String },

    /// A target URL has no log path.
    EmptyPath { url: String },

    /// A `regexp` target set carries a pattern that does not compile.
    InvalidRegex {
        url: String,
        pattern: String,
        source: regex::Error,
    },

    /// No targets remain after loading (and filtering).
    NoTargets { path: PathBuf },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "Config I/O error '{}': {source}", path.display())
            }
            Self::FileTooLarge {
                path,
                size,
                max_size,
            } => write!(
                f,
                "Config '{}' is {size} bytes, exceeds maximum of {max_size} bytes",
                path.display()
            ),
            Self::TomlParse { path, source } => {
                write!(f, "Config parse error '{}': {source}", path.display())
            }
            Self::InvalidUrl { url, source } => write!(f, "Invalid target URL '{url}': {source}"),
            Self::UnsupportedScheme { url, scheme } => write!(
                f,
                "Target URL '{url}': unsupported scheme '{scheme}' (expected ssh or file)"
            ),
            Self::MissingHost { url } => write!(f, "Target URL '{url}': missing host"),
            Self::EmptyPath { url } => write!(f, "Target URL '{url}': missing log path"),
            Self::InvalidRegex {
                url,
                pattern,
                source,
            } => write!(f, "Target '{url}': invalid regexp '{pattern}': {source}"),
            Self::NoTargets { path } => {
                write!(f, "Config '{}' resolves to no targets", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::TomlParse { source, .. } => Some(source),
            Self::InvalidUrl { source, .. } => Some(source),
            Self::InvalidRegex { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for HarvestError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

/// Errors raised by the session transport. All of them are fatal to the run
/// of the target they name; other targets are unaffected.
#[derive(Debug)]
pub enum SessionError {
    /// The shell process could not be spawned.
    Spawn {
        host: String,
        operation: &'static str,
        source: io::Error,
    },

    /// The connect probe ran but the target was not reachable.
    ConnectFailed {
        host: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The remote UTC offset could not be determined.
    TimezoneProbe { host: String, reason: String },

    /// The remote command exited unsuccessfully on its own.
    CommandFailed {
        host: String,
        path: String,
        code: Option<i32>,
    },

    /// Reading the remote command's output failed mid-stream.
    StreamRead {
        host: String,
        path: String,
        source: io::Error,
    },

    /// Waiting on (or killing) the session process failed.
    Wait { host: String, source: io::Error },

    /// `exec` was called on a client that already ran its command.
    InvalidState { host: String, state: &'static str },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn {
                host,
                operation,
                source,
            } => write!(f, "{host}: failed to spawn shell for {operation}: {source}"),
            Self::ConnectFailed { host, code, stderr } => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                if stderr.trim().is_empty() {
                    write!(f, "{host}: connection failed (exit {code})")
                } else {
                    write!(
                        f,
                        "{host}: connection failed (exit {code}): {}",
                        stderr.trim()
                    )
                }
            }
            Self::TimezoneProbe { host, reason } => {
                write!(f, "{host}: cannot determine remote timezone: {reason}")
            }
            Self::CommandFailed { host, path, code } => match code {
                Some(c) => write!(f, "{host}:{path}: remote command exited with status {c}"),
                None => write!(f, "{host}:{path}: remote command terminated by signal"),
            },
            Self::StreamRead { host, path, source } => {
                write!(f, "{host}:{path}: stream read failed: {source}")
            }
            Self::Wait { host, source } => {
                write!(f, "{host}: failed to wait on session: {source}")
            }
            Self::InvalidState { host, state } => write!(
                f,
                "{host}: cannot start a command on a session in state '{state}'"
            ),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn { source, .. } => Some(source),
            Self::StreamRead { source, .. } => Some(source),
            Self::Wait { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<SessionError> for HarvestError {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

// ---------------------------------------------------------------------------
// Parse errors
// ---------------------------------------------------------------------------

/// Errors raised while constructing a parser. Per-line problems never surface
/// here: a line that cannot be timestamped degrades to timestamp 0.
#[derive(Debug)]
pub enum ParseError {
    /// The pattern does not compile.
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },

    /// The pattern exceeds the maximum allowed length.
    RegexTooLong { length: usize, max_length: usize },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRegex { pattern, source } => {
                write!(f, "invalid regexp '{pattern}': {source}")
            }
            Self::RegexTooLong { length, max_length } => write!(
                f,
                "regexp is {length} chars, exceeds maximum of {max_length}"
            ),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidRegex { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ParseError> for HarvestError {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

/// Convenience type alias for harvest results.
pub type Result<T> = std::result::Result<T, HarvestError>;
