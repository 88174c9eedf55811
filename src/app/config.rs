// harvest - app/config.rs
//
// config.toml loading, validation, and target resolution.
//
// A config file declares global settings plus any number of `[[target_sets]]`.
// Each target set carries parsing rules and a list of URLs; every URL resolves
// to one `Target` that inherits the set's rules.
//
// Validation follows two rules:
//   - Tunables outside their allowed range produce a warning and fall back to
//     their default. The run continues.
//   - Anything that makes a target unusable (bad URL, unknown scheme, missing
//     path, regexp that does not compile) is a hard error.

use crate::client::session::TransportConfig;
use crate::core::model::{unique_tags, ParserKind, Scheme, Target};
use crate::core::parser::ParserConfig;
use crate::util::constants;
use crate::util::error::ConfigError;
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

// =============================================================================
// Raw file shape
// =============================================================================

/// Raw deserialisable shape of config.toml.
///
/// Unknown keys are ignored so a newer config file still loads.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    /// `[logging]` section.
    pub logging: LoggingSection,
    /// `[remote]` section.
    pub remote: RemoteSection,
    /// `[parsing]` section.
    pub parsing: ParsingSection,
    /// `[[target_sets]]` array.
    #[serde(alias = "targetSets")]
    pub target_sets: Vec<TargetSetDef>,
}

/// `[logging]` config section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: Option<String>,
}

/// `[remote]` config section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    /// OpenSSH client executable.
    pub ssh_command: Option<String>,
    /// Access files through `sudo -n`.
    pub sudo: Option<bool>,
    /// ssh `ConnectTimeout` in seconds.
    pub connect_timeout_secs: Option<u64>,
}

/// `[parsing]` config section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ParsingSection {
    /// Continuation lines held before a multi-line record is force-flushed.
    pub max_content_stash: Option<usize>,
}

/// One `[[target_sets]]` entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TargetSetDef {
    pub description: String,
    #[serde(rename = "type")]
    pub parser: ParserKind,
    pub regexp: String,
    #[serde(alias = "multiLine")]
    pub multi_line: bool,
    #[serde(alias = "timeFormat")]
    pub time_format: String,
    #[serde(alias = "timeZone")]
    pub time_zone: String,
    pub tags: Vec<String>,
    pub urls: Vec<String>,
}

// =============================================================================
// Validated configuration
// =============================================================================

/// Validated configuration derived from config.toml.
#[derive(Debug, Clone, Default)]
pub struct HarvestConfig {
    /// Every resolved target, in file order.
    pub targets: Vec<Target>,
    pub transport: TransportConfig,
    pub parser: ParserConfig,
    /// Logging level string (for init before tracing is available).
    pub log_level: Option<String>,
}

/// Default config file location (e.g. `~/.config/harvest/config.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", constants::APP_ID)
        .map(|dirs| dirs.config_dir().join(constants::CONFIG_FILE_NAME))
}

/// Load and validate the config file at `path`.
///
/// Returns the configuration and a list of non-fatal warnings.
pub fn load_config(path: &Path) -> Result<(HarvestConfig, Vec<String>), ConfigError> {
    let meta = std::fs::metadata(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if meta.len() > constants::MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::FileTooLarge {
            path: path.to_path_buf(),
            size: meta.len(),
            max_size: constants::MAX_CONFIG_FILE_SIZE,
        });
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let result = parse_config(&content, path)?;
    tracing::info!(
        path = %path.display(),
        targets = result.0.targets.len(),
        "Loaded config"
    );
    Ok(result)
}

/// Validate config text. `path` is used for error messages only.
pub fn parse_config(
    content: &str,
    path: &Path,
) -> Result<(HarvestConfig, Vec<String>), ConfigError> {
    let raw: RawConfig = toml::from_str(content).map_err(|source| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut warnings: Vec<String> = Vec::new();
    let mut config = HarvestConfig::default();

    // -- Logging: level --
    if let Some(ref level) = raw.logging.level {
        let valid = ["error", "warn", "info", "debug", "trace"];
        if valid.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level.to_lowercase());
        } else {
            warnings.push(format!(
                "[logging] level = \"{level}\" is not recognised. \
                 Valid values: error, warn, info, debug, trace. Using default ({}).",
                constants::DEFAULT_LOG_LEVEL,
            ));
        }
    }

    // -- Remote: ssh_command --
    if let Some(ref cmd) = raw.remote.ssh_command {
        if cmd.trim().is_empty() {
            warnings.push(format!(
                "[remote] ssh_command is empty. Using default ({}).",
                constants::DEFAULT_SSH_COMMAND,
            ));
        } else {
            config.transport.ssh_command = cmd.trim().to_string();
        }
    }

    // -- Remote: sudo --
    if let Some(sudo) = raw.remote.sudo {
        config.transport.sudo = sudo;
    }

    // -- Remote: connect_timeout_secs --
    if let Some(secs) = raw.remote.connect_timeout_secs {
        if (constants::MIN_CONNECT_TIMEOUT_SECS..=constants::MAX_CONNECT_TIMEOUT_SECS)
            .contains(&secs)
        {
            config.transport.connect_timeout_secs = secs;
        } else {
            warnings.push(format!(
                "[remote] connect_timeout_secs = {secs} is out of range ({}-{}). Using default ({}).",
                constants::MIN_CONNECT_TIMEOUT_SECS,
                constants::MAX_CONNECT_TIMEOUT_SECS,
                constants::DEFAULT_CONNECT_TIMEOUT_SECS,
            ));
        }
    }

    // -- Parsing: max_content_stash --
    if let Some(max) = raw.parsing.max_content_stash {
        if (constants::MIN_MAX_CONTENT_STASH..=constants::ABSOLUTE_MAX_CONTENT_STASH).contains(&max)
        {
            config.parser.max_content_stash = max;
        } else {
            warnings.push(format!(
                "[parsing] max_content_stash = {max} is out of range ({}-{}). Using default ({}).",
                constants::MIN_MAX_CONTENT_STASH,
                constants::ABSOLUTE_MAX_CONTENT_STASH,
                constants::DEFAULT_MAX_CONTENT_STASH,
            ));
        }
    }

    // -- Target sets --
    for (index, set) in raw.target_sets.iter().enumerate() {
        if set.urls.is_empty() {
            warnings.push(format!(
                "[[target_sets]] #{} ({}) has no urls and was skipped.",
                index + 1,
                if set.description.is_empty() {
                    "no description"
                } else {
                    set.description.as_str()
                },
            ));
            continue;
        }
        if set.parser == ParserKind::Regexp && set.multi_line {
            warnings.push(format!(
                "[[target_sets]] #{}: multi_line is ignored for type = \"regexp\".",
                index + 1,
            ));
        }
        for url in &set.urls {
            config.targets.push(resolve_target(url, set)?);
        }
    }

    if config.targets.is_empty() {
        return Err(ConfigError::NoTargets {
            path: path.to_path_buf(),
        });
    }

    if !warnings.is_empty() {
        tracing::warn!(
            count = warnings.len(),
            "Config validation produced warnings"
        );
    }

    Ok((config, warnings))
}

/// Resolve one URL into a target carrying `set`'s parsing rules.
///
/// Accepted forms:
///   - `ssh://[user@]host[:port]/path`
///   - `file:///path`
pub fn resolve_target(url: &str, set: &TargetSetDef) -> Result<Target, ConfigError> {
    let parsed = Url::parse(url).map_err(|source| ConfigError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;

    let scheme = match parsed.scheme() {
        "ssh" => Scheme::Ssh,
        "file" => Scheme::File,
        other => {
            return Err(ConfigError::UnsupportedScheme {
                url: url.to_string(),
                scheme: other.to_string(),
            })
        }
    };

    let host = match scheme {
        Scheme::Ssh => match parsed.host_str() {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => {
                return Err(ConfigError::MissingHost {
                    url: url.to_string(),
                })
            }
        },
        Scheme::File => "localhost".to_string(),
    };

    let path = percent_encoding::percent_decode_str(parsed.path())
        .decode_utf8_lossy()
        .into_owned();
    if path.is_empty() || path == "/" {
        return Err(ConfigError::EmptyPath {
            url: url.to_string(),
        });
    }

    if set.parser == ParserKind::Regexp {
        regex::Regex::new(&set.regexp).map_err(|source| ConfigError::InvalidRegex {
            url: url.to_string(),
            pattern: set.regexp.clone(),
            source,
        })?;
    }

    let user = match parsed.username() {
        "" => None,
        u => Some(
            percent_encoding::percent_decode_str(u)
                .decode_utf8_lossy()
                .into_owned(),
        ),
    };
    if parsed.password().is_some() {
        tracing::warn!(url = %redact_password(&parsed), "Password in target URL is ignored");
    }

    Ok(Target {
        url: redact_password(&parsed),
        description: set.description.clone(),
        parser: set.parser,
        regexp: set.regexp.clone(),
        multi_line: set.multi_line,
        time_format: set.time_format.clone(),
        time_zone: set.time_zone.clone(),
        tags: unique_tags(&set.tags),
        scheme,
        host,
        user,
        port: parsed.port().unwrap_or(0),
        path,
        ssh_key_passphrase: Vec::new(),
    })
}

fn redact_password(url: &Url) -> String {
    let mut url = url.clone();
    if url.password().is_some() {
        let _ = url.set_password(None);
    }
    url.to_string()
}

/// Keep only targets carrying at least one of `tags`. No tags keeps all.
pub fn filter_targets(targets: Vec<Target>, tags: &[String]) -> Vec<Target> {
    if tags.is_empty() {
        return targets;
    }
    targets.into_iter().filter(|t| t.has_any_tag(tags)).collect()
}

/// Attach a key passphrase to every `ssh://` target.
pub fn apply_passphrase(targets: &mut [Target], passphrase: &[u8]) {
    for target in targets.iter_mut().filter(|t| t.scheme == Scheme::Ssh) {
        target.ssh_key_passphrase = passphrase.to_vec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<(HarvestConfig, Vec<String>), ConfigError> {
        parse_config(content, Path::new("test.toml"))
    }

    const BASIC: &str = r#"
[logging]
level = "debug"

[remote]
sudo = true
connect_timeout_secs = 5

[parsing]
max_content_stash = 50

[[target_sets]]
description = "nginx access"
type = "regexp"
regexp = '^\S+ \S+ \S+ \[([^\]]+)\]'
time_format = "%d/%b/%Y:%H:%M:%S %z"
tags = ["web", "nginx", "web"]
urls = [
    "ssh://deploy@web-1:2222/var/log/nginx/access*.log",
    "ssh://web-2/var/log/nginx/access.log",
]

[[target_sets]]
description = "app"
multi_line = true
tags = ["app"]
urls = ["file:///var/log/app/app.log"]
"#;

    #[test]
    fn test_basic_config_resolves_all_targets() {
        let (config, warnings) = parse(BASIC).unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert!(config.transport.sudo);
        assert_eq!(config.transport.connect_timeout_secs, 5);
        assert_eq!(config.parser.max_content_stash, 50);
        assert_eq!(config.targets.len(), 3);

        let web1 = &config.targets[0];
        assert_eq!(web1.scheme, Scheme::Ssh);
        assert_eq!(web1.host, "web-1");
        assert_eq!(web1.user.as_deref(), Some("deploy"));
        assert_eq!(web1.port, 2222);
        assert_eq!(web1.path, "/var/log/nginx/access*.log");
        assert_eq!(web1.parser, ParserKind::Regexp);
        assert_eq!(web1.tags, vec!["web", "nginx"]);

        let web2 = &config.targets[1];
        assert_eq!(web2.user, None);
        assert_eq!(web2.port, 0);

        let app = &config.targets[2];
        assert_eq!(app.scheme, Scheme::File);
        assert_eq!(app.host, "localhost");
        assert_eq!(app.path, "/var/log/app/app.log");
        assert!(app.multi_line);
        assert_eq!(app.parser, ParserKind::None);
    }

    #[test]
    fn test_camel_case_keys_accepted() {
        let (config, _) = parse(
            r#"
[[targetSets]]
multiLine = true
timeFormat = "%Y-%m-%d"
timeZone = "+0900"
urls = ["file:///tmp/a.log"]
"#,
        )
        .unwrap();
        let t = &config.targets[0];
        assert!(t.multi_line);
        assert_eq!(t.time_format, "%Y-%m-%d");
        assert_eq!(t.time_zone, "+0900");
    }

    #[test]
    fn test_out_of_range_values_warn_and_default() {
        let (config, warnings) = parse(
            r#"
[logging]
level = "loud"
[remote]
connect_timeout_secs = 0
[parsing]
max_content_stash = 0
[[target_sets]]
urls = ["file:///tmp/a.log"]
"#,
        )
        .unwrap();
        assert_eq!(warnings.len(), 3, "{warnings:?}");
        assert_eq!(config.log_level, None);
        assert_eq!(
            config.transport.connect_timeout_secs,
            constants::DEFAULT_CONNECT_TIMEOUT_SECS
        );
        assert_eq!(
            config.parser.max_content_stash,
            constants::DEFAULT_MAX_CONTENT_STASH
        );
    }

    #[test]
    fn test_unsupported_scheme_is_error() {
        let err = parse("[[target_sets]]\nurls = [\"http://host/var/log/x\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedScheme { ref scheme, .. } if scheme == "http"));
    }

    #[test]
    fn test_invalid_url_is_error() {
        let err = parse("[[target_sets]]\nurls = [\"not a url\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn test_missing_path_is_error() {
        let err = parse("[[target_sets]]\nurls = [\"ssh://web-1\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyPath { .. }));
    }

    #[test]
    fn test_invalid_regexp_is_error() {
        let err = parse(
            "[[target_sets]]\ntype = \"regexp\"\nregexp = \"([\"\nurls = [\"file:///tmp/a.log\"]\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRegex { .. }));
    }

    #[test]
    fn test_no_targets_is_error() {
        assert!(matches!(
            parse("[logging]\nlevel = \"info\"\n").unwrap_err(),
            ConfigError::NoTargets { .. }
        ));
    }

    #[test]
    fn test_empty_set_warns_and_is_skipped() {
        let (config, warnings) = parse(
            "[[target_sets]]\ndescription = \"empty\"\n\n[[target_sets]]\nurls = [\"file:///tmp/a.log\"]\n",
        )
        .unwrap();
        assert_eq!(config.targets.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("empty"));
    }

    #[test]
    fn test_password_is_dropped_from_url() {
        let target =
            resolve_target("ssh://bob:pw@web-1/var/log/syslog", &TargetSetDef::default()).unwrap();
        assert!(!target.url.contains("pw"));
        assert_eq!(target.user.as_deref(), Some("bob"));
    }

    #[test]
    fn test_percent_encoded_path_is_decoded() {
        let target =
            resolve_target("file:///var/log/my%20app.log", &TargetSetDef::default()).unwrap();
        assert_eq!(target.path, "/var/log/my app.log");
    }

    #[test]
    fn test_filter_targets_by_tag() {
        let (config, _) = parse(BASIC).unwrap();
        let web = filter_targets(config.targets.clone(), &["nginx".to_string()]);
        assert_eq!(web.len(), 2);
        let all = filter_targets(config.targets.clone(), &[]);
        assert_eq!(all.len(), 3);
        assert!(filter_targets(config.targets, &["db".to_string()]).is_empty());
    }

    #[test]
    fn test_passphrase_only_reaches_ssh_targets() {
        let (mut config, _) = parse(BASIC).unwrap();
        apply_passphrase(&mut config.targets, b"pw");
        assert_eq!(config.targets[0].ssh_key_passphrase, b"pw");
        assert!(config.targets[2].ssh_key_passphrase.is_empty());
    }

    #[test]
    fn test_load_config_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
