// harvest - main.rs
//
// `hrv` entry point. Handles:
// 1. Askpass helper mode (when re-invoked by ssh)
// 2. CLI argument parsing
// 3. config.toml loading, then logging initialisation
// 4. Dispatch to the selected subcommand
//
// Exit codes: 0 success (including Ctrl-C), 1 a target failed, 2 unusable
// configuration.

use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use harvest::app::config::{self, HarvestConfig};
use harvest::app::harvester::{HarvestOptions, Harvester, TargetReport};
use harvest::app::output::{self, OutputFormat};
use harvest::app::pipeline;
use harvest::client::session::{ExecOutcome, Operation};
use harvest::core::cancel::CancelToken;
use harvest::core::model::{Log, Target};
use harvest::platform::shell;
use harvest::util;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// hrv - harvest log lines from many hosts into one timestamped stream.
#[derive(Parser, Debug)]
#[command(name = "hrv", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory).
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Only targets carrying this tag (repeatable).
    #[arg(short = 't', long = "tag", global = true)]
    tags: Vec<String>,

    /// Environment variable holding the ssh key passphrase.
    #[arg(long = "passphrase-env", global = true, default_value = util::constants::PASSPHRASE_ENV)]
    passphrase_env: String,

    /// Print records as JSON Lines.
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug", global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read the logs of every target, oldest file first.
    Fetch {
        /// Only files modified since (RFC 3339 or "YYYY-MM-DD HH:MM:SS" UTC).
        #[arg(long, value_parser = parse_since)]
        since: Option<DateTime<Utc>>,
    },
    /// Follow every target until Ctrl-C.
    Tail,
    /// List the log files of every target.
    Ls {
        #[arg(long, value_parser = parse_since)]
        since: Option<DateTime<Utc>>,
    },
    /// Show the last lines of the newest file of every target.
    Cat,
    /// Copy every log file of every target to a local directory.
    Cp {
        /// Destination directory; files land under <DST>/<host>/<path>.
        #[arg(long)]
        dst: PathBuf,
        #[arg(long, value_parser = parse_since)]
        since: Option<DateTime<Utc>>,
    },
    /// Print the resolved targets.
    Targets,
}

fn parse_since(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| ndt.and_utc())
        .map_err(|_| format!("'{s}' is not RFC 3339 or \"YYYY-MM-DD HH:MM:SS\""))
}

fn main() -> ExitCode {
    if shell::run_askpass_if_requested() {
        return ExitCode::SUCCESS;
    }

    let cli = Cli::parse();

    let Some(config_path) = cli.config.clone().or_else(config::default_config_path) else {
        util::logging::init(cli.debug, None);
        eprintln!("Error: no --config given and no platform config directory available");
        return ExitCode::from(2);
    };

    let (mut config, warnings) = match config::load_config(&config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            util::logging::init(cli.debug, None);
            tracing::error!(error = %e, "Configuration rejected");
            eprintln!("Error: {e}");
            return ExitCode::from(2);
        }
    };

    util::logging::init(cli.debug, config.log_level.as_deref());
    tracing::info!(
        version = util::constants::APP_VERSION,
        config = %config_path.display(),
        "hrv starting"
    );
    for w in &warnings {
        tracing::warn!("{w}");
    }

    config.targets = config::filter_targets(std::mem::take(&mut config.targets), &cli.tags);
    if config.targets.is_empty() {
        eprintln!("Error: no targets match tags {:?}", cli.tags);
        return ExitCode::from(2);
    }
    if let Ok(secret) = std::env::var(&cli.passphrase_env) {
        config::apply_passphrase(&mut config.targets, secret.as_bytes());
    }

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Interrupt received; shutting down");
        handler_token.cancel();
    }) {
        tracing::warn!(error = %e, "Could not install Ctrl-C handler");
    }

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let reports = match cli.command {
        Command::Fetch { since } => stream(&config, Operation::Read { since }, format, &cancel),
        Command::Tail => stream(&config, Operation::Tailf, format, &cancel),
        Command::Ls { since } => stream(&config, Operation::Ls { since }, format, &cancel),
        Command::Cat => stream(&config, Operation::RandomOne, format, &cancel),
        Command::Cp { dst, since } => copy(&config, &dst, since, &cancel),
        Command::Targets => return print_targets(&config.targets, format),
    };

    summarise(&reports)
}

/// Run `op` on every target and print records as they arrive.
fn stream(
    config: &HarvestConfig,
    op: Operation,
    format: OutputFormat,
    cancel: &CancelToken,
) -> Vec<TargetReport> {
    let harvester = Harvester::start(shared(&config.targets), op, &options(config), cancel);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for log in harvester.logs().iter() {
        let written = output::write_record(&mut out, &log, format).and_then(|()| out.flush());
        if let Err(e) = written {
            // Broken pipe (`hrv fetch | head`) ends the run quietly.
            tracing::debug!(error = %e, "stdout closed; stopping");
            cancel.cancel();
            break;
        }
    }
    harvester.wait()
}

/// List files of every target, then copy them under `dst`.
fn copy(
    config: &HarvestConfig,
    dst: &std::path::Path,
    since: Option<DateTime<Utc>>,
    cancel: &CancelToken,
) -> Vec<TargetReport> {
    let targets = shared(&config.targets);
    let harvester = Harvester::start(targets.clone(), Operation::Ls { since }, &options(config), cancel);

    let mut files = group_by_target(harvester.logs().iter());
    let mut reports = harvester.wait();

    for report in reports.iter_mut() {
        if report.result.is_err() || cancel.is_cancelled() {
            continue;
        }
        let listed = files
            .remove(&Arc::as_ptr(&report.target))
            .unwrap_or_default();
        match pipeline::copy_files(
            Arc::clone(&report.target),
            &listed,
            dst,
            &config.transport,
            cancel,
        ) {
            Ok(summary) => {
                tracing::info!(
                    host = %report.target.host,
                    copied = summary.copied,
                    failed = summary.failed,
                    "Copy finished"
                );
                report.records = summary.copied as u64;
                if summary.cancelled {
                    report.result = Ok(ExecOutcome::Cancelled);
                }
            }
            Err(e) => report.result = Err(e),
        }
    }
    reports
}

/// Listed paths per target. Keyed by target identity: two target sets may
/// share a URL and must not copy each other's files.
fn group_by_target(logs: impl Iterator<Item = Log>) -> HashMap<*const Target, Vec<String>> {
    let mut files: HashMap<*const Target, Vec<String>> = HashMap::new();
    for log in logs {
        files
            .entry(Arc::as_ptr(&log.target))
            .or_default()
            .push(log.content);
    }
    files
}

fn print_targets(targets: &[Target], format: OutputFormat) -> ExitCode {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for t in targets {
        let line = match format {
            OutputFormat::Json => serde_json::to_string(t).unwrap_or_default(),
            OutputFormat::Text => format!(
                "{}\t{}\ttags={}\t{}",
                t.url,
                match t.parser {
                    harvest::core::model::ParserKind::None if t.multi_line => "none+multiline",
                    harvest::core::model::ParserKind::None => "none",
                    harvest::core::model::ParserKind::Regexp => "regexp",
                },
                t.tags.join(","),
                t.description
            ),
        };
        if writeln!(out, "{line}").is_err() {
            break;
        }
    }
    ExitCode::SUCCESS
}

fn shared(targets: &[Target]) -> Vec<Arc<Target>> {
    targets.iter().cloned().map(Arc::new).collect()
}

fn options(config: &HarvestConfig) -> HarvestOptions {
    HarvestOptions {
        transport: config.transport.clone(),
        parser: config.parser.clone(),
    }
}

fn summarise(reports: &[TargetReport]) -> ExitCode {
    let mut failed = 0usize;
    for r in reports {
        if let Err(e) = &r.result {
            failed += 1;
            eprintln!("Error: {}: {e}", r.target.url);
        }
    }
    tracing::info!(
        targets = reports.len(),
        failed,
        records = reports.iter().map(|r| r.records).sum::<u64>(),
        "hrv finished"
    );
    if failed > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}
