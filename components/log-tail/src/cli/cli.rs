//! Command-line entry point.
//!
//! Accepts Go-style single-dash long flags (`-projectId`), layers them over an
//! optional profile, and reports the run outcome as the process result.

use crate::helpers::{load_config::Profile, shutdown::Shutdown};
use crate::runtime::runtime::{StopReason, run_log_tail};
use crate::tailer::client::GrpcConnector;
use crate::tailer::models::{ConnectionSettings, DEFAULT_ENDPOINT, RunParameters, TailError};
use anyhow::Result;
use clap::Parser;
use clap::error::ErrorKind;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;

/// Long flags that consume the following argument as their value.
const VALUE_FLAGS: &[&str] = &[
    "projectId",
    "filter",
    "process-up-time",
    "buffer-window",
    "endpoint",
    "access-token",
    "config",
];

#[derive(Debug, Parser)]
#[command(
    name = "log-tail",
    version,
    about = "Stream Cloud Logging entries for a project as they arrive",
    term_width = 100,
    after_help = "\
EXAMPLES:
    log-tail -projectId my-project
    log-tail -projectId my-project -filter 'severity>=ERROR' -process-up-time 1m30s"
)]
struct Cli {
    /// Project Id for which to tail logs
    #[arg(long = "projectId", value_name = "ID", allow_hyphen_values = true)]
    project_id: Option<String>,

    /// Filter rules to apply during log tailing
    #[arg(long = "filter", value_name = "EXPR", allow_hyphen_values = true)]
    filter: Option<String>,

    /// Time the log tailing will run, e.g. 1h or 1m30s. Empty means forever
    #[arg(long = "process-up-time", value_name = "DURATION", allow_hyphen_values = true)]
    process_up_time: Option<String>,

    /// Time the server buffers entries to order them, e.g. 5s
    #[arg(long = "buffer-window", value_name = "DURATION", allow_hyphen_values = true)]
    buffer_window: Option<String>,

    /// Logging API endpoint
    #[arg(long = "endpoint", value_name = "URL")]
    endpoint: Option<String>,

    /// OAuth2 access token, e.g. from `gcloud auth print-access-token`
    #[arg(
        long = "access-token",
        value_name = "TOKEN",
        env = "GOOGLE_OAUTH_ACCESS_TOKEN",
        hide_env_values = true
    )]
    access_token: Option<String>,

    /// TOML profile providing defaults for the flags above
    #[arg(long = "config", value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Everything a run needs, resolved from flags and the profile.
#[derive(Debug)]
struct Settings {
    params: RunParameters,
    connection: ConnectionSettings,
}

impl TryFrom<Cli> for Settings {
    type Error = TailError;

    fn try_from(cli: Cli) -> Result<Self, TailError> {
        let profile = match &cli.config {
            Some(path) => {
                Profile::load(path).map_err(|e| TailError::Configuration(format!("{e:#}")))?
            }
            None => Profile::default(),
        };

        let params = RunParameters::new(
            cli.project_id.or(profile.project_id).unwrap_or_default(),
            cli.filter.or(profile.filter).unwrap_or_default(),
            cli.process_up_time.or(profile.process_up_time).as_deref(),
            cli.buffer_window.or(profile.buffer_window).as_deref(),
        )?;

        let connection = ConnectionSettings {
            endpoint: cli
                .endpoint
                .or(profile.endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            access_token: cli.access_token.filter(|t| !t.is_empty()),
        };

        Ok(Self { params, connection })
    }
}

/// Rewrite single-dash long flags (`-projectId x`, `-filter=y`) to the
/// double-dash form clap expects. Values and everything after `--` pass
/// through untouched, so a filter such as `-severity>=ERROR` survives.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut normalized = Vec::new();
    let mut expecting_value = false;
    let mut passthrough = false;

    for (index, arg) in args.into_iter().enumerate() {
        let arg: OsString = arg.into();
        if index == 0 || passthrough || expecting_value {
            expecting_value = false;
            normalized.push(arg);
            continue;
        }

        let Some(text) = arg.to_str() else {
            normalized.push(arg);
            continue;
        };

        if text == "--" {
            passthrough = true;
            normalized.push(arg);
            continue;
        }

        let flag = if let Some(long) = text.strip_prefix("--") {
            Some((long, arg.clone()))
        } else if let Some(single) = text.strip_prefix('-').filter(|s| s.len() > 1) {
            Some((single, OsString::from(format!("-{text}"))))
        } else {
            None
        };

        match flag {
            Some((body, rewritten)) => {
                let (name, inline_value) = match body.split_once('=') {
                    Some((name, _)) => (name, true),
                    None => (body, false),
                };
                expecting_value = !inline_value && VALUE_FLAGS.contains(&name);
                normalized.push(rewritten);
            }
            None => normalized.push(arg),
        }
    }

    normalized
}

/// Entry function for CLI
pub async fn run() -> Result<()> {
    let cli = match Cli::try_parse_from(normalize_args(std::env::args_os())) {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.print()?;
            return Ok(());
        }
        Err(e) => return Err(TailError::Configuration(e.to_string().trim_end().to_string()).into()),
    };

    let settings = Settings::try_from(cli)?;
    tracing::debug!(?settings, "Resolved run settings");

    let shutdown = Shutdown::new();
    let listener = shutdown.listen_for_signals();

    let connector = GrpcConnector::new(settings.connection);
    let outcome = run_log_tail(&settings.params, &connector, shutdown.token(), io::stdout()).await;

    // Stops the signal listener on every path.
    shutdown.trigger();
    let _ = listener.await;

    let reason: StopReason = outcome?;
    tracing::debug!(?reason, "Log tailing stopped");
    Ok(())
}
