use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::{Config, DEFAULT_API_URL};
use crate::load_config::load_config;
use crate::shutdown::Shutdown;
use crate::snapshot::{SnapshotReport, Snapshotter};
use crate::storage::B2Session;
use crate::version::VersionInfo;

/// CLI for snapshot-bucket: archive an image URL into a B2 bucket on a timer.
///
/// Every option can also be given through its `SNAPSHOT_*` environment variable;
/// flags win over the environment.
#[derive(Parser, Debug)]
#[command(
    name = "snapshot-bucket",
    about = "Periodically fetch an image and store each snapshot in a Backblaze B2 bucket",
    disable_version_flag = true
)]
pub struct Cli {
    /// Interval between image fetches (e.g. 1s, 500ms, 2m)
    #[arg(long, env = "SNAPSHOT_INTERVAL", default_value = "1s")]
    pub interval: String,

    /// Print version info as JSON and exit
    #[arg(long)]
    pub version: bool,

    /// URL of the image
    #[arg(long, env = "SNAPSHOT_URL")]
    pub url: Option<String>,

    /// B2 account id
    #[arg(long, env = "SNAPSHOT_ID", hide_env_values = true)]
    pub id: Option<String>,

    /// B2 application key
    #[arg(long, env = "SNAPSHOT_KEY", hide_env_values = true)]
    pub key: Option<String>,

    /// B2 bucket name
    #[arg(long, env = "SNAPSHOT_BUCKET")]
    pub bucket: Option<String>,

    /// B2 API base URL
    #[arg(long, env = "SNAPSHOT_API_URL", default_value = DEFAULT_API_URL, hide = true)]
    pub api_url: String,
}

/// Extracted CLI entrypoint for integration tests and main().
///
/// Exit codes: 0 after shutdown or `--version`, 1 on invalid configuration or
/// a failed startup (signal handlers, authorization, bucket resolution).
pub async fn run(cli: Cli) -> ExitCode {
    if cli.version {
        return match VersionInfo::current().write_to(std::io::stdout()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "Failed to print version info");
                ExitCode::FAILURE
            }
        };
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("{}", Cli::command().render_help());
            return ExitCode::from(1);
        }
    };
    config.trace_loaded();

    let shutdown = Shutdown::new();
    if let Err(e) = shutdown.listen_for_signals() {
        error!(error = %e, "[ERROR] Failed to install signal handlers");
        return ExitCode::FAILURE;
    }

    match start(config, &shutdown).await {
        Ok(report) => {
            info!(
                cycles = report.cycles,
                uploaded = report.uploaded,
                failed = report.failed,
                "Snapshot loop finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = ?e, "[ERROR] Startup failed");
            ExitCode::FAILURE
        }
    }
}

/// Sets up the storage session, then hands control to the snapshot loop.
pub async fn start(config: Config, shutdown: &Shutdown) -> Result<SnapshotReport> {
    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let bucket_name = config.storage.bucket.clone();
    let setup = async {
        let session = B2Session::connect(http.clone(), &config.storage)
            .await
            .context("Could not authorize B2 account")?;
        session
            .open_bucket(&bucket_name)
            .await
            .with_context(|| format!("Could not open B2 bucket {bucket_name}"))
    };

    let bucket = tokio::select! {
        biased;
        _ = shutdown.token().cancelled() => {
            info!("Shutdown requested during startup");
            return Ok(SnapshotReport::default());
        }
        bucket = setup => bucket?,
    };

    let snapshotter = Snapshotter::new(http, config.url, bucket_name, Arc::new(bucket));
    Ok(snapshotter.run(config.interval, shutdown.token()).await)
}
