mod classify;
mod config;
mod extract;
mod metrics;
mod scheduler;
mod serve;
mod storage_dir;
mod version;
mod walk;

use clap::Parser;
use config::ExporterConfig;
use metrics::{MetricStore, ScanContext};
use scheduler::Scheduler;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use storage_dir::StorageDir;
use tokio_util::sync::CancellationToken;
use version::VersionClient;

/// Prometheus exporter for an OwnTracks Recorder: periodically scans the
/// recorder's storage directory and publishes counts of users, devices,
/// locations and friends on `/metrics`.
#[derive(Parser, Debug)]
#[command(name = "owntracks-exporter", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "owntracks-exporter.toml")]
    config: PathBuf,

    /// Recorder storage directory (overrides config)
    #[arg(long, env = "OWNTRACKS_STORAGEDIR")]
    storage_dir: Option<PathBuf>,

    /// Recorder base URL, used for the version check (overrides config)
    #[arg(long, env = "OWNTRACKS_URL")]
    owntracks_url: Option<String>,

    /// Address to serve metrics on (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Port to serve metrics on (overrides config)
    #[arg(long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Seconds between scans (overrides config)
    #[arg(long, env = "UPDATE_INTERVAL")]
    interval: Option<u64>,

    /// Debug logging
    #[arg(
        short,
        long,
        env = "DEBUG",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    debug: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    /// Apply command-line and environment overrides on top of the file config.
    fn apply(&self, config: &mut ExporterConfig) {
        if let Some(dir) = &self.storage_dir {
            config.storage.dir = dir.clone();
        }
        if let Some(url) = &self.owntracks_url {
            config.recorder.url = url.clone();
        }
        if let Some(host) = &self.host {
            config.serve.bind = host.clone();
        }
        if let Some(port) = self.port {
            config.serve.port = port;
        }
        if let Some(interval) = self.interval {
            config.update.interval_secs = interval;
        }
        if self.debug {
            config.debug = true;
        }
    }
}

fn init_tracing(debug: bool) {
    let default = if debug {
        "owntracks_exporter=debug"
    } else {
        "owntracks_exporter=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut config);

    init_tracing(config.debug);
    tracing::debug!(?cli, "parsed CLI arguments");

    if let Err(e) = config.validate() {
        tracing::error!("{e}");
        return ExitCode::FAILURE;
    }

    if cli.dry_run {
        match toml::to_string_pretty(&config) {
            Ok(s) => print!("{s}"),
            Err(e) => {
                tracing::error!("failed to render config: {e}");
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ExporterConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        storage = %config.storage.dir.display(),
        recorder = %config.recorder.url,
        "owntracks-exporter v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let ctx = ScanContext {
        storage: StorageDir::new(&config.storage.dir),
        version: VersionClient::new(&config.recorder.url, config.recorder_timeout())?,
    };
    tracing::debug!(url = ctx.version.url(), "version check endpoint");
    let store = Arc::new(MetricStore::owntracks());
    let cancel = CancellationToken::new();

    let scheduler = Scheduler::new(Arc::clone(&store), ctx, config.interval(), cancel.clone());
    let scheduler = tokio::spawn(scheduler.run());

    tokio::spawn(shutdown_signal(cancel.clone()));

    let served = serve::run(&config.serve, store, cancel.clone()).await;
    cancel.cancel();
    if let Err(e) = scheduler.await {
        tracing::warn!(error = %e, "scheduler task ended abnormally");
    }
    served?;

    tracing::info!("owntracks-exporter stopped");
    Ok(())
}

/// Cancel `cancel` on Ctrl-C or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = cancel.cancelled() => return,
    }
    tracing::info!("shutdown requested");
    cancel.cancel();
}
