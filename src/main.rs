use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use phd2_exporter::client::Client;
use phd2_exporter::config::{Config, Overrides};
use phd2_exporter::export::MetricsServer;
use phd2_exporter::phd2::dispatch::Dispatcher;
use phd2_exporter::sink::PrometheusSink;

/// Exports PHD2 guiding events as Prometheus metrics.
#[derive(Parser)]
#[command(name = "phd2-exporter", about)]
struct Cli {
    /// Path to an optional YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Host running PHD2.
    #[arg(long = "phd2host")]
    phd2_host: Option<String>,

    /// PHD2 event server port (0 keeps the configured value).
    #[arg(long = "phd2port", default_value_t = 0)]
    phd2_port: u16,

    /// Port to serve /metrics on (0 keeps the configured value).
    #[arg(long, default_value_t = 0)]
    port: u16,

    /// Guide steps per RMS window (0 keeps the configured value).
    #[arg(long = "rms_samples", default_value_t = 0)]
    rms_samples: usize,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info.
mod version {
    /// Release version string.
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("phd2-exporter {}", version::full());
        return Ok(());
    }

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    cfg.apply_overrides(&Overrides {
        log_level: cli.log_level.clone(),
        phd2_host: cli.phd2_host.clone(),
        phd2_port: cli.phd2_port,
        metrics_port: cli.port,
        rms_samples: cli.rms_samples,
    });
    cfg.validate().context("validating configuration")?;

    let filter = EnvFilter::try_new(&cfg.log_level)
        .with_context(|| format!("invalid log level: {}", cfg.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        phd2 = %cfg.phd2.endpoint(),
        metrics = %cfg.metrics.bind_addr(),
        rms_samples = cfg.rms.samples,
        "starting phd2-exporter",
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(run(cfg))
}

async fn run(cfg: Config) -> Result<()> {
    let cancel = CancellationToken::new();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_cancel.cancel();
    });

    let sink = Arc::new(PrometheusSink::new(&cfg.metrics.namespace));

    let server = MetricsServer::new(sink.registry().clone(), &cfg.metrics.addr);
    server.start().await.context("starting metrics server")?;

    let dispatcher = Dispatcher::new(Arc::clone(&sink), cfg.rms.samples);
    let mut client = Client::new(cfg.phd2.clone(), dispatcher);

    client.run(cancel.child_token()).await;

    server.stop().await?;

    tracing::info!("phd2-exporter stopped");

    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!(error = %e, "registering SIGTERM handler");
                let _ = ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
                return;
            }
        };

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}
