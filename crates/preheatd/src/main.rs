//! preheat — warmup sidecar.
//!
//! Waits for the target service to report ready, replays warmup traffic
//! against it for a bounded time, and publishes the outcome through the
//! "alive" and "ready" sentinel files.
//!
//! # Usage
//!
//! ```text
//! preheat --target-http-port 8080 --target-readiness-http-path /health \
//!     --http-requests get:/delay --max-duration 30s --exit-after-warmup
//! ```
//!
//! The exit code reflects setup failures only. Readiness and warmup
//! outcomes are visible in the sentinel files and the logs.

mod cli;
mod signals;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use preheat_core::ConfigFile;
use preheat_engine::{Orchestrator, Phase};

use crate::cli::{Cli, LogFormat};
use crate::signals::ShutdownSignals;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let file = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ConfigFile::default(),
    };
    let config = file
        .merge(cli.overrides())
        .into_run_config()
        .context("invalid configuration")?;

    info!(
        host = %config.target.host,
        readiness = %config.readiness.protocol,
        readiness_port = config.readiness.port,
        requests = config.requests.len(),
        concurrency = config.concurrency,
        max_duration = ?config.max_duration,
        budget = %config.warmup_budget,
        fail_readiness = config.fail_readiness,
        "preheat starting"
    );

    let mut shutdown = if config.exit_after_warmup {
        None
    } else {
        Some(ShutdownSignals::install().context("failed to install signal handler")?)
    };

    let mut orchestrator = Orchestrator::from_config(config)?;
    let report = orchestrator.run().await?;

    info!(
        phase = ?report.phase,
        ready = report.result.ready,
        sent = report.result.sent_count,
        failed = report.failed_count,
        panicked = report.result.panicked,
        readiness_fault = report.readiness_fault,
        dispatch_fault = report.dispatch_fault,
        budget_exhausted = report.budget_exhausted,
        marked_ready = report.marked_ready,
        "warmup run finished"
    );

    if let (Phase::Idling, Some(shutdown)) = (report.phase, shutdown.as_mut()) {
        info!("holding sentinel state until shutdown signal");
        let signal = shutdown.recv().await;
        info!(signal, "shutdown signal received");
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
