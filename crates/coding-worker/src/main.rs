use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use coding_worker::{GhCliBridge, Worker, WorkerConfig};
use coordination::queue::build_source;
use coordination::{AiderCli, GenerationOrchestrator, Verifier};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the worker TOML config (defaults to config/worker.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON task message to inject into the simulated queue at startup
    #[arg(long)]
    test_message: Option<PathBuf>,

    /// Log level, used when RUST_LOG is unset
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn init_tracing(level: LogLevel, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Cancel `token` on SIGINT or SIGTERM.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received, stopping worker");
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler, listening for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level, args.log_format);

    let config = WorkerConfig::load(args.config.as_deref())?;
    info!(
        worker_id = %config.worker.worker_id,
        mock = config.queue.use_mock,
        "Coding worker starting"
    );

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let source = build_source(&config.queue).context("Failed to create message source")?;

    if let Some(path) = &args.test_message {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read test message: {}", path.display()))?;
        source
            .inject_json(&json)
            .await
            .with_context(|| format!("Failed to inject test message: {}", path.display()))?;
        info!(path = %path.display(), "Injected test message");
    }

    if config.queue.use_mock {
        info!(queue_depth = source.queue_depth(), "Running with simulated message source");
    }

    let aider = AiderCli::from_config(&config.generator);
    if let Err(e) = aider.check_installation(&cancel).await {
        warn!(error = %e, "Generation tool installation check failed");
    }

    let generator = GenerationOrchestrator::from_config(
        &config.generator,
        Arc::new(aider),
        Arc::new(Verifier::new(config.verifier.clone())),
    );
    let vcs = GhCliBridge::new(config.github.clone());

    let mut worker = Worker::new(
        source,
        Arc::new(generator),
        Arc::new(vcs),
        config.retry_policy(),
    )
    .with_receive_error_delay(config.receive_error_delay())
    .with_worker_id(config.worker.worker_id.clone());

    let stats = worker.run(&cancel).await;
    info!(
        received = stats.received,
        succeeded = stats.succeeded,
        failed = stats.failed,
        abandoned = stats.abandoned,
        receive_errors = stats.receive_errors,
        "Coding worker exited"
    );
    Ok(())
}
