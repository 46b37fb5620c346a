//! Shared plumbing for the PM1000 command line tools.

use anyhow::{Context, Result};
use clap::Args;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::fs::File;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Args, Debug)]
pub struct LogArgs {
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(long, env = "PM1000_LOG_FILE")]
    pub log_file: Option<PathBuf>,
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

/// Console logging plus an optional log file. Keep the guard alive until exit.
pub fn setup_logging(args: &LogArgs) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);

    let (file_layer, guard) = if let Some(ref path) = args.log_file {
        let log_file = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // INFO by default, -v for DEBUG, -vv for TRACE; RUST_LOG wins when set
    let filter = EnvFilter::builder()
        .with_default_directive(args.verbose.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = &args.log_file {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

/// Token that is cancelled on Ctrl-C.
pub fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                trigger.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {e}"),
        }
    });
    token
}
