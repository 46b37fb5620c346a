use anyhow::{Context, Result};
use clap::Parser;
use pm1000_cli::{LogArgs, setup_logging, shutdown_on_ctrl_c};
use pm1000_lib::generator::{GeneratorConfig, SyntheticSource};
use std::net::IpAddr;
use tracing::error;

/// Send synthetic Stokes and audio telemetry, no instrument needed.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Receiver host.
    #[arg(long, default_value = "127.0.0.1", env = "PM1000_HOST")]
    host: IpAddr,
    #[arg(long, default_value_t = 5000)]
    stokes_port: u16,
    #[arg(long, default_value_t = 5001)]
    raw_audio_port: u16,
    #[arg(long, default_value_t = 5002)]
    processed_audio_port: u16,
    /// Milliseconds between blocks.
    #[arg(long, default_value_t = 50)]
    tick_ms: u64,
    #[arg(long, default_value_t = 16)]
    stokes_block: usize,
    #[arg(long, default_value_t = 800)]
    audio_block: usize,
    #[arg(long, default_value_t = 16_000)]
    sample_rate: u32,
    /// One sample per datagram, maximising packet rate.
    #[arg(long, conflicts_with = "legacy")]
    stress: bool,
    /// Send headerless single-sample datagrams.
    #[arg(long)]
    legacy: bool,
    #[command(flatten)]
    log: LogArgs,
}

impl From<&Cli> for GeneratorConfig {
    fn from(cli: &Cli) -> Self {
        let (stokes_block, audio_block) = if cli.stress {
            (1, 1)
        } else {
            (cli.stokes_block, cli.audio_block)
        };
        GeneratorConfig {
            host: cli.host,
            stokes_port: cli.stokes_port,
            raw_audio_port: cli.raw_audio_port,
            processed_audio_port: cli.processed_audio_port,
            tick_ms: cli.tick_ms,
            stokes_block,
            audio_block,
            sample_rate_hz: cli.sample_rate,
            legacy: cli.legacy,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(&cli.log)?;

    let token = shutdown_on_ctrl_c();
    let mut source = SyntheticSource::new(GeneratorConfig::from(&cli))
        .await
        .context("Failed to start generator")?;

    if let Err(e) = source.run(token).await {
        error!("Generator failed: {:?}", e);
        std::process::exit(1);
    }
    Ok(())
}
