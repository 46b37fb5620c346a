use anyhow::{Context, Result};
use clap::Parser;
use pm1000_cli::{LogArgs, setup_logging, shutdown_on_ctrl_c};
use pm1000_lib::config::ReceiverConfig;
use pm1000_lib::telemetry::{Channel, ChannelStats, TelemetryEvent, TelemetryReceiver};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uom::si::power::microwatt;

/// Receive PM1000 telemetry on all three channels and report continuity.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON receiver configuration; flags override its fields.
    #[arg(short, long, env = "PM1000_RECEIVER_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "PM1000_BIND")]
    bind: Option<IpAddr>,
    #[arg(long)]
    stokes_port: Option<u16>,
    #[arg(long)]
    raw_audio_port: Option<u16>,
    #[arg(long)]
    processed_audio_port: Option<u16>,
    /// Seconds between statistics reports.
    #[arg(short, long, default_value_t = 5)]
    interval: u64,
    /// Print every Stokes sample as a JSON line on stdout.
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    log: LogArgs,
}

impl Cli {
    fn receiver_config(&self) -> Result<ReceiverConfig> {
        let mut config = match &self.config {
            Some(path) => ReceiverConfig::from_json_file(path)
                .with_context(|| format!("Failed to load configuration from {:?}", path))?,
            None => ReceiverConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(port) = self.stokes_port {
            config.stokes_port = port;
        }
        if let Some(port) = self.raw_audio_port {
            config.raw_audio_port = port;
        }
        if let Some(port) = self.processed_audio_port {
            config.processed_audio_port = port;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(&cli.log)?;
    let config = cli.receiver_config()?;

    let token = shutdown_on_ctrl_c();
    let (receiver, mut events) = TelemetryReceiver::start(&config)
        .await
        .context("Failed to bind telemetry ports")?;
    for channel in Channel::ALL {
        if let Some(addr) = receiver.local_addr(channel) {
            info!(%channel, %addr, "Listening");
        }
    }

    let mut stats: HashMap<Channel, ChannelStats> = HashMap::new();
    let mut report = tokio::time::interval(Duration::from_secs(cli.interval.max(1)));
    report.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = report.tick() => print_stats(&stats),
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("All channels stopped");
                    break;
                };
                stats.entry(event.channel()).or_default().record(&event);
                handle_event(&event, cli.json)?;
            }
        }
    }

    receiver.shutdown().await;
    print_stats(&stats);
    Ok(())
}

fn handle_event(event: &TelemetryEvent, json: bool) -> Result<()> {
    match event {
        TelemetryEvent::Stokes(batch) => {
            if json {
                for sample in &batch.samples {
                    println!("{}", serde_json::to_string(sample)?);
                }
            }
            if let Some(last) = batch.samples.last() {
                debug!(
                    sequence = batch.sequence,
                    samples = batch.samples.len(),
                    power_uw = last.power().get::<microwatt>(),
                    "{last}"
                );
            }
        }
        TelemetryEvent::Audio(batch) => {
            debug!(
                channel = %batch.channel,
                sequence = batch.sequence,
                samples = batch.samples.len(),
                legacy = batch.legacy,
                "Audio block"
            );
        }
        TelemetryEvent::PacketLoss { channel, loss } => {
            info!(%channel, expected = loss.expected, got = loss.got, "Packet loss");
        }
        TelemetryEvent::Malformed { channel, length } => {
            debug!(%channel, length, "Malformed datagram");
        }
    }
    Ok(())
}

fn print_stats(stats: &HashMap<Channel, ChannelStats>) {
    for channel in Channel::ALL {
        let s = stats.get(&channel).copied().unwrap_or_default();
        info!(
            %channel,
            datagrams = s.datagrams,
            legacy = s.legacy_datagrams,
            samples = s.samples,
            losses = s.losses,
            missing = s.missing,
            malformed = s.malformed,
            last_sequence = ?s.last_sequence,
            "Channel statistics"
        );
    }
}
