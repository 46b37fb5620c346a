use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use pm1000_cli::{LogArgs, setup_logging, shutdown_on_ctrl_c};
use pm1000_lib::config::StreamerConfig;
use pm1000_lib::generator::PoincareOrbit;
use pm1000_lib::processing::SignalProcessor;
use pm1000_lib::schedule::Schedule;
use pm1000_lib::telemetry::TelemetrySender;
use pm1000_lib::transport::{SimulatedPm1000, Transport, UsbTransport};
use pm1000_lib::{AudioSample, CrcPolicy, RegisterPoller, SnapshotPublisher, StokeSample};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(ValueEnum, Debug, Clone, Copy)]
enum CrcArg {
    Ignore,
    Warn,
    Enforce,
}

impl From<CrcArg> for CrcPolicy {
    fn from(arg: CrcArg) -> Self {
        match arg {
            CrcArg::Ignore => CrcPolicy::Ignore,
            CrcArg::Warn => CrcPolicy::Warn,
            CrcArg::Enforce => CrcPolicy::Enforce,
        }
    }
}

/// Poll a PM1000 and stream its Stokes readings, and the audio derived from
/// them, over UDP.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON streamer configuration; flags override its fields.
    #[arg(short, long, env = "PM1000_CONFIG")]
    config: Option<PathBuf>,
    /// Telemetry destination, repeatable (e.g. 192.168.1.20:5000).
    #[arg(short, long, env = "PM1000_TARGETS", value_delimiter = ',')]
    target: Vec<SocketAddr>,
    /// Processed-audio destination, repeatable.
    #[arg(long, env = "PM1000_AUDIO_TARGETS", value_delimiter = ',')]
    audio_target: Vec<SocketAddr>,
    /// Do not derive or send the processed-audio stream.
    #[arg(long, conflicts_with = "audio_target")]
    no_audio: bool,
    /// Serial number of the FT60x bridge to open.
    #[arg(long, env = "PM1000_SERIAL")]
    serial: Option<String>,
    /// Snapshots per datagram.
    #[arg(short, long)]
    block_size: Option<usize>,
    /// Sample rate written into datagram headers.
    #[arg(long)]
    sample_rate: Option<u32>,
    /// Poll cycles per second; unlimited when unset.
    #[arg(long)]
    poll_hz: Option<f64>,
    /// Datagrams per second; unlimited when unset.
    #[arg(long, conflicts_with = "on_change")]
    send_hz: Option<f64>,
    /// Only send when a new poll cycle has completed.
    #[arg(long)]
    on_change: bool,
    #[arg(long, value_enum)]
    crc_policy: Option<CrcArg>,
    /// Poll a simulated instrument instead of USB hardware.
    #[arg(long)]
    simulate: bool,
    #[command(flatten)]
    log: LogArgs,
}

impl Cli {
    fn streamer_config(&self) -> Result<StreamerConfig> {
        let mut config = match &self.config {
            Some(path) => StreamerConfig::from_json_file(path)
                .with_context(|| format!("Failed to load configuration from {:?}", path))?,
            None => StreamerConfig::default(),
        };

        if !self.target.is_empty() {
            config.targets = self.target.clone();
        }
        if !self.audio_target.is_empty() {
            config.processed_audio_targets = self.audio_target.clone();
        }
        if self.no_audio {
            config.processed_audio_targets.clear();
        }
        if let Some(serial) = &self.serial {
            config.usb_serial = Some(serial.clone());
        }
        if let Some(block_size) = self.block_size {
            config.block_size = block_size;
        }
        if let Some(sample_rate) = self.sample_rate {
            config.sample_rate_hz = sample_rate;
        }
        if let Some(hz) = self.poll_hz {
            config.poll_schedule = Schedule::fixed_rate_hz(hz).context("Invalid --poll-hz")?;
        }
        if let Some(hz) = self.send_hz {
            config.send_schedule = Schedule::fixed_rate_hz(hz).context("Invalid --send-hz")?;
        }
        if self.on_change {
            config.send_schedule = Schedule::OnChange;
        }
        if let Some(policy) = self.crc_policy {
            config.crc_policy = policy.into();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(&cli.log)?;
    let config = cli.streamer_config()?;

    if let Err(e) = run_streamer(config, cli.simulate).await {
        error!("Streamer failed: {:?}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run_streamer(config: StreamerConfig, simulate: bool) -> Result<()> {
    let token = shutdown_on_ctrl_c();
    let publisher = Arc::new(SnapshotPublisher::new());

    let mut sender = TelemetrySender::bind(config.bind)
        .await
        .context("Failed to bind telemetry socket")?
        .with_sample_rate(config.sample_rate_hz);
    for target in &config.targets {
        sender.add_target(*target);
    }

    let sender_task = {
        let publisher = publisher.clone();
        let token = token.clone();
        let schedule = config.send_schedule;
        let block_size = config.block_size;
        tokio::spawn(async move {
            sender
                .run::<StokeSample>(&publisher, schedule, block_size, token)
                .await
        })
    };

    let audio_tasks = if config.processed_audio_targets.is_empty() {
        None
    } else {
        Some(spawn_audio(&config, &publisher, &token).await?)
    };

    if simulate {
        let mut orbit = PoincareOrbit::new();
        orbit.advance();
        let mut device = SimulatedPm1000::new();
        if let Some(sample) = orbit.block(1).first() {
            device.load_sample(sample);
        }
        info!("Polling simulated PM1000");
        poll(device, &config, &publisher, token.clone()).await;
    } else {
        let transport = UsbTransport::open(config.usb_serial.as_deref())
            .await
            .context("Failed to open PM1000")?
            .with_timeout(config.usb_timeout());
        poll(transport, &config, &publisher, token.clone()).await;
    }

    token.cancel();
    let sent = sender_task.await.context("Sender task panicked")??;
    if let Some((processor_task, audio_task)) = audio_tasks {
        let produced = processor_task.await.context("Processor task panicked")?;
        let audio_sent = audio_task.await.context("Audio sender task panicked")??;
        info!(produced, audio_sent, "Processed audio stopped");
    }
    info!(sent, "Streamer stopped");
    Ok(())
}

type AudioTasks = (JoinHandle<u64>, JoinHandle<pm1000_lib::Result<u64>>);

/// Derive processed audio from the Stokes snapshots and stream it.
async fn spawn_audio(
    config: &StreamerConfig,
    publisher: &Arc<SnapshotPublisher>,
    token: &CancellationToken,
) -> Result<AudioTasks> {
    let mut processor = SignalProcessor::new(&config.processing)?;
    // Same interface as the Stokes socket, any free port
    let mut sender = TelemetrySender::bind(SocketAddr::new(config.bind.ip(), 0))
        .await
        .context("Failed to bind processed-audio socket")?
        .with_sample_rate(config.audio_sample_rate_hz());
    for target in &config.processed_audio_targets {
        sender.add_target(*target);
    }

    let processor_task = {
        let publisher = publisher.clone();
        let token = token.clone();
        tokio::spawn(async move { processor.run(&publisher, token).await })
    };
    let audio_task = {
        let publisher = publisher.clone();
        let token = token.clone();
        let block_size = config.audio_block_size;
        tokio::spawn(async move {
            sender
                .run::<AudioSample>(&publisher, Schedule::OnChange, block_size, token)
                .await
        })
    };
    Ok((processor_task, audio_task))
}

async fn poll<T: Transport>(
    transport: T,
    config: &StreamerConfig,
    publisher: &SnapshotPublisher,
    token: CancellationToken,
) {
    let mut poller = RegisterPoller::new(transport).with_crc_policy(config.crc_policy);
    let stats = poller.run(publisher, config.poll_schedule, token).await;
    info!(
        completed = stats.completed,
        discarded = stats.discarded,
        "Polling finished"
    );
}
