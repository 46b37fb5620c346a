//! Synthetic telemetry for exercising receivers without an instrument.
//!
//! The Stokes channel carries a slow orbit on the Poincaré sphere (S0 between
//! 13 and 17 µW, DOP 97.2 %). Raw audio is a 440 Hz sine and processed audio
//! an 880 Hz sine so the two channels are easy to tell apart.

use crate::clock::StreamClock;
use crate::constants::{PROCESSED_AUDIO_PORT, RAW_AUDIO_PORT, STOKES_PORT};
use crate::error::{PmError, Result};
use crate::sample::{AudioSample, StokeSample};
use crate::telemetry::TelemetrySender;
use crate::telemetry::wire::WireSample;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const SAMPLE_RATE_HZ: u32 = 16_000;
pub const RAW_TONE_HZ: f64 = 440.0;
pub const PROCESSED_TONE_HZ: f64 = 880.0;

const ORBIT_STEP: f64 = 0.05;
const DOP: f32 = 0.972;

/// Slowly moving polarization state.
#[derive(Debug, Clone, Default)]
pub struct PoincareOrbit {
    angle: f64,
}

impl PoincareOrbit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self) {
        self.angle += ORBIT_STEP;
    }

    /// `len` samples spread over a short arc starting at the current angle.
    pub fn block(&self, len: usize) -> Vec<StokeSample> {
        let s0 = 15.2 + (self.angle * 0.1).sin() * 2.0;
        (0..len)
            .map(|i| {
                let a = self.angle + (i as f64 / len as f64) * PI * 0.1;
                let s1 = a.sin() * (self.angle * 0.3).cos();
                let s2 = a.cos() * (self.angle * 0.3).sin();
                let s3 = (a * 0.5).sin() * (self.angle * 0.7).cos();
                let norm = (s1 * s1 + s2 * s2 + s3 * s3).sqrt().max(f64::EPSILON);
                StokeSample::new(
                    s0 as f32,
                    (s1 / norm) as f32,
                    (s2 / norm) as f32,
                    (s3 / norm) as f32,
                    DOP,
                )
            })
            .collect()
    }
}

/// Phase-continuous sine oscillator.
#[derive(Debug, Clone)]
pub struct SineTone {
    step: f64,
    phase: f64,
}

impl SineTone {
    pub fn new(frequency_hz: f64, sample_rate_hz: u32) -> Self {
        Self {
            step: TAU * frequency_hz / f64::from(sample_rate_hz.max(1)),
            phase: 0.0,
        }
    }

    pub fn block(&mut self, len: usize) -> Vec<AudioSample> {
        (0..len)
            .map(|_| {
                let sample = AudioSample::new(self.phase.sin() as f32);
                self.phase = (self.phase + self.step) % TAU;
                sample
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub host: IpAddr,
    pub stokes_port: u16,
    pub raw_audio_port: u16,
    pub processed_audio_port: u16,
    pub tick_ms: u64,
    pub stokes_block: usize,
    /// Audio samples per tick; 800 is 50 ms at 16 kHz
    pub audio_block: usize,
    pub sample_rate_hz: u32,
    /// Send every sample as its own headerless datagram
    pub legacy: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            stokes_port: STOKES_PORT,
            raw_audio_port: RAW_AUDIO_PORT,
            processed_audio_port: PROCESSED_AUDIO_PORT,
            tick_ms: 50,
            stokes_block: 16,
            audio_block: 800,
            sample_rate_hz: SAMPLE_RATE_HZ,
            legacy: false,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, block) in [("stokes_block", self.stokes_block), ("audio_block", self.audio_block)] {
            if block == 0 || block > usize::from(u16::MAX) {
                return Err(PmError::Config(format!(
                    "{name} must be between 1 and {}, got {block}",
                    u16::MAX
                )));
            }
        }
        if self.tick_ms == 0 {
            return Err(PmError::Config("tick_ms must be positive".to_string()));
        }
        Ok(())
    }
}

/// Drives all three channels from one tick.
pub struct SyntheticSource {
    config: GeneratorConfig,
    orbit: PoincareOrbit,
    raw_tone: SineTone,
    processed_tone: SineTone,
    stokes: TelemetrySender,
    raw_audio: TelemetrySender,
    processed_audio: TelemetrySender,
    clock: StreamClock,
}

impl SyntheticSource {
    pub async fn new(config: GeneratorConfig) -> Result<Self> {
        config.validate()?;
        let local = SocketAddr::new(
            match config.host {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            },
            0,
        );

        let stokes = open_sender(local, &config, config.stokes_port).await?;
        let raw_audio = open_sender(local, &config, config.raw_audio_port).await?;
        let processed_audio = open_sender(local, &config, config.processed_audio_port).await?;

        Ok(Self {
            raw_tone: SineTone::new(RAW_TONE_HZ, config.sample_rate_hz),
            processed_tone: SineTone::new(PROCESSED_TONE_HZ, config.sample_rate_hz),
            orbit: PoincareOrbit::new(),
            stokes,
            raw_audio,
            processed_audio,
            clock: StreamClock::new(),
            config,
        })
    }

    /// Send one block on every channel.
    pub async fn tick(&mut self) -> Result<()> {
        self.orbit.advance();
        let stokes = self.orbit.block(self.config.stokes_block);
        let raw = self.raw_tone.block(self.config.audio_block);
        let processed = self.processed_tone.block(self.config.audio_block);

        if self.config.legacy {
            let timestamp = self.clock.now_us();
            send_legacy(&mut self.stokes, &stokes, timestamp).await;
            send_legacy(&mut self.raw_audio, &raw, timestamp).await;
            send_legacy(&mut self.processed_audio, &processed, timestamp).await;
        } else {
            self.stokes.send_stokes(&stokes).await?;
            self.raw_audio.send_audio(&raw).await?;
            self.processed_audio.send_audio(&processed).await?;
        }
        Ok(())
    }

    /// Tick until `token` is cancelled. Returns the number of ticks sent.
    pub async fn run(&mut self, token: CancellationToken) -> Result<u64> {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.tick_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            host = %self.config.host,
            tick_ms = self.config.tick_ms,
            legacy = self.config.legacy,
            "Synthetic generator started"
        );

        let mut ticks = 0u64;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.tick().await?;
            ticks += 1;
        }

        info!(ticks, "Synthetic generator stopped");
        Ok(ticks)
    }
}

async fn open_sender(local: SocketAddr, config: &GeneratorConfig, port: u16) -> Result<TelemetrySender> {
    let mut sender = TelemetrySender::bind(local).await?.with_sample_rate(config.sample_rate_hz);
    sender.add_target(SocketAddr::new(config.host, port));
    Ok(sender)
}

async fn send_legacy<T: WireSample>(sender: &mut TelemetrySender, samples: &[T], timestamp_us: u32) {
    for sample in samples {
        sender.send_legacy(*sample, timestamp_us).await;
    }
}
