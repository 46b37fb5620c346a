//! Streamer and receiver settings.
//!
//! Every field has a default, so a JSON file only needs the keys it changes.

use crate::constants::{PROCESSED_AUDIO_PORT, RAW_AUDIO_PORT, STOKES_PORT};
use crate::error::{PmError, Result};
use crate::poller::CrcPolicy;
use crate::processing::ProcessingConfig;
use crate::schedule::Schedule;
use crate::telemetry::Channel;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| PmError::Config(format!("Cannot read {}: {e}", path.display())))?;
    Ok(serde_json::from_str(&text)?)
}

/// Instrument side: poll the PM1000 and publish Stokes telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    /// Local address the sending socket binds to
    pub bind: SocketAddr,
    pub targets: Vec<SocketAddr>,
    /// Written into the sample-rate field of every batch header
    pub sample_rate_hz: u32,
    /// Snapshots per datagram
    pub block_size: usize,
    pub poll_schedule: Schedule,
    pub send_schedule: Schedule,
    pub crc_policy: CrcPolicy,
    /// Serial number of the FT60x bridge; first match when unset
    pub usb_serial: Option<String>,
    pub usb_timeout_ms: u64,
    /// Destinations of the processed-audio stream; none disables processing
    pub processed_audio_targets: Vec<SocketAddr>,
    /// Audio samples per datagram
    pub audio_block_size: usize,
    pub processing: ProcessingConfig,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            targets: vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), STOKES_PORT)],
            sample_rate_hz: 0,
            block_size: 1,
            poll_schedule: Schedule::Uncapped,
            send_schedule: Schedule::Uncapped,
            crc_policy: CrcPolicy::Ignore,
            usb_serial: None,
            usb_timeout_ms: 1000,
            processed_audio_targets: vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), PROCESSED_AUDIO_PORT)],
            audio_block_size: 16,
            processing: ProcessingConfig::default(),
        }
    }
}

impl StreamerConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = read_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        check_block_size("block_size", self.block_size)?;
        check_block_size("audio_block_size", self.audio_block_size)?;
        if self.usb_timeout_ms == 0 {
            return Err(PmError::Config("usb_timeout_ms must be positive".to_string()));
        }
        self.processing.validate()
    }

    /// Sample rate written into processed-audio headers
    pub fn audio_sample_rate_hz(&self) -> u32 {
        self.processing.sample_rate_hz.round() as u32
    }

    pub fn usb_timeout(&self) -> Duration {
        Duration::from_millis(self.usb_timeout_ms)
    }
}

fn check_block_size(name: &str, size: usize) -> Result<()> {
    if size == 0 || size > usize::from(u16::MAX) {
        return Err(PmError::Config(format!(
            "{name} must be between 1 and {}, got {size}",
            u16::MAX
        )));
    }
    Ok(())
}

/// Listener side: three telemetry channels on one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub bind_address: IpAddr,
    pub stokes_port: u16,
    pub raw_audio_port: u16,
    pub processed_audio_port: u16,
    /// Events buffered per channel between its receive loop and the consumer
    pub queue_capacity: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            stokes_port: STOKES_PORT,
            raw_audio_port: RAW_AUDIO_PORT,
            processed_audio_port: PROCESSED_AUDIO_PORT,
            queue_capacity: 1024,
        }
    }
}

impl ReceiverConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }

    /// Every channel on an OS-assigned loopback port
    pub fn ephemeral_loopback() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            stokes_port: 0,
            raw_audio_port: 0,
            processed_audio_port: 0,
            ..Self::default()
        }
    }

    pub fn port(&self, channel: Channel) -> u16 {
        match channel {
            Channel::Stokes => self.stokes_port,
            Channel::RawAudio => self.raw_audio_port,
            Channel::ProcessedAudio => self.processed_audio_port,
        }
    }

    pub fn addr(&self, channel: Channel) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port(channel))
    }
}
