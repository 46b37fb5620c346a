use crate::constants::CRC_OK;
use crate::error::{PmError, Result};
use crate::packet::{FrameKind, Request};
use crate::register::{POLL_ORDER, dop_from_register, signed_to_float, to_float};
use crate::sample::StokeSample;
use crate::schedule::Schedule;
use crate::snapshot::SnapshotPublisher;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STATS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// What to do with a read response whose pm_crc field is not [`CRC_OK`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrcPolicy {
    /// Use the value as if the marker were present
    #[default]
    Ignore,
    /// Log it and use the value
    Warn,
    /// Fail the read, which discards the cycle
    Enforce,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Cycles that produced a sample
    pub completed: u64,
    /// Cycles thrown away because at least one read failed
    pub discarded: u64,
}

/// Reads the nine measurement registers in [`POLL_ORDER`] and turns them
/// into one [`StokeSample`].
///
/// A cycle is all or nothing. Every read is issued even after one fails so
/// the request cadence stays fixed, and the cycle is dropped at the end.
pub struct RegisterPoller<T> {
    transport: T,
    crc_policy: CrcPolicy,
    stats: PollStats,
}

impl<T: Transport> RegisterPoller<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            crc_policy: CrcPolicy::default(),
            stats: PollStats::default(),
        }
    }

    pub fn with_crc_policy(mut self, crc_policy: CrcPolicy) -> Self {
        self.crc_policy = crc_policy;
        self
    }

    pub fn stats(&self) -> PollStats {
        self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Read a single register.
    pub async fn read_register(&mut self, address: u16) -> Result<u16> {
        let request = Request::read(address);
        let frame = self.transport.transact(&request).await?;
        let response = frame.as_read_response().ok_or(PmError::UnexpectedResponse {
            expected: FrameKind::ReadResponse,
            actual: frame.kind(),
        })?;

        if !response.pm_crc_ok() {
            match self.crc_policy {
                CrcPolicy::Ignore => {}
                CrcPolicy::Warn => warn!(address, pm_crc = response.pm_crc, "Device did not report CRC OK"),
                CrcPolicy::Enforce => {
                    return Err(PmError::ChecksumMismatch {
                        expected: CRC_OK,
                        actual: response.pm_crc,
                    });
                }
            }
        }
        Ok(response.data)
    }

    /// Run one cycle. On error nothing from this cycle is usable.
    pub async fn poll_once(&mut self) -> Result<StokeSample> {
        let mut values = [0u16; POLL_ORDER.len()];
        let mut failure = None;

        for (value, register) in values.iter_mut().zip(POLL_ORDER) {
            match self.read_register(register.address()).await {
                Ok(data) => *value = data,
                Err(e) => {
                    debug!(%register, "Register read failed: {e}");
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        if let Some(e) = failure {
            self.stats.discarded += 1;
            return Err(e);
        }
        self.stats.completed += 1;
        Ok(decode_registers(&values))
    }

    /// Poll until `token` is cancelled, publishing every complete cycle.
    ///
    /// Cancellation is only observed between cycles.
    pub async fn run(&mut self, publisher: &SnapshotPublisher, schedule: Schedule, token: CancellationToken) -> PollStats {
        info!(?schedule, crc_policy = ?self.crc_policy, "Register poller started");
        let mut ticker = schedule.ticker();
        let mut last_report = Instant::now();

        while !token.is_cancelled() {
            match self.poll_once().await {
                Ok(sample) => {
                    publisher.publish_stokes(sample);
                }
                Err(e) => warn!("Poll cycle discarded: {e}"),
            }

            if last_report.elapsed() >= STATS_LOG_INTERVAL {
                info!(
                    completed = self.stats.completed,
                    discarded = self.stats.discarded,
                    "Poller statistics"
                );
                last_report = Instant::now();
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
        }

        info!(
            completed = self.stats.completed,
            discarded = self.stats.discarded,
            "Register poller stopped"
        );
        self.stats
    }
}

/// Decodes register values read in [`POLL_ORDER`].
pub fn decode_registers(values: &[u16; 9]) -> StokeSample {
    let [s0_hi, s0_lo, s1_hi, s1_lo, s2_hi, s2_lo, s3_hi, s3_lo, dop] = *values;
    StokeSample {
        s0: to_float(s0_hi, s0_lo, 0),
        s1: signed_to_float(s1_hi, s1_lo),
        s2: signed_to_float(s2_hi, s2_lo),
        s3: signed_to_float(s3_hi, s3_lo),
        dop: dop_from_register(dop),
    }
}
