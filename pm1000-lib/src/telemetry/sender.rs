use super::wire::{WireSample, encode_batch, encode_legacy};
use crate::error::{PmError, Result};
use crate::sample::{AudioSample, StokeSample};
use crate::schedule::Schedule;
use crate::snapshot::SnapshotPublisher;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    /// Sequence number carried by the datagram; `None` for legacy datagrams
    pub sequence: Option<u32>,
    pub delivered: usize,
    pub failed: usize,
}

/// A sample kind the sender can pull out of the [`SnapshotPublisher`].
pub trait Snapshot: WireSample + Send + Sync {
    fn latest(publisher: &SnapshotPublisher) -> Self;
    fn version(publisher: &SnapshotPublisher) -> u64;
    fn changed(publisher: &SnapshotPublisher, seen: u64) -> impl Future<Output = u64> + Send + '_;
}

impl Snapshot for StokeSample {
    fn latest(publisher: &SnapshotPublisher) -> Self {
        publisher.latest_stokes()
    }

    fn version(publisher: &SnapshotPublisher) -> u64 {
        publisher.stokes_version()
    }

    fn changed(publisher: &SnapshotPublisher, seen: u64) -> impl Future<Output = u64> + Send + '_ {
        publisher.wait_stokes_change(seen)
    }
}

impl Snapshot for AudioSample {
    fn latest(publisher: &SnapshotPublisher) -> Self {
        publisher.latest_audio()
    }

    fn version(publisher: &SnapshotPublisher) -> u64 {
        publisher.audio_version()
    }

    fn changed(publisher: &SnapshotPublisher, seen: u64) -> impl Future<Output = u64> + Send + '_ {
        publisher.wait_audio_change(seen)
    }
}

/// Fire-and-forget UDP fan-out of one telemetry stream.
///
/// Every batch datagram is encoded once and sent to each target in turn. The
/// sequence counter advances by one per datagram, however many targets there
/// are and whether or not they were reachable. Use one sender per stream so
/// each stream keeps its own sequence.
pub struct TelemetrySender {
    socket: UdpSocket,
    targets: Vec<SocketAddr>,
    sequence: u32,
    sample_rate_hz: u32,
}

impl TelemetrySender {
    pub async fn bind(local: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        Ok(Self::from_socket(socket))
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket,
            targets: Vec::new(),
            sequence: 0,
            sample_rate_hz: 0,
        }
    }

    /// Value written into the header's sample-rate field
    pub fn with_sample_rate(mut self, sample_rate_hz: u32) -> Self {
        self.sample_rate_hz = sample_rate_hz;
        self
    }

    pub fn add_target(&mut self, target: SocketAddr) {
        if !self.targets.contains(&target) {
            info!(%target, "Added telemetry target");
            self.targets.push(target);
        }
    }

    pub fn remove_target(&mut self, target: SocketAddr) {
        self.targets.retain(|t| *t != target);
    }

    pub fn targets(&self) -> &[SocketAddr] {
        &self.targets
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Sequence number the next batch datagram will carry
    pub fn next_sequence(&self) -> u32 {
        self.sequence
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    async fn fan_out(&self, payload: &[u8]) -> (usize, usize) {
        let mut delivered = 0;
        let mut failed = 0;
        for target in &self.targets {
            match self.socket.send_to(payload, target).await {
                Ok(_) => delivered += 1,
                Err(e) => {
                    warn!(%target, "Failed to send telemetry: {e}");
                    failed += 1;
                }
            }
        }
        (delivered, failed)
    }

    /// Send `samples` as one batch datagram.
    pub async fn send_batch<T: WireSample>(&mut self, samples: &[T]) -> Result<SendReport> {
        let sequence = self.sequence;
        let datagram = encode_batch(sequence, self.sample_rate_hz, samples)?;
        self.sequence = self.sequence.wrapping_add(1);

        let (delivered, failed) = self.fan_out(&datagram).await;
        debug!(sequence, samples = samples.len(), delivered, failed, "Sent batch");
        Ok(SendReport {
            sequence: Some(sequence),
            delivered,
            failed,
        })
    }

    pub async fn send_stokes(&mut self, samples: &[StokeSample]) -> Result<SendReport> {
        self.send_batch(samples).await
    }

    pub async fn send_audio(&mut self, samples: &[AudioSample]) -> Result<SendReport> {
        self.send_batch(samples).await
    }

    /// Send one sample in the headerless legacy form. Does not touch the sequence counter.
    pub async fn send_legacy<T: WireSample>(&mut self, sample: T, timestamp_us: u32) -> SendReport {
        let datagram = encode_legacy(sample, timestamp_us);
        let (delivered, failed) = self.fan_out(&datagram).await;
        SendReport {
            sequence: None,
            delivered,
            failed,
        }
    }

    /// Stream snapshots of `T` until `token` is cancelled.
    ///
    /// One snapshot is taken per `schedule` step and every `block_size`
    /// snapshots go out as one datagram. A partly filled block is dropped on
    /// cancellation. Returns the number of datagrams sent.
    pub async fn run<T: Snapshot>(
        &mut self,
        publisher: &SnapshotPublisher,
        schedule: Schedule,
        block_size: usize,
        token: CancellationToken,
    ) -> Result<u64> {
        let block_size = block_size.max(1);
        if block_size > usize::from(u16::MAX) {
            return Err(PmError::BlockTooLarge(block_size));
        }

        info!(?schedule, block_size, targets = self.targets.len(), "Telemetry sender started");
        let mut ticker = schedule.ticker();
        let mut seen = T::version(publisher);
        let mut block = Vec::with_capacity(block_size);
        let mut sent = 0u64;

        loop {
            let step = async {
                match schedule {
                    Schedule::OnChange => seen = T::changed(publisher, seen).await,
                    _ => ticker.tick().await,
                }
            };
            tokio::select! {
                _ = token.cancelled() => break,
                _ = step => {}
            }

            block.push(T::latest(publisher));
            if block.len() == block_size {
                self.send_batch(&block).await?;
                block.clear();
                sent += 1;
            }
        }

        info!(sent, "Telemetry sender stopped");
        Ok(sent)
    }
}
