//! Multi-channel UDP telemetry receiver.
//!
//! Each [`Channel`] runs its own socket and receive task, feeding a bounded
//! event queue of its own. Datagrams are decoded as they arrive and turned into
//! [`TelemetryEvent`]s on their channel's queue. A full queue holds back only
//! the channel that filled it.
//!
//! Batch datagrams are checked for sequence continuity per channel. Legacy
//! datagrams carry no sequence, so they are numbered locally and never
//! produce loss events.

use super::wire::{Datagram, WireSample, decode};
use crate::config::ReceiverConfig;
use crate::constants::{MAX_DATAGRAM_SIZE, PROCESSED_AUDIO_PORT, RAW_AUDIO_PORT, STOKES_PORT};
use crate::error::{PmError, Result};
use crate::sample::{AudioSample, StokeSample};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use strum_macros::Display;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Stokes,
    RawAudio,
    ProcessedAudio,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Stokes, Channel::RawAudio, Channel::ProcessedAudio];

    pub fn default_port(self) -> u16 {
        match self {
            Channel::Stokes => STOKES_PORT,
            Channel::RawAudio => RAW_AUDIO_PORT,
            Channel::ProcessedAudio => PROCESSED_AUDIO_PORT,
        }
    }
}

/// A break in a channel's batch sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLoss {
    pub expected: u32,
    pub got: u32,
}

impl PacketLoss {
    /// Datagrams skipped, assuming the sequence jumped forward.
    /// `None` when `got` is behind `expected` (duplicate or reordered datagram).
    pub fn missing(&self) -> Option<u32> {
        let gap = self.got.wrapping_sub(self.expected);
        (gap <= i32::MAX as u32).then_some(gap)
    }
}

/// Sequence state of one channel.
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    last: Option<u32>,
    local: u32,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a batch sequence number. Returns a loss when it does not follow
    /// the previous one. The first number seen never counts as a loss.
    pub fn observe(&mut self, received: u32) -> Option<PacketLoss> {
        let loss = self
            .last
            .map(|last| last.wrapping_add(1))
            .filter(|expected| *expected != received)
            .map(|expected| PacketLoss {
                expected,
                got: received,
            });
        self.last = Some(received);
        loss
    }

    /// Number for the next legacy datagram
    pub fn next_local(&mut self) -> u32 {
        let sequence = self.local;
        self.local = self.local.wrapping_add(1);
        sequence
    }

    pub fn last(&self) -> Option<u32> {
        self.last
    }
}

/// Samples from one datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedBatch<T> {
    pub channel: Channel,
    /// Wire sequence for batch datagrams, local counter for legacy ones
    pub sequence: u32,
    pub legacy: bool,
    pub sample_rate_hz: Option<u32>,
    pub samples: Vec<T>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Stokes(ReceivedBatch<StokeSample>),
    Audio(ReceivedBatch<AudioSample>),
    PacketLoss { channel: Channel, loss: PacketLoss },
    /// A datagram matched neither wire format and was dropped
    Malformed { channel: Channel, length: usize },
}

impl TelemetryEvent {
    pub fn channel(&self) -> Channel {
        match self {
            TelemetryEvent::Stokes(batch) => batch.channel,
            TelemetryEvent::Audio(batch) => batch.channel,
            TelemetryEvent::PacketLoss { channel, .. } | TelemetryEvent::Malformed { channel, .. } => *channel,
        }
    }
}

/// A sample kind a channel can carry.
pub trait Received: WireSample + Send + 'static {
    fn into_event(batch: ReceivedBatch<Self>) -> TelemetryEvent;
}

impl Received for StokeSample {
    fn into_event(batch: ReceivedBatch<Self>) -> TelemetryEvent {
        TelemetryEvent::Stokes(batch)
    }
}

impl Received for AudioSample {
    fn into_event(batch: ReceivedBatch<Self>) -> TelemetryEvent {
        TelemetryEvent::Audio(batch)
    }
}

/// Decodes datagrams for one channel and keeps its sequence state.
#[derive(Debug, Clone)]
pub struct ChannelDecoder {
    channel: Channel,
    tracker: SequenceTracker,
}

impl ChannelDecoder {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            tracker: SequenceTracker::new(),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn tracker(&self) -> &SequenceTracker {
        &self.tracker
    }

    /// Turn one datagram into events: a loss (if any) followed by its samples.
    pub fn handle(&mut self, bytes: &[u8]) -> Result<Vec<TelemetryEvent>> {
        match self.channel {
            Channel::Stokes => self.handle_as::<StokeSample>(bytes),
            Channel::RawAudio | Channel::ProcessedAudio => self.handle_as::<AudioSample>(bytes),
        }
    }

    fn handle_as<T: Received>(&mut self, bytes: &[u8]) -> Result<Vec<TelemetryEvent>> {
        let mut events = Vec::with_capacity(2);
        let batch = match decode::<T>(bytes)? {
            Datagram::Legacy(sample) => ReceivedBatch {
                channel: self.channel,
                sequence: self.tracker.next_local(),
                legacy: true,
                sample_rate_hz: None,
                samples: vec![sample],
            },
            Datagram::Batch { header, samples } => {
                if let Some(loss) = self.tracker.observe(header.sequence) {
                    warn!(
                        channel = %self.channel,
                        expected = loss.expected,
                        got = loss.got,
                        "Packet loss detected"
                    );
                    events.push(TelemetryEvent::PacketLoss {
                        channel: self.channel,
                        loss,
                    });
                }
                ReceivedBatch {
                    channel: self.channel,
                    sequence: header.sequence,
                    legacy: false,
                    sample_rate_hz: Some(header.sample_rate_hz),
                    samples,
                }
            }
        };
        events.push(T::into_event(batch));
        Ok(events)
    }
}

/// Pause after a failed receive, doubling per consecutive failure.
pub fn receive_backoff(failures: u32) -> Duration {
    const FIRST: Duration = Duration::from_millis(10);
    const MAX: Duration = Duration::from_secs(1);
    FIRST.saturating_mul(1u32 << failures.saturating_sub(1).min(7)).min(MAX)
}

/// Receive loop of one channel.
pub struct ChannelReceiver {
    socket: UdpSocket,
    local: SocketAddr,
    decoder: ChannelDecoder,
    events: mpsc::Sender<TelemetryEvent>,
}

impl ChannelReceiver {
    pub async fn bind(channel: Channel, addr: SocketAddr, events: mpsc::Sender<TelemetryEvent>) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local = socket.local_addr()?;
        Ok(Self {
            socket,
            local,
            decoder: ChannelDecoder::new(channel),
            events,
        })
    }

    pub fn channel(&self) -> Channel {
        self.decoder.channel()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Receive until `token` is cancelled or the event receiver is dropped.
    pub async fn run(mut self, token: CancellationToken) {
        let channel = self.channel();
        info!(%channel, addr = %self.local, "Channel receiver started");
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut failures = 0u32;

        loop {
            let received = tokio::select! {
                _ = token.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };
            let (len, peer) = match received {
                Ok(received) => {
                    failures = 0;
                    received
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let pause = receive_backoff(failures);
                    warn!(%channel, failures, ?pause, "Receive failed: {e}");
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(pause) => continue,
                    }
                }
            };

            let events = match self.decoder.handle(&buf[..len]) {
                Ok(events) => events,
                Err(e @ (PmError::Malformed(_) | PmError::Truncated { .. })) => {
                    warn!(%channel, %peer, "Dropping datagram: {e}");
                    vec![TelemetryEvent::Malformed { channel, length: len }]
                }
                Err(e) => {
                    warn!(%channel, %peer, "Failed to decode datagram: {e}");
                    continue;
                }
            };

            for event in events {
                tokio::select! {
                    _ = token.cancelled() => break,
                    sent = self.events.send(event) => {
                        if sent.is_err() {
                            debug!(%channel, "Event consumer gone");
                            info!(%channel, "Channel receiver stopped");
                            return;
                        }
                    }
                }
            }
        }

        info!(%channel, "Channel receiver stopped");
    }
}

/// The three channel receivers running together.
pub struct TelemetryReceiver {
    token: CancellationToken,
    tasks: Vec<(Channel, SocketAddr, JoinHandle<()>)>,
}

impl TelemetryReceiver {
    /// Bind all three channels and start receiving. Each channel gets a
    /// queue of `queue_capacity` events. If any channel fails to bind, the
    /// ones already started are stopped.
    pub async fn start(config: &ReceiverConfig) -> Result<(Self, ChannelQueues)> {
        let capacity = config.queue_capacity.max(1);
        let token = CancellationToken::new();
        let mut tasks = Vec::with_capacity(Channel::ALL.len());
        let mut queues = ChannelQueues::default();

        for channel in Channel::ALL {
            let (tx, rx) = mpsc::channel(capacity);
            let receiver = match ChannelReceiver::bind(channel, config.addr(channel), tx).await {
                Ok(receiver) => receiver,
                Err(e) => {
                    token.cancel();
                    return Err(e);
                }
            };
            let addr = receiver.local_addr();
            let handle = tokio::spawn(receiver.run(token.child_token()));
            tasks.push((channel, addr, handle));
            *queues.slot(channel) = Some(rx);
        }

        Ok((Self { token, tasks }, queues))
    }

    pub fn local_addr(&self, channel: Channel) -> Option<SocketAddr> {
        self.tasks
            .iter()
            .find(|(c, _, _)| *c == channel)
            .map(|(_, addr, _)| *addr)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop every channel and wait for the loops to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        for (channel, _, handle) in self.tasks {
            if let Err(e) = handle.await {
                warn!(%channel, "Receiver task failed: {e}");
            }
        }
    }
}

/// The event queues of the three channels.
///
/// [`recv`](Self::recv) takes from whichever channel has an event ready. A
/// queue can also be [`take`](Self::take)n out and drained on its own.
/// Dropping a queue stops its channel's receive loop.
#[derive(Debug, Default)]
pub struct ChannelQueues {
    stokes: Option<mpsc::Receiver<TelemetryEvent>>,
    raw_audio: Option<mpsc::Receiver<TelemetryEvent>>,
    processed_audio: Option<mpsc::Receiver<TelemetryEvent>>,
}

impl ChannelQueues {
    fn slot(&mut self, channel: Channel) -> &mut Option<mpsc::Receiver<TelemetryEvent>> {
        match channel {
            Channel::Stokes => &mut self.stokes,
            Channel::RawAudio => &mut self.raw_audio,
            Channel::ProcessedAudio => &mut self.processed_audio,
        }
    }

    /// Detach one channel's queue. `recv` no longer sees that channel.
    pub fn take(&mut self, channel: Channel) -> Option<mpsc::Receiver<TelemetryEvent>> {
        self.slot(channel).take()
    }

    /// Next event from any channel still attached. `None` once every
    /// attached channel has stopped. Cancel safe.
    pub async fn recv(&mut self) -> Option<TelemetryEvent> {
        loop {
            let stokes = self.stokes.is_some();
            let raw_audio = self.raw_audio.is_some();
            let processed_audio = self.processed_audio.is_some();

            let (channel, event) = tokio::select! {
                event = next_from(&mut self.stokes), if stokes => (Channel::Stokes, event),
                event = next_from(&mut self.raw_audio), if raw_audio => (Channel::RawAudio, event),
                event = next_from(&mut self.processed_audio), if processed_audio => (Channel::ProcessedAudio, event),
                else => return None,
            };

            match event {
                Some(event) => return Some(event),
                None => {
                    debug!(%channel, "Channel queue closed");
                    *self.slot(channel) = None;
                }
            }
        }
    }
}

async fn next_from(queue: &mut Option<mpsc::Receiver<TelemetryEvent>>) -> Option<TelemetryEvent> {
    match queue {
        Some(queue) => queue.recv().await,
        None => None,
    }
}

/// Running totals for one channel, fed from its events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub datagrams: u64,
    pub legacy_datagrams: u64,
    pub samples: u64,
    pub losses: u64,
    /// Datagrams skipped over by forward sequence jumps
    pub missing: u64,
    pub malformed: u64,
    pub last_sequence: Option<u32>,
}

impl ChannelStats {
    pub fn record(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::Stokes(batch) => self.record_batch(batch.legacy, batch.sequence, batch.samples.len()),
            TelemetryEvent::Audio(batch) => self.record_batch(batch.legacy, batch.sequence, batch.samples.len()),
            TelemetryEvent::PacketLoss { loss, .. } => {
                self.losses += 1;
                self.missing += u64::from(loss.missing().unwrap_or(0));
            }
            TelemetryEvent::Malformed { .. } => self.malformed += 1,
        }
    }

    fn record_batch(&mut self, legacy: bool, sequence: u32, samples: usize) {
        self.datagrams += 1;
        self.samples += samples as u64;
        if legacy {
            self.legacy_datagrams += 1;
        } else {
            self.last_sequence = Some(sequence);
        }
    }
}
