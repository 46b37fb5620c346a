//! UDP telemetry: wire codec, sender and multi-channel receiver.

pub mod receiver;
pub mod sender;
pub mod wire;

pub use receiver::{
    Channel, ChannelDecoder, ChannelQueues, ChannelReceiver, ChannelStats, PacketLoss, ReceivedBatch,
    SequenceTracker, TelemetryEvent, TelemetryReceiver, receive_backoff,
};
pub use sender::{SendReport, Snapshot, TelemetrySender};
pub use wire::{BatchHeader, Datagram, WireSample, decode, encode_batch, encode_legacy};
