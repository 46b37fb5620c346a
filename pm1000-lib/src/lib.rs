pub mod checksum;
pub mod clock;
pub mod config;
pub mod constants;
pub mod control;
pub mod error;
pub mod generator;
pub mod packet;
pub mod poller;
pub mod processing;
pub mod register;
pub mod sample;
pub mod schedule;
pub mod snapshot;
pub mod telemetry;
pub mod transport;

pub use error::{PmError, Result};
pub use poller::{CrcPolicy, RegisterPoller};
pub use sample::{AudioSample, StokeSample};
pub use snapshot::SnapshotPublisher;
