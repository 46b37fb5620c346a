//! # UDP telemetry wire formats
//!
//! Two formats share each port and are told apart by datagram length alone:
//!
//! ```text
//! legacy Stokes (24 bytes):  s0 s1 s2 s3 dop: f32 | timestamp: u32
//! legacy audio   (8 bytes):  amplitude: f32       | timestamp: u32
//! batch:                     sequence: u32 | sample_rate_hz: u32 | block_size: u16
//!                            then block_size x (20 byte Stokes | 4 byte audio)
//! ```
//!
//! Everything is little-endian without padding. The legacy timestamp is read
//! past and never interpreted.
//!
//! Length-based detection is a property of the protocol, not of this codec: a
//! batch datagram that happened to be exactly 24 (Stokes) or 8 (audio) bytes
//! long would be taken for a legacy sample. Well-formed batches never have
//! those lengths (10 + 20n and 10 + 4n), but a batch with trailing bytes can.

use crate::constants::{AUDIO_SAMPLE_SIZE, HEADER_SIZE, LEGACY_AUDIO_SIZE, LEGACY_STOKES_SIZE, STOKES_SAMPLE_SIZE};
use crate::error::{PmError, Result};
use crate::sample::{AudioSample, StokeSample};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;
use zerocopy::byteorder::little_endian::{F32, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Batch header as it appears on the wire (10 bytes)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct BatchHeaderRaw {
    pub sequence: U32,
    pub sample_rate_hz: U32,
    pub block_size: U16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchHeader {
    /// Per-stream counter, one step per datagram
    pub sequence: u32,
    /// Sample rate the sender claims; not checked by receivers
    pub sample_rate_hz: u32,
    pub block_size: u16,
}

impl From<BatchHeaderRaw> for BatchHeader {
    fn from(raw: BatchHeaderRaw) -> Self {
        Self {
            sequence: raw.sequence.get(),
            sample_rate_hz: raw.sample_rate_hz.get(),
            block_size: raw.block_size.get(),
        }
    }
}

impl From<BatchHeader> for BatchHeaderRaw {
    fn from(header: BatchHeader) -> Self {
        Self {
            sequence: U32::new(header.sequence),
            sample_rate_hz: U32::new(header.sample_rate_hz),
            block_size: U16::new(header.block_size),
        }
    }
}

/// One Stokes sample on the wire (20 bytes)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct StokesWire {
    pub s0: F32,
    pub s1: F32,
    pub s2: F32,
    pub s3: F32,
    pub dop: F32,
}

impl From<StokeSample> for StokesWire {
    fn from(sample: StokeSample) -> Self {
        Self {
            s0: F32::new(sample.s0),
            s1: F32::new(sample.s1),
            s2: F32::new(sample.s2),
            s3: F32::new(sample.s3),
            dop: F32::new(sample.dop),
        }
    }
}

impl From<StokesWire> for StokeSample {
    fn from(raw: StokesWire) -> Self {
        StokeSample::new(raw.s0.get(), raw.s1.get(), raw.s2.get(), raw.s3.get(), raw.dop.get())
    }
}

/// One audio amplitude on the wire (4 bytes)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct AudioWire {
    pub amplitude: F32,
}

impl From<AudioSample> for AudioWire {
    fn from(sample: AudioSample) -> Self {
        Self {
            amplitude: F32::new(sample.amplitude),
        }
    }
}

impl From<AudioWire> for AudioSample {
    fn from(raw: AudioWire) -> Self {
        AudioSample::new(raw.amplitude.get())
    }
}

/// A sample type that can travel in a telemetry datagram.
pub trait WireSample: Copy {
    type Raw: FromBytes + IntoBytes + KnownLayout + Immutable + Unaligned + Copy;

    /// Bytes per sample inside a batch
    const SIZE: usize;
    /// Exact length of a legacy single-sample datagram
    const LEGACY_SIZE: usize;

    fn to_wire(self) -> Self::Raw;
    fn from_wire(raw: Self::Raw) -> Self;
}

impl WireSample for StokeSample {
    type Raw = StokesWire;
    const SIZE: usize = STOKES_SAMPLE_SIZE;
    const LEGACY_SIZE: usize = LEGACY_STOKES_SIZE;

    fn to_wire(self) -> StokesWire {
        self.into()
    }

    fn from_wire(raw: StokesWire) -> Self {
        raw.into()
    }
}

impl WireSample for AudioSample {
    type Raw = AudioWire;
    const SIZE: usize = AUDIO_SAMPLE_SIZE;
    const LEGACY_SIZE: usize = LEGACY_AUDIO_SIZE;

    fn to_wire(self) -> AudioWire {
        self.into()
    }

    fn from_wire(raw: AudioWire) -> Self {
        raw.into()
    }
}

/// A decoded telemetry datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Datagram<T> {
    /// One sample, no header and no sequence number
    Legacy(T),
    Batch { header: BatchHeader, samples: Vec<T> },
}

impl<T> Datagram<T> {
    pub fn is_legacy(&self) -> bool {
        matches!(self, Datagram::Legacy(_))
    }

    pub fn sequence(&self) -> Option<u32> {
        match self {
            Datagram::Legacy(_) => None,
            Datagram::Batch { header, .. } => Some(header.sequence),
        }
    }

    pub fn sample_rate_hz(&self) -> Option<u32> {
        match self {
            Datagram::Legacy(_) => None,
            Datagram::Batch { header, .. } => Some(header.sample_rate_hz),
        }
    }

    pub fn samples(&self) -> &[T] {
        match self {
            Datagram::Legacy(sample) => std::slice::from_ref(sample),
            Datagram::Batch { samples, .. } => samples,
        }
    }

    pub fn into_samples(self) -> Vec<T> {
        match self {
            Datagram::Legacy(sample) => vec![sample],
            Datagram::Batch { samples, .. } => samples,
        }
    }
}

/// Encode a batch datagram. Fails if `samples` does not fit the 16-bit block size field.
pub fn encode_batch<T: WireSample>(sequence: u32, sample_rate_hz: u32, samples: &[T]) -> Result<Bytes> {
    let block_size = u16::try_from(samples.len()).map_err(|_| PmError::BlockTooLarge(samples.len()))?;
    let header = BatchHeaderRaw::from(BatchHeader {
        sequence,
        sample_rate_hz,
        block_size,
    });

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + samples.len() * T::SIZE);
    buf.put_slice(header.as_bytes());
    for sample in samples {
        buf.put_slice(sample.to_wire().as_bytes());
    }
    Ok(buf.freeze())
}

/// Encode a legacy single-sample datagram with its trailing timestamp.
pub fn encode_legacy<T: WireSample>(sample: T, timestamp_us: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(T::LEGACY_SIZE);
    buf.put_slice(sample.to_wire().as_bytes());
    buf.put_u32_le(timestamp_us);
    buf.freeze()
}

/// Decode one datagram, detecting its format by length.
pub fn decode<T: WireSample>(bytes: &[u8]) -> Result<Datagram<T>> {
    if bytes.len() == T::LEGACY_SIZE {
        let (raw, _timestamp) = T::Raw::read_from_prefix(bytes).map_err(|_| PmError::Malformed(bytes.len()))?;
        return Ok(Datagram::Legacy(T::from_wire(raw)));
    }

    let (raw_header, body) = BatchHeaderRaw::read_from_prefix(bytes).map_err(|_| PmError::Malformed(bytes.len()))?;
    let header = BatchHeader::from(raw_header);

    let needed = usize::from(header.block_size) * T::SIZE;
    if body.len() < needed {
        return Err(PmError::Truncated {
            expected: HEADER_SIZE + needed,
            actual: bytes.len(),
        });
    }
    if body.len() > needed {
        trace!(extra = body.len() - needed, "Ignoring trailing bytes after batch");
    }

    let samples = body[..needed]
        .chunks_exact(T::SIZE)
        .map(|chunk| {
            T::Raw::read_from_bytes(chunk)
                .map(T::from_wire)
                .map_err(|_| PmError::InvalidPacket("Failed to parse telemetry sample".to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Datagram::Batch { header, samples })
}
