// Protocol constants for the PM1000 and its telemetry streams

/// Number of 16-bit words in every device frame
pub const FRAME_WORDS: usize = 4;

/// Size of a device frame on the pipe (8 bytes)
pub const FRAME_SIZE: usize = FRAME_WORDS * 2;

/// Only the low 12 bits of a register address reach the device
pub const ADDRESS_MASK: u16 = 0x0FFF;

/// Seed of the running checksum
pub const CRC_SEED: u16 = 0xFFFF;

/// "All OK" marker the device reports in the pm_crc field of a read response
pub const CRC_OK: u16 = 0xCCCC;

/// Offset of signed-with-offset registers (2^15)
pub const STOKES_OFFSET: u16 = 32768;

/// Resolution of a fractional register (2^16)
pub const FRACTIONAL_RESOLUTION: f32 = 65536.0;

/// Resolution of the DOP register: 16 bit unsigned, 15 fractional bits
pub const DOP_RESOLUTION: f32 = 32768.0;

/// Size of the batch datagram header (4 + 4 + 2 bytes)
pub const HEADER_SIZE: usize = 10;

/// Size of one Stokes sample in a batch (5 x f32)
pub const STOKES_SAMPLE_SIZE: usize = 20;

/// Size of one audio sample in a batch (1 x f32)
pub const AUDIO_SAMPLE_SIZE: usize = 4;

/// Legacy Stokes datagram: 5 x f32 + u32 timestamp
pub const LEGACY_STOKES_SIZE: usize = 24;

/// Legacy audio datagram: f32 + u32 timestamp
pub const LEGACY_AUDIO_SIZE: usize = 8;

/// Largest datagram the receivers accept
pub const MAX_DATAGRAM_SIZE: usize = 65536;

pub const STOKES_PORT: u16 = 5000;
pub const RAW_AUDIO_PORT: u16 = 5001;
pub const PROCESSED_AUDIO_PORT: u16 = 5002;

/// Norm below which S1..S3 carry no usable polarization
pub const MIN_POLARIZATION_NORM: f32 = 0.001;
