use crate::packet::FrameKind;
use std::io;
use thiserror::Error;

/// The primary error type for the `pm1000-lib` library.
#[derive(Error, Debug)]
pub enum PmError {
    #[error("USB device not found. Is the PM1000 (FT60x bridge) connected?")]
    DeviceNotFound,

    /// Socket and USB enumeration errors. `nusb::Error` is `std::io::Error` in nusb 0.1.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("USB transfer error: {0}")]
    Transfer(#[from] nusb::transfer::TransferError),

    #[error("Timeout during USB operation: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("{0:?} frames have no specified byte layout")]
    UnspecifiedLayout(FrameKind),

    #[error("Unexpected response: expected {expected:?}, got {actual:?}")]
    UnexpectedResponse { expected: FrameKind, actual: FrameKind },

    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("Malformed datagram: {0} bytes matches neither wire format")]
    Malformed(usize),

    #[error("Truncated datagram: header announces {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Block of {0} samples exceeds the u16 block size field")]
    BlockTooLarge(usize),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for PmError {
    fn from(e: serde_json::Error) -> Self {
        PmError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PmError>;
