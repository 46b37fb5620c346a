//! # PM1000 register protocol frames
//!
//! Every exchange with the instrument is one fixed 8-byte request followed by
//! one fixed 8-byte response. A frame is four little-endian 16-bit words:
//!
//! ```text
//! request:        [ ascii command | address & 0xFFF | data or 0 | checksum ]
//! read response:  [ fifo length   | pm crc          | data      | fifo crc ]
//! ```
//!
//! The checksum word always covers the three words before it (see
//! [`crate::checksum::checksum`]). Write responses have no documented layout,
//! so parsing one fails with [`PmError::UnspecifiedLayout`] instead of guessing.

use crate::checksum::checksum;
use crate::constants::{ADDRESS_MASK, CRC_OK, FRAME_SIZE, FRAME_WORDS};
use crate::error::{PmError, Result};
use bytes::Bytes;
use modular_bitfield::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Second word of a Read/Write request. Only 12 address bits reach the device.
#[bitfield(bytes = 2)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AddressWord {
    pub address: B12,
    #[skip]
    unused: B4,
}

impl AddressWord {
    /// Truncates `address` to its low 12 bits.
    pub fn masked(address: u16) -> Self {
        AddressWord::new().with_address(address & ADDRESS_MASK)
    }

    pub fn to_word(self) -> u16 {
        u16::from_le_bytes(self.into_bytes())
    }
}

/// ASCII command letter carried in the first word of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum Command {
    /// 'R'
    Read = 0x52,
    /// 'W'
    Write = 0x57,
    /// 'F', SDRAM data transfer
    Transfer = 0x46,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Read,
    ReadResponse,
    Write,
    WriteResponse,
    Transfer,
    TransferResponse,
    Arbitrary,
}

impl FrameKind {
    /// The kind of frame the device answers a request of this kind with.
    pub fn response(self) -> Option<FrameKind> {
        match self {
            FrameKind::Read => Some(FrameKind::ReadResponse),
            FrameKind::Write => Some(FrameKind::WriteResponse),
            FrameKind::Transfer => Some(FrameKind::TransferResponse),
            _ => None,
        }
    }
}

impl From<Command> for FrameKind {
    fn from(command: Command) -> Self {
        match command {
            Command::Read => FrameKind::Read,
            Command::Write => FrameKind::Write,
            Command::Transfer => FrameKind::Transfer,
        }
    }
}

/// An 8-byte request frame. The last word is always the checksum of the first three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    command: Command,
    words: [u16; FRAME_WORDS],
}

impl Request {
    fn build(command: Command, field1: u16, field2: u16) -> Self {
        let mut words = [command.into(), field1, field2, 0];
        words[3] = checksum(&words, 3);
        Self { command, words }
    }

    /// Read one register. Addresses above 0xFFF are truncated, not rejected.
    pub fn read(address: u16) -> Self {
        Self::build(Command::Read, AddressWord::masked(address).to_word(), 0)
    }

    /// Write `data` into one register. Addresses above 0xFFF are truncated.
    pub fn write(address: u16, data: u16) -> Self {
        Self::build(Command::Write, AddressWord::masked(address).to_word(), data)
    }

    /// Start an SDRAM data transfer.
    pub fn transfer() -> Self {
        Self::build(Command::Transfer, 0, 0)
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn kind(&self) -> FrameKind {
        self.command.into()
    }

    pub fn words(&self) -> &[u16; FRAME_WORDS] {
        &self.words
    }

    pub fn address(&self) -> u16 {
        self.words[1]
    }

    pub fn data(&self) -> u16 {
        self.words[2]
    }

    pub fn checksum(&self) -> u16 {
        self.words[3]
    }

    /// Recomputes the checksum over the first three words and compares it with the last one.
    pub fn verify(&self) -> Result<()> {
        let expected = checksum(&self.words, 3);
        if expected != self.checksum() {
            return Err(PmError::ChecksumMismatch {
                expected,
                actual: self.checksum(),
            });
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
        let mut out = [0u8; FRAME_SIZE];
        for (chunk, word) in out.chunks_exact_mut(2).zip(self.words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Parses request bytes as they appear on the pipe. The checksum is kept as
    /// received; call [`Request::verify`] to check it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw = RawFrame::read_from_bytes(bytes).map_err(|_| PmError::InvalidLength {
            expected: FRAME_SIZE,
            actual: bytes.len(),
        })?;
        let words = raw.words();
        let command = Command::try_from(words[0])
            .map_err(|_| PmError::InvalidPacket(format!("Unknown command word {:#06x}", words[0])))?;
        Ok(Self { command, words })
    }
}

/// Wire image of any 8-byte frame.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct RawFrame {
    words: [U16; FRAME_WORDS],
}

impl RawFrame {
    fn words(&self) -> [u16; FRAME_WORDS] {
        self.words.map(|w| w.get())
    }
}

/// Answer to a Read request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadResponse {
    pub fifo_length: u16,
    pub pm_crc: u16,
    pub data: u16,
    pub fifo_crc: u16,
}

impl ReadResponse {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != FRAME_SIZE {
            return Err(PmError::InvalidLength {
                expected: FRAME_SIZE,
                actual: bytes.len(),
            });
        }
        let [fifo_length, pm_crc, data, fifo_crc] = RawFrame::read_from_bytes(bytes)
            .map_err(|_| PmError::InvalidPacket("Failed to parse read response".to_string()))?
            .words();
        Ok(Self {
            fifo_length,
            pm_crc,
            data,
            fifo_crc,
        })
    }

    pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
        let raw = RawFrame {
            words: [self.fifo_length, self.pm_crc, self.data, self.fifo_crc].map(U16::new),
        };
        let mut out = [0u8; FRAME_SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    /// Whether the device reported the "all OK" marker for the request it received.
    pub fn pm_crc_ok(&self) -> bool {
        self.pm_crc == CRC_OK
    }
}

/// Any frame exchanged over the pipe, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Read(Request),
    Write(Request),
    Transfer(Request),
    ReadResponse(ReadResponse),
    /// Opaque payload, accepted without interpretation. Always a whole number of words.
    Arbitrary(Bytes),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Read(_) => FrameKind::Read,
            Frame::Write(_) => FrameKind::Write,
            Frame::Transfer(_) => FrameKind::Transfer,
            Frame::ReadResponse(_) => FrameKind::ReadResponse,
            Frame::Arbitrary(_) => FrameKind::Arbitrary,
        }
    }

    /// Wraps raw bytes as an arbitrary frame. The length must be even.
    pub fn arbitrary(bytes: Bytes) -> Result<Self> {
        if bytes.len() % 2 != 0 {
            return Err(PmError::InvalidPacket(format!(
                "Arbitrary frame length {} is not a whole number of words",
                bytes.len()
            )));
        }
        Ok(Frame::Arbitrary(bytes))
    }

    /// Parses the 8 bytes read back after sending a request of `request` kind.
    pub fn parse_response(request: FrameKind, bytes: Bytes) -> Result<Self> {
        if bytes.len() != FRAME_SIZE {
            return Err(PmError::InvalidLength {
                expected: FRAME_SIZE,
                actual: bytes.len(),
            });
        }
        match request.response() {
            Some(FrameKind::ReadResponse) => Ok(Frame::ReadResponse(ReadResponse::from_bytes(&bytes)?)),
            Some(FrameKind::WriteResponse) => Err(PmError::UnspecifiedLayout(FrameKind::WriteResponse)),
            _ => Frame::arbitrary(bytes),
        }
    }

    pub fn as_read_response(&self) -> Option<&ReadResponse> {
        match self {
            Frame::ReadResponse(response) => Some(response),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            Frame::Read(request) | Frame::Write(request) | Frame::Transfer(request) => {
                Bytes::copy_from_slice(&request.to_bytes())
            }
            Frame::ReadResponse(response) => Bytes::copy_from_slice(&response.to_bytes()),
            Frame::Arbitrary(payload) => payload.clone(),
        }
    }
}

impl From<Request> for Frame {
    fn from(request: Request) -> Self {
        match request.command() {
            Command::Read => Frame::Read(request),
            Command::Write => Frame::Write(request),
            Command::Transfer => Frame::Transfer(request),
        }
    }
}
