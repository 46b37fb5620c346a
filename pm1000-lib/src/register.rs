use crate::constants::{DOP_RESOLUTION, FRACTIONAL_RESOLUTION, STOKES_OFFSET};
use num_enum::IntoPrimitive;
use strum_macros::Display;

/// Base address of the measurement register block
pub const BASE: u16 = 512;

/// Measurement registers read by the poll cycle.
///
/// Upper registers hold the integer part, lower registers the fractional part.
/// A lower register is latched when its upper register is read, so the upper
/// one has to be read first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive)]
#[repr(u16)]
pub enum Register {
    /// Input power in µW, integer part
    S0Upper = BASE + 10,
    S0Lower = BASE + 11,
    /// S1 normalized to 1 µW, integer part, offset 2^15
    S1Upper = BASE + 12,
    S1Lower = BASE + 13,
    S2Upper = BASE + 14,
    S2Lower = BASE + 15,
    S3Upper = BASE + 16,
    S3Lower = BASE + 17,
    /// Degree of polarization, 16 bit unsigned with 15 fractional bits
    Dop = BASE + 24,
}

impl Register {
    pub fn address(self) -> u16 {
        self.into()
    }
}

/// Order in which one poll cycle reads the registers.
pub const POLL_ORDER: [Register; 9] = [
    Register::S0Upper,
    Register::S0Lower,
    Register::S1Upper,
    Register::S1Lower,
    Register::S2Upper,
    Register::S2Lower,
    Register::S3Upper,
    Register::S3Lower,
    Register::Dop,
];

/// Combines an integer and a fractional register into one value:
/// `(integer - offset) + fractional / 65536`.
///
/// `offset` is 0 for unsigned quantities and [`STOKES_OFFSET`] for S1..S3.
pub fn to_float(integer: u16, fractional: u16, offset: u16) -> f32 {
    (i32::from(integer) - i32::from(offset)) as f32 + f32::from(fractional) / FRACTIONAL_RESOLUTION
}

/// Inverse of [`to_float`], saturating at the register range.
pub fn from_float(value: f32, offset: u16) -> (u16, u16) {
    let shifted = (f64::from(value) + f64::from(offset)).clamp(0.0, f64::from(u16::MAX) + 0.999_984);
    let integer = shifted.floor();
    let fractional = ((shifted - integer) * f64::from(FRACTIONAL_RESOLUTION)).floor();
    (integer as u16, fractional as u16)
}

pub fn signed_to_float(integer: u16, fractional: u16) -> f32 {
    to_float(integer, fractional, STOKES_OFFSET)
}

/// DOP register to a fraction in [0, 2).
pub fn dop_from_register(data: u16) -> f32 {
    f32::from(data) / DOP_RESOLUTION
}

pub fn dop_to_register(dop: f32) -> u16 {
    (dop * DOP_RESOLUTION).round().clamp(0.0, f32::from(u16::MAX)) as u16
}
