//! In-memory PM1000 for tests and bench runs without hardware.

use super::Transport;
use crate::constants::{CRC_OK, FRAME_SIZE, STOKES_OFFSET};
use crate::error::{PmError, Result};
use crate::packet::{Command, Frame, ReadResponse, Request};
use crate::register::{Register, dop_to_register, from_float};
use crate::sample::StokeSample;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::io;
use tracing::trace;

/// Register file answering requests the way the instrument does.
///
/// Reads of registers marked with [`SimulatedPm1000::fail_register`] fail like
/// a pipe timeout would.
#[derive(Debug, Clone)]
pub struct SimulatedPm1000 {
    registers: HashMap<u16, u16>,
    failing: HashSet<u16>,
    pm_crc: u16,
    requests: Vec<Request>,
}

impl Default for SimulatedPm1000 {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPm1000 {
    pub fn new() -> Self {
        Self {
            registers: HashMap::new(),
            failing: HashSet::new(),
            pm_crc: CRC_OK,
            requests: Vec::new(),
        }
    }

    pub fn set_register(&mut self, address: u16, data: u16) {
        self.registers.insert(address, data);
    }

    pub fn register(&self, address: u16) -> u16 {
        self.registers.get(&address).copied().unwrap_or(0)
    }

    /// Encodes `sample` into the measurement registers.
    pub fn load_sample(&mut self, sample: &StokeSample) {
        let pairs = [
            (Register::S0Upper, Register::S0Lower, sample.s0, 0),
            (Register::S1Upper, Register::S1Lower, sample.s1, STOKES_OFFSET),
            (Register::S2Upper, Register::S2Lower, sample.s2, STOKES_OFFSET),
            (Register::S3Upper, Register::S3Lower, sample.s3, STOKES_OFFSET),
        ];
        for (upper, lower, value, offset) in pairs {
            let (integer, fractional) = from_float(value, offset);
            self.set_register(upper.address(), integer);
            self.set_register(lower.address(), fractional);
        }
        self.set_register(Register::Dop.address(), dop_to_register(sample.dop));
    }

    pub fn fail_register(&mut self, address: u16) {
        self.failing.insert(address);
    }

    pub fn clear_failures(&mut self) {
        self.failing.clear();
    }

    /// Value reported in the pm_crc field of read responses.
    pub fn set_pm_crc(&mut self, pm_crc: u16) {
        self.pm_crc = pm_crc;
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    fn answer(&mut self, request: &Request) -> Result<Bytes> {
        match request.command() {
            Command::Read => {
                if self.failing.contains(&request.address()) {
                    return Err(PmError::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("simulated read failure at {:#05x}", request.address()),
                    )));
                }
                let response = ReadResponse {
                    fifo_length: 0,
                    pm_crc: self.pm_crc,
                    data: self.register(request.address()),
                    fifo_crc: 0,
                };
                Ok(Bytes::copy_from_slice(&response.to_bytes()))
            }
            Command::Write => {
                self.set_register(request.address(), request.data());
                Ok(Bytes::from_static(&[0u8; FRAME_SIZE]))
            }
            Command::Transfer => Ok(Bytes::from_static(&[0u8; FRAME_SIZE])),
        }
    }
}

impl Transport for SimulatedPm1000 {
    async fn transact(&mut self, request: &Request) -> Result<Frame> {
        trace!(bytes = hex::encode(request.to_bytes()), "Simulated request");
        self.requests.push(*request);
        let response = self.answer(request)?;
        Frame::parse_response(request.kind(), response)
    }
}
