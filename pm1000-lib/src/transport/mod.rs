//! Device transport boundary.
//!
//! A transport sends one request frame down the pipe and reads back the
//! fixed-size answer, parsed according to the request kind. Every call is a
//! complete request/response exchange; a failure only affects that exchange.

use crate::error::Result;
use crate::packet::{Frame, Request};
use std::future::Future;

mod sim;
mod usb;

pub use sim::SimulatedPm1000;
pub use usb::{PIPE_IN, PIPE_OUT, PRODUCT_IDS, UsbTransport, VENDOR_ID};

pub trait Transport: Send {
    /// Send `request` and return the parsed response frame.
    fn transact(&mut self, request: &Request) -> impl Future<Output = Result<Frame>> + Send;
}
