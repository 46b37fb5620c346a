use std::time::Instant;

/// Microseconds since the clock was created, truncated to 32 bits.
///
/// Wraps to 0 roughly every 71.6 minutes. Only used for the trailing
/// timestamp of legacy datagrams, which receivers ignore.
#[derive(Debug, Clone, Copy)]
pub struct StreamClock {
    start: Instant,
}

impl Default for StreamClock {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn now_us(&self) -> u32 {
        wrap_micros(self.start.elapsed().as_micros())
    }
}

pub(crate) fn wrap_micros(micros: u128) -> u32 {
    (micros & u128::from(u32::MAX)) as u32
}
