//! Bodies of the streamer's HTTP control endpoints.
//!
//! ```text
//! GET  /frequency   -> {"hz": 193414000000.0}   laser frequency
//! GET  /samplerate  -> {"hz": 16000}
//! POST /samplerate     {"hz": 16000}
//! ```
//!
//! Only the message shapes live here; no server or client is provided.

use serde::{Deserialize, Serialize};

pub const FREQUENCY_PATH: &str = "/frequency";
pub const SAMPLE_RATE_PATH: &str = "/samplerate";

/// Laser light frequency in Hz
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frequency {
    pub hz: f64,
}

/// Audio sample rate in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRate {
    pub hz: u32,
}

impl Frequency {
    /// Vacuum wavelength in nanometres
    pub fn wavelength_nm(&self) -> Option<f64> {
        const SPEED_OF_LIGHT: f64 = 299_792_458.0;
        (self.hz > 0.0).then(|| SPEED_OF_LIGHT / self.hz * 1e9)
    }
}
