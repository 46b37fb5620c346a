use crate::constants::MIN_POLARIZATION_NORM;
use serde::{Deserialize, Serialize};
use std::fmt;
use uom::si::f32::Power;
use uom::si::power::microwatt;

/// One polarimeter reading.
///
/// S1..S3 are normalized to S0 and nominally lie on the unit sphere, but noise
/// means they do not have to. A vector shorter than [`MIN_POLARIZATION_NORM`]
/// carries no usable polarization.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StokeSample {
    /// Total power in µW
    pub s0: f32,
    pub s1: f32,
    pub s2: f32,
    pub s3: f32,
    /// Degree of polarization, 0 (unpolarized) to 1 (fully polarized)
    pub dop: f32,
}

impl StokeSample {
    pub fn new(s0: f32, s1: f32, s2: f32, s3: f32, dop: f32) -> Self {
        Self { s0, s1, s2, s3, dop }
    }

    pub fn power(&self) -> Power {
        Power::new::<microwatt>(self.s0)
    }

    /// Euclidean length of (S1, S2, S3)
    pub fn polarization_norm(&self) -> f32 {
        (self.s1 * self.s1 + self.s2 * self.s2 + self.s3 * self.s3).sqrt()
    }

    pub fn is_polarized(&self) -> bool {
        self.polarization_norm() >= MIN_POLARIZATION_NORM
    }

    /// Point on the Poincaré sphere, or `None` when there is no reliable polarization.
    pub fn unit_vector(&self) -> Option<[f32; 3]> {
        let norm = self.polarization_norm();
        if norm < MIN_POLARIZATION_NORM {
            return None;
        }
        Some([self.s1 / norm, self.s2 / norm, self.s3 / norm])
    }
}

impl fmt::Display for StokeSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "S0: {:.3} µW, S1: {:+.4}, S2: {:+.4}, S3: {:+.4}, DOP: {:.1} %",
            self.s0,
            self.s1,
            self.s2,
            self.s3,
            self.dop * 100.0
        )
    }
}

/// One audio amplitude, roughly -1..1 but never clamped.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioSample {
    pub amplitude: f32,
}

impl AudioSample {
    pub fn new(amplitude: f32) -> Self {
        Self { amplitude }
    }
}

impl From<f32> for AudioSample {
    fn from(amplitude: f32) -> Self {
        Self { amplitude }
    }
}

impl fmt::Display for AudioSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+.5}", self.amplitude)
    }
}
