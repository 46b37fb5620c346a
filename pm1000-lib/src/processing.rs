//! Processed audio: Stokes snapshots turned into an audio stream.
//!
//! The polarization vector (S1, S2, S3) is projected onto its principal axis,
//! tracked online with Oja's rule, and the projection is high-passed with a
//! Butterworth filter to strip the slow drift. One Stokes snapshot in gives one
//! audio sample out.

use crate::error::{PmError, Result};
use crate::sample::{AudioSample, StokeSample};
use crate::snapshot::SnapshotPublisher;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub learning_rate: f64,
    pub cutoff_hz: f64,
    /// Rate at which Stokes snapshots arrive
    pub sample_rate_hz: f64,
    pub filter_order: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            cutoff_hz: 20.0,
            sample_rate_hz: 1525.88,
            filter_order: 4,
        }
    }
}

impl ProcessingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(PmError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        HighPass::butterworth(self.filter_order, self.cutoff_hz, self.sample_rate_hz).map(|_| ())
    }
}

/// Online estimate of the first principal axis of a 3-vector stream.
#[derive(Debug, Clone)]
pub struct OjaProjector {
    weights: [f64; 3],
    learning_rate: f64,
}

impl OjaProjector {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            weights: Self::initial_weights(),
            learning_rate,
        }
    }

    fn initial_weights() -> [f64; 3] {
        [1.0 / 3f64.sqrt(); 3]
    }

    /// Current axis, always of unit length.
    pub fn weights(&self) -> [f64; 3] {
        self.weights
    }

    /// Project `x` onto the current axis, then move the axis towards `x`.
    pub fn update(&mut self, x: [f64; 3]) -> f64 {
        let y = dot(&self.weights, &x);
        let mut next = self.weights;
        for (w, xi) in next.iter_mut().zip(x) {
            *w += self.learning_rate * y * (xi - y * *w);
        }

        let norm = dot(&next, &next).sqrt();
        // A degenerate step cannot be normalized; start over from the diagonal
        self.weights = if norm.is_finite() && norm > 0.0 {
            next.map(|w| w / norm)
        } else {
            Self::initial_weights()
        };
        y
    }
}

fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter().zip(b).map(|(a, b)| a * b).sum()
}

/// One second-order section, transposed direct form II.
#[derive(Debug, Clone, Copy)]
struct Section {
    b: [f64; 3],
    a: [f64; 2],
    z: [f64; 2],
}

impl Section {
    fn process(&mut self, x: f64) -> f64 {
        let y = self.b[0] * x + self.z[0];
        self.z[0] = self.b[1] * x - self.a[0] * y + self.z[1];
        self.z[1] = self.b[2] * x - self.a[1] * y;
        y
    }
}

/// Digital Butterworth high-pass built from cascaded second-order sections
/// (bilinear transform, cutoff prewarped). An odd order adds one first-order
/// section. Gain is exactly 0 at DC and 1 at Nyquist.
#[derive(Debug, Clone)]
pub struct HighPass {
    sections: Vec<Section>,
}

impl HighPass {
    pub fn butterworth(order: usize, cutoff_hz: f64, sample_rate_hz: f64) -> Result<Self> {
        if order == 0 {
            return Err(PmError::Config("filter_order must be at least 1".to_string()));
        }
        if !(sample_rate_hz.is_finite() && cutoff_hz > 0.0 && cutoff_hz < sample_rate_hz / 2.0) {
            return Err(PmError::Config(format!(
                "cutoff {cutoff_hz} Hz must lie between 0 and half the sample rate ({sample_rate_hz} Hz)"
            )));
        }

        let w0 = 2.0 * PI * cutoff_hz / sample_rate_hz;
        let (sin, cos) = w0.sin_cos();
        let mut sections = Vec::with_capacity(order.div_ceil(2));

        for k in 0..order / 2 {
            // Quality factor of the k-th conjugate pole pair
            let q = 1.0 / (2.0 * (PI * (2 * k + 1) as f64 / (2 * order) as f64).sin());
            let alpha = sin / (2.0 * q);
            let a0 = 1.0 + alpha;
            let b0 = (1.0 + cos) / 2.0 / a0;
            sections.push(Section {
                b: [b0, -2.0 * b0, b0],
                a: [-2.0 * cos / a0, (1.0 - alpha) / a0],
                z: [0.0; 2],
            });
        }

        if order % 2 == 1 {
            let k = (w0 / 2.0).tan();
            let b0 = 1.0 / (1.0 + k);
            sections.push(Section {
                b: [b0, -b0, 0.0],
                a: [(k - 1.0) / (k + 1.0), 0.0],
                z: [0.0; 2],
            });
        }

        Ok(Self { sections })
    }

    pub fn process(&mut self, x: f64) -> f64 {
        self.sections.iter_mut().fold(x, |acc, section| section.process(acc))
    }
}

/// Stokes to processed audio, one sample at a time.
#[derive(Debug, Clone)]
pub struct SignalProcessor {
    projector: OjaProjector,
    filter: HighPass,
}

impl SignalProcessor {
    pub fn new(config: &ProcessingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            projector: OjaProjector::new(config.learning_rate),
            filter: HighPass::butterworth(config.filter_order, config.cutoff_hz, config.sample_rate_hz)?,
        })
    }

    pub fn projector(&self) -> &OjaProjector {
        &self.projector
    }

    pub fn process(&mut self, sample: &StokeSample) -> AudioSample {
        let x = [f64::from(sample.s1), f64::from(sample.s2), f64::from(sample.s3)];
        let projected = self.projector.update(x);
        AudioSample::new(self.filter.process(projected) as f32)
    }

    /// Turn every new Stokes snapshot into an audio snapshot until `token`
    /// is cancelled. Returns the number of samples published.
    pub async fn run(&mut self, publisher: &SnapshotPublisher, token: CancellationToken) -> u64 {
        info!("Signal processor started");
        let mut seen = publisher.stokes_version();
        let mut produced = 0u64;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                version = publisher.wait_stokes_change(seen) => {
                    if version.wrapping_sub(seen) > 1 {
                        debug!(skipped = version.wrapping_sub(seen) - 1, "Processor fell behind the poller");
                    }
                    seen = version;
                }
            }

            let audio = self.process(&publisher.latest_stokes());
            publisher.publish_audio(audio);
            produced += 1;
        }

        info!(produced, "Signal processor stopped");
        produced
    }
}
