//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use hex;
#[allow(unused_imports)]
pub use pm1000_lib::error::PmError;
#[allow(unused_imports)]
pub use pm1000_lib::packet::{Frame, FrameKind, ReadResponse, Request};
#[allow(unused_imports)]
pub use pm1000_lib::sample::{AudioSample, StokeSample};
#[allow(unused_imports)]
pub use pm1000_lib::telemetry::{Channel, TelemetryEvent};

/// Decode hex string to bytes for testing
#[allow(dead_code)]
pub fn hex_to_bytes(hex_data: &str) -> Bytes {
    Bytes::from(hex::decode(hex_data).expect("Failed to decode hex"))
}

/// Read(0x21A) as it goes down the pipe
#[allow(dead_code)]
pub const READ_S0_UPPER: &str = "52001a02000083fa";

/// Batch Stokes datagram: sequence 7, 500 Hz, one sample (15.25, 0.5, -0.25, 0.75, 0.5)
#[allow(dead_code)]
pub const STOKES_BATCH_ONE: &str = "07000000f40100000100000074410000003f000080be0000403f0000003f";

/// Legacy audio datagram: amplitude -0.5, timestamp 0x01020304
#[allow(dead_code)]
pub const LEGACY_AUDIO: &str = "000000bf04030201";

#[allow(dead_code)]
pub fn stokes(s0: f32, s1: f32, s2: f32, s3: f32, dop: f32) -> StokeSample {
    StokeSample::new(s0, s1, s2, s3, dop)
}

/// Fill `len` distinct Stokes samples
#[allow(dead_code)]
pub fn stokes_block(len: usize) -> Vec<StokeSample> {
    (0..len)
        .map(|i| {
            let t = i as f32;
            stokes(10.0 + t, (t * 0.1).sin(), (t * 0.1).cos(), 0.0, 0.9)
        })
        .collect()
}

/// Enable log output for a test run (`RUST_LOG=debug cargo test`)
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
