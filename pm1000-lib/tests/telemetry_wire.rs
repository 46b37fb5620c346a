//! UDP telemetry formats and length-based detection

mod common;

use common::*;
use pm1000_lib::constants::HEADER_SIZE;
use pm1000_lib::telemetry::{Datagram, decode, encode_batch, encode_legacy};

#[test]
fn test_batch_stokes_fixture() {
    let datagram = decode::<StokeSample>(&hex_to_bytes(STOKES_BATCH_ONE)).unwrap();
    assert_eq!(datagram.sequence(), Some(7));
    assert_eq!(datagram.sample_rate_hz(), Some(500));
    assert_eq!(datagram.samples(), &[stokes(15.25, 0.5, -0.25, 0.75, 0.5)]);

    let encoded = encode_batch(7, 500, &[stokes(15.25, 0.5, -0.25, 0.75, 0.5)]).unwrap();
    assert_eq!(hex::encode(&encoded), STOKES_BATCH_ONE);
}

#[test]
fn test_batch_stokes_keeps_block_size_and_order() {
    for n in [0usize, 1, 2, 16, 100] {
        let samples = stokes_block(n);
        let bytes = encode_batch(42, 16_000, &samples).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 20 * n);

        match decode::<StokeSample>(&bytes).unwrap() {
            Datagram::Batch { header, samples: decoded } => {
                assert_eq!(usize::from(header.block_size), n);
                assert_eq!(header.sequence, 42);
                assert_eq!(decoded, samples);
            }
            Datagram::Legacy(_) => panic!("{n} samples decoded as legacy"),
        }
    }
}

#[test]
fn test_batch_audio() {
    let samples: Vec<AudioSample> = [0.0, 0.5, -1.0, 1.25].into_iter().map(AudioSample::new).collect();
    let bytes = encode_batch(u32::MAX, 16_000, &samples).unwrap();
    assert_eq!(bytes.len(), HEADER_SIZE + 4 * samples.len());

    let datagram = decode::<AudioSample>(&bytes).unwrap();
    assert_eq!(datagram.sequence(), Some(u32::MAX));
    assert_eq!(datagram.into_samples(), samples);
}

#[test]
fn test_legacy_detected_by_exact_length() {
    let sample = stokes(1.0, 0.0, 1.0, 0.0, 1.0);
    let bytes = encode_legacy(sample, 123_456);
    assert_eq!(bytes.len(), 24);
    assert_eq!(decode::<StokeSample>(&bytes).unwrap(), Datagram::Legacy(sample));

    let audio = decode::<AudioSample>(&hex_to_bytes(LEGACY_AUDIO)).unwrap();
    assert!(audio.is_legacy());
    assert_eq!(audio.sequence(), None);
    assert_eq!(audio.samples(), &[AudioSample::new(-0.5)]);
}

#[test]
fn test_short_stokes_buffers_rejected() {
    // Every length from 10 to 23 either announces samples it does not carry or is too short
    for len in 10..24usize {
        let mut bytes = vec![0u8; len];
        bytes[8] = 1; // block_size = 1
        let err = decode::<StokeSample>(&bytes).unwrap_err();
        assert!(
            matches!(err, PmError::Truncated { expected: 30, actual } if actual == len),
            "length {len}: {err}"
        );
    }
    for len in 0..10usize {
        let err = decode::<StokeSample>(&vec![0u8; len]).unwrap_err();
        assert!(matches!(err, PmError::Malformed(l) if l == len));
    }
}

#[test]
fn test_short_audio_buffers_rejected() {
    for len in [0usize, 3, 7, 9] {
        let err = decode::<AudioSample>(&vec![0u8; len]).unwrap_err();
        assert!(matches!(err, PmError::Malformed(_)), "length {len}: {err}");
    }
}

#[test]
fn test_truncated_batch_rejected() {
    let bytes = encode_batch(1, 0, &stokes_block(3)).unwrap();
    let err = decode::<StokeSample>(&bytes[..bytes.len() - 1]).unwrap_err();
    assert!(matches!(err, PmError::Truncated { expected: 70, actual: 69 }));
}

#[test]
fn test_trailing_bytes_ignored() {
    let mut bytes = encode_batch(3, 0, &stokes_block(2)).unwrap().to_vec();
    bytes.extend_from_slice(&[0xAA; 5]);
    let datagram = decode::<StokeSample>(&bytes).unwrap();
    assert_eq!(datagram.samples(), stokes_block(2).as_slice());
}

#[test]
fn test_block_too_large() {
    let samples = vec![AudioSample::new(0.0); usize::from(u16::MAX) + 1];
    assert!(matches!(
        encode_batch(0, 0, &samples),
        Err(PmError::BlockTooLarge(65536))
    ));
}
