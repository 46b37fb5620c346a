//! Per-channel sequence continuity and loss reporting

mod common;

use common::*;
use pm1000_lib::telemetry::{ChannelDecoder, ChannelStats, PacketLoss, SequenceTracker, encode_batch, encode_legacy};

fn losses(sequence: &[u32]) -> Vec<PacketLoss> {
    let mut tracker = SequenceTracker::new();
    sequence.iter().filter_map(|s| tracker.observe(*s)).collect()
}

#[test]
fn test_contiguous_sequence_has_no_loss() {
    assert!(losses(&[5, 6, 7]).is_empty());
}

#[test]
fn test_gap_reports_exactly_one_loss() {
    assert_eq!(losses(&[5, 6, 7, 9, 10]), vec![PacketLoss { expected: 8, got: 9 }]);
    assert_eq!(PacketLoss { expected: 8, got: 9 }.missing(), Some(1));
}

#[test]
fn test_first_sequence_is_never_a_loss() {
    assert!(losses(&[1_000_000]).is_empty());
    assert!(losses(&[0]).is_empty());
}

#[test]
fn test_wraparound_is_continuous() {
    assert!(losses(&[u32::MAX - 1, u32::MAX, 0, 1]).is_empty());
    assert_eq!(losses(&[u32::MAX, 1]), vec![PacketLoss { expected: 0, got: 1 }]);
}

#[test]
fn test_reorder_reports_and_resyncs() {
    // A late datagram is reported, and tracking continues from it
    let found = losses(&[10, 12, 11, 12]);
    assert_eq!(
        found,
        vec![
            PacketLoss { expected: 11, got: 12 },
            PacketLoss { expected: 13, got: 11 },
        ]
    );
    assert_eq!(found[1].missing(), None);
}

#[test]
fn test_legacy_counter_never_reports_loss() {
    let mut decoder = ChannelDecoder::new(Channel::RawAudio);
    for expected in 0..5u32 {
        let events = decoder.handle(&encode_legacy(AudioSample::new(0.25), 99)).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            TelemetryEvent::Audio(batch) => {
                assert!(batch.legacy);
                assert_eq!(batch.sequence, expected);
                assert_eq!(batch.channel, Channel::RawAudio);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(decoder.tracker().last(), None);
}

#[test]
fn test_decoder_emits_loss_before_batch() {
    let mut decoder = ChannelDecoder::new(Channel::Stokes);
    let mut stats = ChannelStats::default();

    for sequence in [5u32, 6, 7, 9, 10] {
        let bytes = encode_batch(sequence, 500, &stokes_block(2)).unwrap();
        for event in decoder.handle(&bytes).unwrap() {
            stats.record(&event);
        }
    }

    let bytes = encode_batch(12, 500, &stokes_block(1)).unwrap();
    let events = decoder.handle(&bytes).unwrap();
    assert!(matches!(
        events[0],
        TelemetryEvent::PacketLoss {
            channel: Channel::Stokes,
            loss: PacketLoss { expected: 11, got: 12 }
        }
    ));
    assert!(matches!(&events[1], TelemetryEvent::Stokes(batch) if batch.sequence == 12));

    assert_eq!(stats.datagrams, 5);
    assert_eq!(stats.samples, 10);
    assert_eq!(stats.losses, 1);
    assert_eq!(stats.missing, 1);
    assert_eq!(stats.last_sequence, Some(10));
}

#[test]
fn test_audio_channels_decode_audio() {
    let mut decoder = ChannelDecoder::new(Channel::ProcessedAudio);
    let bytes = encode_batch(0, 16_000, &[AudioSample::new(0.5); 3]).unwrap();
    let events = decoder.handle(&bytes).unwrap();
    match &events[..] {
        [TelemetryEvent::Audio(batch)] => {
            assert_eq!(batch.samples.len(), 3);
            assert_eq!(batch.sample_rate_hz, Some(16_000));
        }
        other => panic!("unexpected events {other:?}"),
    }

    // A Stokes-sized legacy datagram is not legacy on an audio channel
    let stokes_legacy = encode_legacy(stokes(1.0, 0.0, 0.1, 1.0, 1.0), 0);
    assert!(decoder.handle(&stokes_legacy).is_err());
}
