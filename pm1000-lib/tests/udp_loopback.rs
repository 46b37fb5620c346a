//! Sender to receiver over loopback UDP

mod common;

use common::*;
use pm1000_lib::config::ReceiverConfig;
use pm1000_lib::schedule::Schedule;
use pm1000_lib::snapshot::SnapshotPublisher;
use pm1000_lib::telemetry::{
    ChannelQueues, ChannelReceiver, PacketLoss, TelemetryReceiver, TelemetrySender, encode_batch, encode_legacy,
    receive_backoff,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(2);

async fn next_event(events: &mut ChannelQueues) -> TelemetryEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for telemetry")
        .expect("event channel closed")
}

async fn sender_to(target: SocketAddr) -> TelemetrySender {
    let mut sender = TelemetrySender::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap()
        .with_sample_rate(500);
    sender.add_target(target);
    sender
}

#[tokio::test]
async fn test_batches_arrive_in_order_with_sequence() {
    init_tracing();
    let (receiver, mut events) = TelemetryReceiver::start(&ReceiverConfig::ephemeral_loopback())
        .await
        .unwrap();
    let mut sender = sender_to(receiver.local_addr(Channel::Stokes).unwrap()).await;

    for expected in 0..3u32 {
        let report = sender.send_stokes(&stokes_block(4)).await.unwrap();
        assert_eq!(report.sequence, Some(expected));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 0);

        match next_event(&mut events).await {
            TelemetryEvent::Stokes(batch) => {
                assert_eq!(batch.channel, Channel::Stokes);
                assert_eq!(batch.sequence, expected);
                assert_eq!(batch.sample_rate_hz, Some(500));
                assert_eq!(batch.samples, stokes_block(4));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    receiver.shutdown().await;
}

#[tokio::test]
async fn test_sequence_advances_once_per_send_regardless_of_targets() {
    let mut sender = sender_to("127.0.0.1:9".parse().unwrap()).await;
    sender.add_target("127.0.0.1:10".parse().unwrap());
    sender.add_target("127.0.0.1:10".parse().unwrap());
    assert_eq!(sender.targets().len(), 2);

    let first = sender.send_audio(&[AudioSample::new(0.1)]).await.unwrap();
    let second = sender.send_audio(&[AudioSample::new(0.2)]).await.unwrap();
    assert_eq!(first.sequence, Some(0));
    assert_eq!(second.sequence, Some(1));
    assert_eq!(first.delivered + first.failed, 2);
    assert_eq!(sender.next_sequence(), 2);

    // Legacy datagrams do not consume sequence numbers
    let legacy = sender.send_legacy(AudioSample::new(0.3), 0).await;
    assert_eq!(legacy.sequence, None);
    assert_eq!(sender.next_sequence(), 2);
}

#[tokio::test]
async fn test_gap_raises_loss_before_batch() {
    let (receiver, mut events) = TelemetryReceiver::start(&ReceiverConfig::ephemeral_loopback())
        .await
        .unwrap();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = receiver.local_addr(Channel::RawAudio).unwrap();

    for sequence in [5u32, 6, 7, 9] {
        let bytes = encode_batch(sequence, 16_000, &[AudioSample::new(0.0); 2]).unwrap();
        socket.send_to(&bytes, target).await.unwrap();
    }

    let mut received = Vec::new();
    while received.len() < 5 {
        received.push(next_event(&mut events).await);
    }
    assert!(matches!(
        received[3],
        TelemetryEvent::PacketLoss {
            channel: Channel::RawAudio,
            loss: PacketLoss { expected: 8, got: 9 }
        }
    ));
    assert!(matches!(&received[4], TelemetryEvent::Audio(batch) if batch.sequence == 9));
    assert!(
        received
            .iter()
            .filter(|e| matches!(e, TelemetryEvent::PacketLoss { .. }))
            .count()
            == 1
    );

    receiver.shutdown().await;
}

#[tokio::test]
async fn test_malformed_datagram_does_not_stop_channel() {
    let (receiver, mut events) = TelemetryReceiver::start(&ReceiverConfig::ephemeral_loopback())
        .await
        .unwrap();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = receiver.local_addr(Channel::ProcessedAudio).unwrap();

    socket.send_to(&[1, 2, 3], target).await.unwrap();
    socket.send_to(&encode_legacy(AudioSample::new(0.75), 1), target).await.unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        TelemetryEvent::Malformed {
            channel: Channel::ProcessedAudio,
            length: 3
        }
    ));
    match next_event(&mut events).await {
        TelemetryEvent::Audio(batch) => {
            assert!(batch.legacy);
            assert_eq!(batch.sequence, 0);
            assert_eq!(batch.samples, vec![AudioSample::new(0.75)]);
        }
        other => panic!("unexpected event {other:?}"),
    }

    receiver.shutdown().await;
}

#[tokio::test]
async fn test_channel_stops_when_consumer_drops() {
    let (tx, rx) = mpsc::channel(1);
    let channel = ChannelReceiver::bind(Channel::Stokes, "127.0.0.1:0".parse().unwrap(), tx)
        .await
        .unwrap();
    let target = channel.local_addr();
    let handle = tokio::spawn(channel.run(CancellationToken::new()));

    drop(rx);
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket
        .send_to(&encode_legacy(stokes(1.0, 0.0, 0.0, 1.0, 1.0), 0), target)
        .await
        .unwrap();

    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_sender_loop_streams_snapshots() {
    let publisher = Arc::new(SnapshotPublisher::new());
    let (receiver, mut events) = TelemetryReceiver::start(&ReceiverConfig::ephemeral_loopback())
        .await
        .unwrap();
    let mut sender = sender_to(receiver.local_addr(Channel::Stokes).unwrap()).await;
    let token = CancellationToken::new();

    let sample = stokes(14.0, 0.0, 0.0, -1.0, 0.9);
    publisher.publish_stokes(sample);

    let handle = {
        let publisher = publisher.clone();
        let token = token.clone();
        tokio::spawn(async move {
            sender
                .run::<StokeSample>(&publisher, Schedule::FixedRate(Duration::from_millis(5)), 2, token)
                .await
        })
    };

    match next_event(&mut events).await {
        TelemetryEvent::Stokes(batch) => {
            assert_eq!(batch.sequence, 0);
            assert_eq!(batch.samples, vec![sample, sample]);
        }
        other => panic!("unexpected event {other:?}"),
    }

    token.cancel();
    let sent = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
    assert!(sent >= 1);
    receiver.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_with_pending_receive() {
    let (receiver, _events) = TelemetryReceiver::start(&ReceiverConfig::ephemeral_loopback())
        .await
        .unwrap();
    for channel in Channel::ALL {
        assert!(receiver.local_addr(channel).is_some());
    }
    tokio::time::timeout(WAIT, receiver.shutdown()).await.unwrap();
}

#[tokio::test]
async fn test_full_stokes_queue_does_not_hold_back_audio() {
    init_tracing();
    let config = ReceiverConfig {
        queue_capacity: 1,
        ..ReceiverConfig::ephemeral_loopback()
    };
    let (receiver, mut queues) = TelemetryReceiver::start(&config).await.unwrap();
    let mut stokes_queue = queues.take(Channel::Stokes).unwrap();
    let mut audio_queue = queues.take(Channel::RawAudio).unwrap();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // Nobody drains Stokes: one event fills its queue, the next blocks its loop
    let stokes_target = receiver.local_addr(Channel::Stokes).unwrap();
    for sequence in 0..3u32 {
        let bytes = encode_batch(sequence, 500, &stokes_block(2)).unwrap();
        socket.send_to(&bytes, stokes_target).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let bytes = encode_batch(0, 16_000, &[AudioSample::new(0.5)]).unwrap();
    socket
        .send_to(&bytes, receiver.local_addr(Channel::RawAudio).unwrap())
        .await
        .unwrap();

    let event = tokio::time::timeout(WAIT, audio_queue.recv())
        .await
        .expect("audio held back by the Stokes queue")
        .unwrap();
    assert!(matches!(event, TelemetryEvent::Audio(batch) if batch.channel == Channel::RawAudio));

    // The Stokes backlog is still delivered in order once drained
    for expected in 0..3u32 {
        match tokio::time::timeout(WAIT, stokes_queue.recv()).await.unwrap().unwrap() {
            TelemetryEvent::Stokes(batch) => assert_eq!(batch.sequence, expected),
            other => panic!("unexpected event {other:?}"),
        }
    }

    receiver.shutdown().await;
}

#[tokio::test]
async fn test_recv_ends_when_every_queue_is_taken() {
    let (receiver, mut queues) = TelemetryReceiver::start(&ReceiverConfig::ephemeral_loopback())
        .await
        .unwrap();
    for channel in Channel::ALL {
        assert!(queues.take(channel).is_some());
        assert!(queues.take(channel).is_none());
    }
    assert!(tokio::time::timeout(WAIT, queues.recv()).await.unwrap().is_none());
    receiver.shutdown().await;
}

#[tokio::test]
async fn test_failed_start_releases_bound_channels() {
    let free = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let stokes_port = free.local_addr().unwrap().port();
    drop(free);
    let blocker = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let config = ReceiverConfig {
        stokes_port,
        processed_audio_port: blocker.local_addr().unwrap().port(),
        ..ReceiverConfig::ephemeral_loopback()
    };
    assert!(TelemetryReceiver::start(&config).await.is_err());

    // The Stokes loop was already running; it must let go of its port
    let rebound = tokio::time::timeout(WAIT, async {
        loop {
            match UdpSocket::bind(("127.0.0.1", stokes_port)).await {
                Ok(socket) => break socket,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    })
    .await;
    assert!(rebound.is_ok(), "Stokes port still held after failed start");
}

#[test]
fn test_receive_backoff_grows_and_caps() {
    assert_eq!(receive_backoff(1), Duration::from_millis(10));
    assert_eq!(receive_backoff(2), Duration::from_millis(20));
    assert!(receive_backoff(3) > receive_backoff(2));
    assert_eq!(receive_backoff(50), Duration::from_secs(1));
    assert_eq!(receive_backoff(u32::MAX), Duration::from_secs(1));
    assert!(!receive_backoff(0).is_zero());
}
