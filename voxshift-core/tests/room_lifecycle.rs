//! Integration tests for room, transport, producer and consumer lifecycles

use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use voxshift_core::{
    ConsumerState, DtlsFingerprint, DtlsParameters, DtlsRole, DtlsState, MediaKind, MediaPacket,
    RtcpFeedback, RtpCapabilities, RtpCodecCapability, RtpCodecParameters,
    RtpEncodingParameters, RtpParameters, Room, RoomConfig, RoomNotification, TransportRole,
    VoxError, Worker, WorkerSettings,
};

fn opus_capability() -> RtpCodecCapability {
    RtpCodecCapability {
        kind: MediaKind::Audio,
        mime_type: "audio/opus".to_string(),
        preferred_payload_type: None,
        clock_rate: 48000,
        channels: Some(2),
        parameters: BTreeMap::new(),
        rtcp_feedback: vec![RtcpFeedback::new("nack"), RtcpFeedback::new("transport-cc")],
    }
}

fn opus_parameters() -> RtpParameters {
    RtpParameters {
        mid: Some("0".to_string()),
        codecs: vec![RtpCodecParameters {
            mime_type: "audio/opus".to_string(),
            payload_type: 100,
            clock_rate: 48000,
            channels: Some(2),
            parameters: BTreeMap::new(),
            rtcp_feedback: vec![RtcpFeedback::new("nack"), RtcpFeedback::new("transport-cc")],
        }],
        encodings: vec![RtpEncodingParameters {
            ssrc: Some(11111111),
            max_bitrate: None,
        }],
        rtcp: Default::default(),
    }
}

fn pcmu_only() -> RtpCapabilities {
    RtpCapabilities {
        codecs: vec![RtpCodecCapability {
            kind: MediaKind::Audio,
            mime_type: "audio/PCMU".to_string(),
            preferred_payload_type: Some(0),
            clock_rate: 8000,
            channels: Some(1),
            parameters: BTreeMap::new(),
            rtcp_feedback: vec![],
        }],
        header_extensions: vec![],
    }
}

fn client_dtls() -> DtlsParameters {
    DtlsParameters {
        role: DtlsRole::Client,
        fingerprints: vec![DtlsFingerprint {
            algorithm: "sha-256".to_string(),
            value: "01:23:45:67".to_string(),
        }],
    }
}

async fn test_room(config: RoomConfig) -> (Worker, Room) {
    let worker = Worker::spawn(WorkerSettings::default()).await.unwrap();
    let router = worker.create_router(&[opus_capability()]).unwrap();
    (worker, Room::new(router, config))
}

fn drain(rx: &mut mpsc::UnboundedReceiver<RoomNotification>) -> Vec<RoomNotification> {
    let mut out = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        out.push(notification);
    }
    out
}

/// Peer with a connected send transport producing one audio stream
async fn producing_peer(room: &Room, peer: &str) -> (String, String) {
    let transport = room
        .create_transport(peer, TransportRole::Producer)
        .await
        .unwrap();
    room.connect_transport(peer, &transport.id, client_dtls())
        .await
        .unwrap();
    let producer_id = room
        .produce(peer, &transport.id, MediaKind::Audio, opus_parameters())
        .unwrap();
    (transport.id, producer_id)
}

#[tokio::test]
async fn test_unknown_transport_is_not_found() {
    let (_worker, room) = test_room(RoomConfig::default()).await;
    let _rx = room.join("alice");

    for bogus in ["", "nope", "00000000-0000-0000-0000-000000000000"] {
        let connect = room.connect_transport("alice", bogus, client_dtls()).await;
        assert!(matches!(connect, Err(VoxError::NotFound { .. })));

        let produce = room.produce("alice", bogus, MediaKind::Audio, opus_parameters());
        assert!(matches!(produce, Err(VoxError::NotFound { .. })));

        let close = room.close_transport("alice", bogus);
        assert!(matches!(close, Err(VoxError::NotFound { .. })));
    }
}

#[tokio::test]
async fn test_foreign_transport_is_not_found() {
    let (_worker, room) = test_room(RoomConfig::default()).await;
    let _a = room.join("alice");
    let _b = room.join("bob");

    let transport = room
        .create_transport("alice", TransportRole::Producer)
        .await
        .unwrap();
    let result = room.produce("bob", &transport.id, MediaKind::Audio, opus_parameters());
    assert!(result.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_new_producer_broadcast_once_to_others() {
    let (_worker, room) = test_room(RoomConfig::default()).await;
    let mut alice = room.join("alice");
    let mut bob = room.join("bob");
    let mut carol = room.join("carol");

    let (_, producer_id) = producing_peer(&room, "alice").await;

    let expected = vec![RoomNotification::NewProducer {
        producer_id: producer_id.clone(),
    }];
    assert_eq!(drain(&mut bob), expected);
    assert_eq!(drain(&mut carol), expected);
    assert!(drain(&mut alice).is_empty());
    assert_eq!(room.producer_ids(), vec![producer_id]);
}

#[tokio::test]
async fn test_unsatisfiable_consume_creates_nothing() {
    let (_worker, room) = test_room(RoomConfig::default()).await;
    let _a = room.join("alice");
    let _b = room.join("bob");
    let (_, producer_id) = producing_peer(&room, "alice").await;

    let recv = room
        .create_transport("bob", TransportRole::Consumer)
        .await
        .unwrap();
    assert!(!room.can_consume(&producer_id, &pcmu_only()));

    let result = room.consume("bob", &recv.id, &producer_id, &pcmu_only());
    assert!(matches!(result, Err(VoxError::Unsatisfiable { .. })));
    assert_eq!(room.consumer_count(), 0);
}

#[tokio::test]
async fn test_consume_unknown_producer_is_not_found() {
    let (_worker, room) = test_room(RoomConfig::default()).await;
    let _b = room.join("bob");
    let recv = room
        .create_transport("bob", TransportRole::Consumer)
        .await
        .unwrap();
    let caps = room.rtp_capabilities().unwrap();

    let result = room.consume("bob", &recv.id, "missing", &caps);
    assert!(matches!(result, Err(VoxError::NotFound { kind: "producer", .. })));
}

#[tokio::test]
async fn test_consumer_paused_without_auto_resume() {
    let config = RoomConfig {
        auto_resume_consumers: false,
        ..Default::default()
    };
    let (_worker, room) = test_room(config).await;
    let _a = room.join("alice");
    let _b = room.join("bob");
    let (_, producer_id) = producing_peer(&room, "alice").await;
    let recv = room
        .create_transport("bob", TransportRole::Consumer)
        .await
        .unwrap();
    let caps = room.rtp_capabilities().unwrap();

    let consumer = room.consume("bob", &recv.id, &producer_id, &caps).unwrap();
    assert_eq!(consumer.state(), ConsumerState::Paused);
    assert!(!consumer.producer_paused());

    room.resume_consumer("bob", consumer.id()).unwrap();
    room.resume_consumer("bob", consumer.id()).unwrap();
    assert_eq!(consumer.state(), ConsumerState::Active);

    assert!(room.resume_consumer("bob", "missing").unwrap_err().is_not_found());
    assert!(room.resume_consumer("alice", consumer.id()).unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_close_producer_notifies_each_consumer_once() {
    let (_worker, room) = test_room(RoomConfig::default()).await;
    let mut alice = room.join("alice");
    let mut bob = room.join("bob");
    let mut carol = room.join("carol");
    let (_, producer_id) = producing_peer(&room, "alice").await;
    let caps = room.rtp_capabilities().unwrap();

    let bob_recv = room
        .create_transport("bob", TransportRole::Consumer)
        .await
        .unwrap();
    let carol_recv = room
        .create_transport("carol", TransportRole::Consumer)
        .await
        .unwrap();
    let bob_consumer = room.consume("bob", &bob_recv.id, &producer_id, &caps).unwrap();
    let carol_consumer = room
        .consume("carol", &carol_recv.id, &producer_id, &caps)
        .unwrap();
    drain(&mut alice);
    drain(&mut bob);
    drain(&mut carol);

    room.close_producer("alice", &producer_id).unwrap();

    assert_eq!(
        drain(&mut bob),
        vec![RoomNotification::ConsumerClosed {
            consumer_id: bob_consumer.id().to_string()
        }]
    );
    assert_eq!(
        drain(&mut carol),
        vec![RoomNotification::ConsumerClosed {
            consumer_id: carol_consumer.id().to_string()
        }]
    );
    assert!(drain(&mut alice).is_empty());
    assert!(bob_consumer.is_closed());
    assert_eq!(room.consumer_count(), 0);
    assert!(room.producer_ids().is_empty());
}

#[tokio::test]
async fn test_leave_cascades_to_remote_consumers() {
    let (_worker, room) = test_room(RoomConfig::default()).await;
    let _alice = room.join("alice");
    let mut bob = room.join("bob");
    let (send_id, producer_id) = producing_peer(&room, "alice").await;
    let caps = room.rtp_capabilities().unwrap();
    let recv = room
        .create_transport("bob", TransportRole::Consumer)
        .await
        .unwrap();
    let consumer = room.consume("bob", &recv.id, &producer_id, &caps).unwrap();
    drain(&mut bob);

    room.leave("alice");

    assert_eq!(
        drain(&mut bob),
        vec![RoomNotification::ConsumerClosed {
            consumer_id: consumer.id().to_string()
        }]
    );
    assert!(consumer.recv().await.is_none());
    assert!(!room.has_peer("alice"));
    assert_eq!(room.transport_count(), 1);
    assert!(room
        .connect_transport("alice", &send_id, client_dtls())
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_close_transport_cascades() {
    let (_worker, room) = test_room(RoomConfig::default()).await;
    let _alice = room.join("alice");
    let mut bob = room.join("bob");
    let (send_id, producer_id) = producing_peer(&room, "alice").await;
    let caps = room.rtp_capabilities().unwrap();
    let recv = room
        .create_transport("bob", TransportRole::Consumer)
        .await
        .unwrap();
    let consumer = room.consume("bob", &recv.id, &producer_id, &caps).unwrap();
    drain(&mut bob);

    room.close_transport("alice", &send_id).unwrap();
    assert!(room.producer(&producer_id).is_none());
    assert_eq!(drain(&mut bob).len(), 1);
    assert!(consumer.is_closed());

    assert!(room.close_transport("alice", &send_id).is_err());
}

#[tokio::test]
async fn test_second_transport_of_a_role_replaces_the_first() {
    let (_worker, room) = test_room(RoomConfig::default()).await;
    let _alice = room.join("alice");

    let first = room
        .create_transport("alice", TransportRole::Producer)
        .await
        .unwrap();
    let second = room
        .create_transport("alice", TransportRole::Producer)
        .await
        .unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(room.transport_count(), 1);
}

#[tokio::test]
async fn test_create_transport_requires_joined_peer() {
    let (_worker, room) = test_room(RoomConfig::default()).await;
    let result = room.create_transport("ghost", TransportRole::Consumer).await;
    assert!(result.unwrap_err().is_not_found());
    assert_eq!(room.transport_count(), 0);
}

#[tokio::test]
async fn test_media_flows_only_to_active_consumers() {
    let (_worker, room) = test_room(RoomConfig::default()).await;
    let _alice = room.join("alice");
    let _bob = room.join("bob");
    let (_, producer_id) = producing_peer(&room, "alice").await;
    let caps = room.rtp_capabilities().unwrap();
    let recv = room
        .create_transport("bob", TransportRole::Consumer)
        .await
        .unwrap();
    let consumer = room.consume("bob", &recv.id, &producer_id, &caps).unwrap();
    let producer = room.producer(&producer_id).unwrap();

    let packet = |seq: u16| MediaPacket {
        payload_type: 100,
        sequence_number: seq,
        timestamp: seq as u32 * 960,
        ssrc: 11111111,
        payload: Bytes::from(vec![seq as u8; 8]),
    };

    room.pause_consumer("bob", consumer.id()).unwrap();
    producer.send(packet(1)).unwrap();
    room.resume_consumer("bob", consumer.id()).unwrap();
    room.pause_producer("alice", &producer_id).unwrap();
    assert!(consumer.producer_paused());
    producer.send(packet(2)).unwrap();
    room.resume_producer("alice", &producer_id).unwrap();
    producer.send(packet(3)).unwrap();

    let received = consumer.recv().await.unwrap();
    assert_eq!(received.sequence_number, 3);
    assert_eq!(received.payload_type, consumer.rtp_parameters().codecs[0].payload_type);
    assert_eq!(Some(received.ssrc), consumer.rtp_parameters().primary_ssrc());
}

#[tokio::test]
async fn test_dead_engine_fails_every_operation() {
    let (worker, room) = test_room(RoomConfig::default()).await;
    let _alice = room.join("alice");
    let transport = room
        .create_transport("alice", TransportRole::Producer)
        .await
        .unwrap();

    worker.close();
    worker.died().await;

    assert!(matches!(
        room.rtp_capabilities(),
        Err(VoxError::EngineFatal { .. })
    ));
    assert!(matches!(
        room.create_transport("alice", TransportRole::Consumer).await,
        Err(VoxError::EngineFatal { .. })
    ));
    assert!(matches!(
        room.produce("alice", &transport.id, MediaKind::Audio, opus_parameters()),
        Err(VoxError::EngineFatal { .. })
    ));
}

#[tokio::test]
async fn test_transport_state_on_leave() {
    let (_worker, room) = test_room(RoomConfig::default()).await;
    let _alice = room.join("alice");
    let params = room
        .create_transport("alice", TransportRole::Producer)
        .await
        .unwrap();
    room.connect_transport("alice", &params.id, client_dtls())
        .await
        .unwrap();

    let second = room.connect_transport("alice", &params.id, client_dtls()).await;
    assert!(matches!(second, Err(VoxError::Rejected { .. })));

    room.leave("alice");
    assert_eq!(room.transport_count(), 0);
    assert_eq!(room.peer_count(), 0);
}

#[tokio::test]
async fn test_dtls_close_closes_transport_with_cascade() {
    let (worker, room) = test_room(RoomConfig::default()).await;
    let _alice = room.join("alice");
    let mut bob = room.join("bob");
    let (send_id, producer_id) = producing_peer(&room, "alice").await;
    let caps = room.rtp_capabilities().unwrap();
    let recv = room
        .create_transport("bob", TransportRole::Consumer)
        .await
        .unwrap();
    let consumer = room.consume("bob", &recv.id, &producer_id, &caps).unwrap();
    drain(&mut bob);

    worker.close_dtls(&send_id);

    let pushed = timeout(Duration::from_secs(2), bob.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        pushed,
        RoomNotification::ConsumerClosed {
            consumer_id: consumer.id().to_string()
        }
    );
    assert!(consumer.is_closed());
    assert!(room.producer(&producer_id).is_none());
    assert_eq!(room.transport_count(), 1);
    assert!(room.close_transport("alice", &send_id).unwrap_err().is_not_found());

    // bob's transport never saw a DTLS close and stays usable
    assert!(room.close_transport("bob", &recv.id).is_ok());
}

#[tokio::test]
async fn test_dtls_state_follows_connect_and_close() {
    let worker = Worker::spawn(WorkerSettings::default()).await.unwrap();
    let router = worker.create_router(&[opus_capability()]).unwrap();
    let transport = router
        .create_webrtc_transport(&Default::default())
        .await
        .unwrap();
    assert_eq!(transport.dtls_state(), DtlsState::New);

    transport.connect(client_dtls()).await.unwrap();
    assert_eq!(transport.dtls_state(), DtlsState::Connected);

    worker.close_dtls(transport.id());
    assert!(timeout(Duration::from_secs(2), transport.dtls_closed())
        .await
        .unwrap());
    assert_eq!(transport.dtls_state(), DtlsState::Closed);
}

#[tokio::test]
async fn test_released_transport_stops_dtls_watch() {
    let worker = Worker::spawn(WorkerSettings::default()).await.unwrap();
    let router = worker.create_router(&[opus_capability()]).unwrap();
    let transport = router
        .create_webrtc_transport(&Default::default())
        .await
        .unwrap();

    transport.close();
    let closed = timeout(Duration::from_secs(2), transport.dtls_closed())
        .await
        .unwrap();
    assert!(!closed);
}

#[tokio::test]
async fn test_consume_racing_producer_close_never_leaves_live_consumer() {
    let (_worker, room) = test_room(RoomConfig::default()).await;
    let _alice = room.join("alice");
    let _bob = room.join("bob");
    let caps = room.rtp_capabilities().unwrap();
    let recv = room
        .create_transport("bob", TransportRole::Consumer)
        .await
        .unwrap();
    let send = room
        .create_transport("alice", TransportRole::Producer)
        .await
        .unwrap();

    for _ in 0..50 {
        let producer_id = room
            .produce("alice", &send.id, MediaKind::Audio, opus_parameters())
            .unwrap();

        let consuming = {
            let room = room.clone();
            let (recv_id, producer_id, caps) = (recv.id.clone(), producer_id.clone(), caps.clone());
            std::thread::spawn(move || room.consume("bob", &recv_id, &producer_id, &caps))
        };
        let closing = {
            let room = room.clone();
            let producer_id = producer_id.clone();
            std::thread::spawn(move || room.close_producer("alice", &producer_id))
        };
        closing.join().unwrap().unwrap();

        match consuming.join().unwrap() {
            Ok(consumer) => assert_eq!(consumer.state(), ConsumerState::Closed),
            Err(VoxError::NotFound { kind, .. }) => assert_eq!(kind, "producer"),
            Err(other) => panic!("unexpected consume error: {}", other),
        }
        assert_eq!(room.consumer_count(), 0);
    }
}
