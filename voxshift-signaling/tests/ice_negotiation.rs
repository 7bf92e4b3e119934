//! Tests for the client-side ICE negotiation state machine

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use voxshift_core::{VoxError, VoxResult};
use voxshift_signaling::protocol::{PeerControl, SdpType};
use voxshift_signaling::{
    IceCandidateInit, IceNegotiator, IceState, PeerMessage, PeerSession, SessionDescription,
};

#[derive(Clone, Default)]
struct RecordingSession {
    log: Arc<Mutex<Vec<String>>>,
    fail_answer: bool,
}

impl RecordingSession {
    fn entries(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl PeerSession for RecordingSession {
    async fn create_offer(&mut self) -> VoxResult<String> {
        self.log.lock().push("create_offer".to_string());
        Ok("v=0 offer".to_string())
    }

    async fn create_answer(&mut self) -> VoxResult<String> {
        if self.fail_answer {
            return Err(VoxError::rejected("create_answer", "no media section"));
        }
        self.log.lock().push("create_answer".to_string());
        Ok("v=0 answer".to_string())
    }

    async fn set_remote_description(&mut self, description: &SessionDescription) -> VoxResult<()> {
        let kind = match description.kind {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        };
        self.log.lock().push(format!("remote:{}", kind));
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: &IceCandidateInit) -> VoxResult<()> {
        self.log.lock().push(format!("candidate:{}", candidate.candidate));
        Ok(())
    }
}

fn negotiator(
    session: &RecordingSession,
) -> (
    IceNegotiator<RecordingSession>,
    mpsc::UnboundedReceiver<PeerMessage>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = session.clone();
    (IceNegotiator::new(tx, Box::new(move || Ok(session.clone()))), rx)
}

fn candidate(n: u32) -> IceCandidateInit {
    IceCandidateInit {
        candidate: format!("candidate:{} 1 udp 2122260223 192.168.1.{} 5000{} typ host", n, n, n),
        sdp_mid: Some("0".to_string()),
        sdp_m_line_index: Some(0),
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<PeerMessage>) -> Vec<PeerMessage> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}

fn offer() -> PeerMessage {
    PeerMessage::Description(SessionDescription {
        kind: SdpType::Offer,
        sdp: "v=0 remote offer".to_string(),
    })
}

#[tokio::test]
async fn test_candidates_held_until_ready_then_flushed_in_order() {
    let session = RecordingSession::default();
    let (mut ice, mut rx) = negotiator(&session);

    ice.start_offer().await.unwrap();
    assert_eq!(ice.state(), IceState::AwaitingAnswer);
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [PeerMessage::Description(SessionDescription {
            kind: SdpType::Offer,
            ..
        })]
    ));

    for n in 1..=3 {
        ice.handle_local_candidate(Some(candidate(n))).unwrap();
    }
    assert!(drain(&mut rx).is_empty());
    assert_eq!(ice.queued_local_candidates(), 3);

    ice.handle_message(PeerMessage::request_ice_candidates())
        .await
        .unwrap();
    let flushed = drain(&mut rx);
    assert_eq!(
        flushed,
        (1..=3)
            .map(|n| PeerMessage::Candidate {
                candidate: candidate(n)
            })
            .collect::<Vec<_>>()
    );
    assert_eq!(ice.queued_local_candidates(), 0);

    ice.handle_local_candidate(Some(candidate(4))).unwrap();
    assert_eq!(
        drain(&mut rx),
        vec![PeerMessage::Candidate {
            candidate: candidate(4)
        }]
    );
}

#[tokio::test]
async fn test_end_of_candidates_never_sent() {
    let session = RecordingSession::default();
    let (mut ice, mut rx) = negotiator(&session);

    ice.handle_local_candidate(None).unwrap();
    ice.handle_message(PeerMessage::request_ice_candidates())
        .await
        .unwrap();
    ice.handle_local_candidate(None).unwrap();
    ice.handle_local_candidate(Some(IceCandidateInit {
        candidate: String::new(),
        sdp_mid: None,
        sdp_m_line_index: None,
    }))
    .unwrap();

    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_offer_is_answered_then_candidates_requested() {
    let session = RecordingSession::default();
    let (mut ice, mut rx) = negotiator(&session);

    ice.await_offer().unwrap();
    assert_eq!(ice.state(), IceState::AwaitingOffer);

    ice.handle_message(offer()).await.unwrap();
    assert_eq!(ice.state(), IceState::CandidateExchange);

    let sent = drain(&mut rx);
    assert_eq!(sent.len(), 2);
    assert!(matches!(
        &sent[0],
        PeerMessage::Description(SessionDescription {
            kind: SdpType::Answer,
            ..
        })
    ));
    assert_eq!(
        sent[1],
        PeerMessage::Control {
            kind: PeerControl::RequestIceCandidates
        }
    );
    assert_eq!(session.entries(), vec!["remote:offer", "create_answer"]);
}

#[tokio::test]
async fn test_remote_candidates_wait_for_description() {
    let session = RecordingSession::default();
    let (mut ice, _rx) = negotiator(&session);

    ice.handle_message(PeerMessage::Candidate {
        candidate: candidate(7),
    })
    .await
    .unwrap();
    assert_eq!(ice.queued_remote_candidates(), 1);
    assert!(session.entries().is_empty());

    ice.handle_message(offer()).await.unwrap();
    assert_eq!(ice.queued_remote_candidates(), 0);

    ice.handle_message(PeerMessage::Candidate {
        candidate: candidate(8),
    })
    .await
    .unwrap();

    let log = session.entries();
    assert_eq!(log[0], "remote:offer");
    assert_eq!(log[1], format!("candidate:{}", candidate(7).candidate));
    assert_eq!(log[2], "create_answer");
    assert_eq!(log[3], format!("candidate:{}", candidate(8).candidate));
}

#[tokio::test]
async fn test_renegotiation_reuses_session() {
    let session = RecordingSession::default();
    let (mut ice, mut rx) = negotiator(&session);

    ice.handle_message(offer()).await.unwrap();
    ice.set_connected();
    assert_eq!(ice.state(), IceState::Connected);
    drain(&mut rx);

    ice.handle_message(offer()).await.unwrap();
    assert_eq!(ice.sessions_created(), 1);
    assert_eq!(ice.state(), IceState::CandidateExchange);
    assert_eq!(drain(&mut rx).len(), 2);
}

#[tokio::test]
async fn test_unexpected_answer_rejected() {
    let session = RecordingSession::default();
    let (mut ice, _rx) = negotiator(&session);

    let err = ice
        .handle_message(PeerMessage::Description(SessionDescription {
            kind: SdpType::Answer,
            sdp: "v=0".to_string(),
        }))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_STATE");
    assert_eq!(ice.state(), IceState::Idle);
}

#[tokio::test]
async fn test_backend_failure_marks_failed() {
    let session = RecordingSession {
        fail_answer: true,
        ..Default::default()
    };
    let (mut ice, mut rx) = negotiator(&session);

    assert!(ice.handle_message(offer()).await.is_err());
    assert_eq!(ice.state(), IceState::Failed);
    assert!(drain(&mut rx).is_empty());

    // A failed negotiator can wait for a fresh offer
    ice.await_offer().unwrap();
}

#[tokio::test]
async fn test_two_peers_exchange_all_candidates() {
    let offerer_session = RecordingSession::default();
    let answerer_session = RecordingSession::default();
    let (mut offerer, mut offerer_out) = negotiator(&offerer_session);
    let (mut answerer, mut answerer_out) = negotiator(&answerer_session);

    answerer.await_offer().unwrap();
    offerer.start_offer().await.unwrap();
    offerer.handle_local_candidate(Some(candidate(1))).unwrap();
    offerer.handle_local_candidate(Some(candidate(2))).unwrap();

    // Offer reaches the answerer
    for message in drain(&mut offerer_out) {
        answerer.handle_message(message).await.unwrap();
    }
    answerer.handle_local_candidate(Some(candidate(3))).unwrap();

    // Answer and readiness reach the offerer, which flushes 1 and 2
    for message in drain(&mut answerer_out) {
        offerer.handle_message(message).await.unwrap();
    }
    assert_eq!(offerer.state(), IceState::CandidateExchange);

    // Candidates and readiness reach the answerer, which flushes 3
    for message in drain(&mut offerer_out) {
        answerer.handle_message(message).await.unwrap();
    }
    for message in drain(&mut answerer_out) {
        offerer.handle_message(message).await.unwrap();
    }

    let answerer_log = answerer_session.entries();
    assert_eq!(
        &answerer_log[2..],
        &[
            format!("candidate:{}", candidate(1).candidate),
            format!("candidate:{}", candidate(2).candidate),
        ]
    );
    let offerer_log = offerer_session.entries();
    assert_eq!(
        offerer_log.last().unwrap(),
        &format!("candidate:{}", candidate(3).candidate)
    );
    assert_eq!(offerer.queued_local_candidates(), 0);
    assert_eq!(answerer.queued_local_candidates(), 0);
}
