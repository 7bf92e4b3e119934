//! Client-side ICE negotiation
//!
//! [`IceNegotiator`] drives one peer connection through offer/answer and the
//! candidate exchange. Local candidates are held back until the remote side
//! sends `request_ice_candidates`, then flushed in generation order; later
//! candidates go out immediately. Remote candidates that arrive before the
//! remote description are queued the same way on the receiving side.

use crate::protocol::{IceCandidateInit, PeerControl, PeerMessage, SdpType, SessionDescription};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use voxshift_core::{VoxError, VoxResult};

/// The peer connection object the negotiator drives
#[async_trait]
pub trait PeerSession: Send {
    /// Create an offer and apply it as the local description
    async fn create_offer(&mut self) -> VoxResult<String>;

    /// Create an answer and apply it as the local description
    async fn create_answer(&mut self) -> VoxResult<String>;

    /// Apply the remote offer or answer
    async fn set_remote_description(&mut self, description: &SessionDescription) -> VoxResult<()>;

    /// Add one remote candidate
    async fn add_ice_candidate(&mut self, candidate: &IceCandidateInit) -> VoxResult<()>;
}

/// Creates the peer connection on first use
pub type SessionFactory<S> = Box<dyn FnMut() -> VoxResult<S> + Send>;

/// Negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IceState {
    /// Nothing started
    Idle,
    /// Waiting for the remote offer
    AwaitingOffer,
    /// Offer sent, waiting for the answer
    AwaitingAnswer,
    /// Descriptions exchanged, trading candidates
    CandidateExchange,
    /// Media path established
    Connected,
    /// Negotiation failed
    Failed,
}

impl std::fmt::Display for IceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IceState::Idle => "idle",
            IceState::AwaitingOffer => "awaiting-offer",
            IceState::AwaitingAnswer => "awaiting-answer",
            IceState::CandidateExchange => "candidate-exchange",
            IceState::Connected => "connected",
            IceState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Offer/answer and candidate exchange for one peer connection
pub struct IceNegotiator<S: PeerSession> {
    state: IceState,
    session: Option<S>,
    factory: SessionFactory<S>,
    sessions_created: usize,
    outbound: mpsc::UnboundedSender<PeerMessage>,
    local_queue: VecDeque<IceCandidateInit>,
    remote_ready: bool,
    remote_queue: VecDeque<IceCandidateInit>,
    remote_description_set: bool,
}

impl<S: PeerSession> std::fmt::Debug for IceNegotiator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IceNegotiator")
            .field("state", &self.state)
            .field("queued_local", &self.local_queue.len())
            .field("queued_remote", &self.remote_queue.len())
            .field("remote_ready", &self.remote_ready)
            .finish()
    }
}

impl<S: PeerSession> IceNegotiator<S> {
    /// Negotiator sending its messages to `outbound`
    pub fn new(outbound: mpsc::UnboundedSender<PeerMessage>, factory: SessionFactory<S>) -> Self {
        Self {
            state: IceState::Idle,
            session: None,
            factory,
            sessions_created: 0,
            outbound,
            local_queue: VecDeque::new(),
            remote_ready: false,
            remote_queue: VecDeque::new(),
            remote_description_set: false,
        }
    }

    /// Current state
    pub fn state(&self) -> IceState {
        self.state
    }

    /// The peer connection, once created
    pub fn session(&self) -> Option<&S> {
        self.session.as_ref()
    }

    /// Number of peer connections created so far
    pub fn sessions_created(&self) -> usize {
        self.sessions_created
    }

    /// Local candidates waiting for the remote readiness signal
    pub fn queued_local_candidates(&self) -> usize {
        self.local_queue.len()
    }

    /// Remote candidates waiting for the remote description
    pub fn queued_remote_candidates(&self) -> usize {
        self.remote_queue.len()
    }

    /// Whether local candidates are sent as soon as they are gathered
    pub fn is_remote_ready(&self) -> bool {
        self.remote_ready
    }

    /// Wait for the remote side to make an offer
    pub fn await_offer(&mut self) -> VoxResult<()> {
        match self.state {
            IceState::Idle | IceState::Failed => {
                self.state = IceState::AwaitingOffer;
                Ok(())
            }
            other => Err(invalid_state("idle", other)),
        }
    }

    /// Make an offer to the remote side
    pub async fn start_offer(&mut self) -> VoxResult<()> {
        self.begin_attempt();
        let sdp = match self.session_mut()?.create_offer().await {
            Ok(sdp) => sdp,
            Err(e) => return Err(self.fail(e)),
        };
        self.send(PeerMessage::Description(SessionDescription {
            kind: SdpType::Offer,
            sdp,
        }))?;
        self.state = IceState::AwaitingAnswer;
        debug!("Offer sent");
        Ok(())
    }

    /// A candidate gathered locally; `None` is the end-of-candidates marker
    pub fn handle_local_candidate(&mut self, candidate: Option<IceCandidateInit>) -> VoxResult<()> {
        let candidate = match candidate {
            Some(c) if !c.is_end_of_candidates() => c,
            _ => {
                debug!("Local candidate gathering complete");
                return Ok(());
            }
        };

        if self.remote_ready {
            self.send(PeerMessage::Candidate { candidate })
        } else {
            self.local_queue.push_back(candidate);
            Ok(())
        }
    }

    /// Apply one message from the remote side
    pub async fn handle_message(&mut self, message: PeerMessage) -> VoxResult<()> {
        match message {
            PeerMessage::Description(description) => match description.kind {
                SdpType::Offer => self.handle_offer(description).await,
                SdpType::Answer => self.handle_answer(description).await,
            },
            PeerMessage::Candidate { candidate } => self.handle_remote_candidate(candidate).await,
            PeerMessage::Control {
                kind: PeerControl::RequestIceCandidates,
            } => self.flush_local_candidates(),
        }
    }

    /// The backend reports the media path as established
    pub fn set_connected(&mut self) {
        if self.state != IceState::Connected {
            info!("ICE connected");
        }
        self.state = IceState::Connected;
    }

    /// The backend reports the connection as failed
    pub fn set_failed(&mut self, reason: &str) {
        warn!("ICE failed: {}", reason);
        self.state = IceState::Failed;
    }

    async fn handle_offer(&mut self, offer: SessionDescription) -> VoxResult<()> {
        if self.state == IceState::Connected {
            info!("Renegotiation offer received, reusing the peer connection");
        }
        self.begin_attempt();

        if let Err(e) = self.apply_remote_description(&offer).await {
            return Err(self.fail(e));
        }
        let sdp = match self.session_mut()?.create_answer().await {
            Ok(sdp) => sdp,
            Err(e) => return Err(self.fail(e)),
        };

        self.send(PeerMessage::Description(SessionDescription {
            kind: SdpType::Answer,
            sdp,
        }))?;
        self.send(PeerMessage::request_ice_candidates())?;
        self.state = IceState::CandidateExchange;
        Ok(())
    }

    async fn handle_answer(&mut self, answer: SessionDescription) -> VoxResult<()> {
        if self.state != IceState::AwaitingAnswer {
            warn!("Ignoring answer received in state {}", self.state);
            return Err(invalid_state("awaiting-answer", self.state));
        }

        if let Err(e) = self.apply_remote_description(&answer).await {
            return Err(self.fail(e));
        }
        self.send(PeerMessage::request_ice_candidates())?;
        self.state = IceState::CandidateExchange;
        Ok(())
    }

    async fn handle_remote_candidate(&mut self, candidate: IceCandidateInit) -> VoxResult<()> {
        if candidate.is_end_of_candidates() {
            debug!("Remote candidate gathering complete");
            return Ok(());
        }

        match self.session.as_mut() {
            Some(session) if self.remote_description_set => {
                session.add_ice_candidate(&candidate).await
            }
            _ => {
                self.remote_queue.push_back(candidate);
                Ok(())
            }
        }
    }

    async fn apply_remote_description(&mut self, description: &SessionDescription) -> VoxResult<()> {
        self.ensure_session()?;
        if let Some(session) = self.session.as_mut() {
            session.set_remote_description(description).await?;
            while let Some(candidate) = self.remote_queue.pop_front() {
                session.add_ice_candidate(&candidate).await?;
            }
        }
        self.remote_description_set = true;
        Ok(())
    }

    fn flush_local_candidates(&mut self) -> VoxResult<()> {
        self.remote_ready = true;
        debug!("Flushing {} queued candidate(s)", self.local_queue.len());
        while let Some(candidate) = self.local_queue.pop_front() {
            self.send(PeerMessage::Candidate { candidate })?;
        }
        Ok(())
    }

    fn begin_attempt(&mut self) {
        self.remote_ready = false;
        self.remote_description_set = false;
    }

    fn ensure_session(&mut self) -> VoxResult<()> {
        if self.session.is_none() {
            let session = (self.factory)().map_err(|e| self.fail(e))?;
            self.sessions_created += 1;
            self.session = Some(session);
        }
        Ok(())
    }

    fn session_mut(&mut self) -> VoxResult<&mut S> {
        self.ensure_session()?;
        self.session.as_mut().ok_or_else(|| VoxError::InvalidState {
            expected: "peer session".to_string(),
            actual: "none".to_string(),
        })
    }

    fn send(&self, message: PeerMessage) -> VoxResult<()> {
        self.outbound
            .send(message)
            .map_err(|_| VoxError::ConnectionClosed)
    }

    fn fail(&mut self, error: VoxError) -> VoxError {
        warn!("ICE negotiation failed: {}", error);
        self.state = IceState::Failed;
        error
    }
}

fn invalid_state(expected: &str, actual: IceState) -> VoxError {
    VoxError::InvalidState {
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}
