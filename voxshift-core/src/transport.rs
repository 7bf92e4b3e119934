//! WebRTC transports and the per-room transport registry

use crate::consumer::Consumer;
use crate::engine::{Router, TransportAllocation};
use crate::error::{VoxError, VoxResult};
use crate::negotiator;
use crate::producer::Producer;
use crate::rtp::{MediaKind, RtpCapabilities, RtpParameters};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Local address a transport listens on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenIp {
    /// Address to bind
    pub ip: String,
    /// Public address advertised in ICE candidates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announced_ip: Option<String>,
}

/// STUN/TURN server a client should use for its peer connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs, e.g. `turn:turn.example.org:3478`
    pub urls: Vec<String>,
    /// TURN username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Options for creating a WebRTC transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebRtcTransportOptions {
    /// Listen addresses, one host candidate each
    pub listen_ips: Vec<ListenIp>,
    /// Initial outgoing bitrate estimate in bps
    pub initial_available_outgoing_bitrate: u32,
    /// Incoming bitrate ceiling in bps
    pub max_incoming_bitrate: Option<u32>,
}

impl Default for WebRtcTransportOptions {
    fn default() -> Self {
        Self {
            listen_ips: vec![ListenIp {
                ip: "127.0.0.1".to_string(),
                announced_ip: None,
            }],
            initial_available_outgoing_bitrate: 1_000_000,
            max_incoming_bitrate: None,
        }
    }
}

/// ICE credentials of a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    /// ICE username fragment
    pub username_fragment: String,
    /// ICE password
    pub password: String,
    /// Whether the server side is ICE-lite
    #[serde(default)]
    pub ice_lite: bool,
}

/// ICE candidate advertised by a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate foundation
    pub foundation: String,
    /// Candidate priority
    pub priority: u32,
    /// Candidate address
    pub ip: String,
    /// Transport protocol
    pub protocol: String,
    /// Candidate port
    pub port: u16,
    /// Candidate type
    #[serde(rename = "type")]
    pub kind: String,
}

/// DTLS role of one side of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    /// Decided during the handshake
    Auto,
    /// DTLS client
    Client,
    /// DTLS server
    Server,
}

/// Certificate fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    /// Hash algorithm, e.g. `sha-256`
    pub algorithm: String,
    /// Hex fingerprint value
    pub value: String,
}

/// DTLS parameters of one side of a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsParameters {
    /// DTLS role
    #[serde(default = "default_dtls_role")]
    pub role: DtlsRole,
    /// Certificate fingerprints
    pub fingerprints: Vec<DtlsFingerprint>,
}

fn default_dtls_role() -> DtlsRole {
    DtlsRole::Auto
}

/// Everything the remote side needs to connect a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParameters {
    /// Transport identifier
    pub id: String,
    /// ICE credentials
    pub ice_parameters: IceParameters,
    /// Host candidates
    pub ice_candidates: Vec<IceCandidate>,
    /// Local DTLS parameters
    pub dtls_parameters: DtlsParameters,
}

/// Transport connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    /// Created, waiting for connect
    New,
    /// DTLS handshake in progress
    Connecting,
    /// DTLS established
    Connected,
    /// Owning peer went away
    Disconnected,
    /// Closed, terminal
    Closed,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// DTLS association state reported by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsState {
    /// No handshake yet
    New,
    /// Association established
    Connected,
    /// Closed by either side
    Closed,
}

impl std::fmt::Display for DtlsState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DtlsState::New => "new",
            DtlsState::Connected => "connected",
            DtlsState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Which direction a peer created a transport for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportRole {
    /// Carries the peer's outbound media
    Producer,
    /// Carries media towards the peer
    Consumer,
}

struct TransportInner {
    router: Router,
    port: u16,
    parameters: TransportParameters,
    initial_available_outgoing_bitrate: u32,
    max_incoming_bitrate: Option<u32>,
    state: Mutex<TransportState>,
    dtls_state: watch::Receiver<DtlsState>,
}

/// One ICE+DTLS media path
#[derive(Clone)]
pub struct WebRtcTransport {
    inner: Arc<TransportInner>,
}

impl std::fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcTransport")
            .field("id", &self.inner.parameters.id)
            .field("state", &self.state())
            .finish()
    }
}

impl WebRtcTransport {
    pub(crate) fn new(
        router: Router,
        allocation: TransportAllocation,
        options: &WebRtcTransportOptions,
    ) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                router,
                port: allocation.port,
                parameters: TransportParameters {
                    id: allocation.id,
                    ice_parameters: allocation.ice_parameters,
                    ice_candidates: allocation.ice_candidates,
                    dtls_parameters: allocation.dtls_parameters,
                },
                initial_available_outgoing_bitrate: options.initial_available_outgoing_bitrate,
                max_incoming_bitrate: options.max_incoming_bitrate,
                state: Mutex::new(TransportState::New),
                dtls_state: allocation.dtls_state,
            }),
        }
    }

    /// Transport identifier
    pub fn id(&self) -> &str {
        &self.inner.parameters.id
    }

    /// RTC port allocated on the worker
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// Parameters handed to the remote side
    pub fn parameters(&self) -> &TransportParameters {
        &self.inner.parameters
    }

    /// Initial outgoing bitrate estimate in bps
    pub fn initial_available_outgoing_bitrate(&self) -> u32 {
        self.inner.initial_available_outgoing_bitrate
    }

    /// Incoming bitrate ceiling in bps
    pub fn max_incoming_bitrate(&self) -> Option<u32> {
        self.inner.max_incoming_bitrate
    }

    /// Current connection state
    pub fn state(&self) -> TransportState {
        *self.inner.state.lock()
    }

    /// Whether the transport has been closed
    pub fn is_closed(&self) -> bool {
        self.state() == TransportState::Closed
    }

    /// Last DTLS state reported by the worker
    pub fn dtls_state(&self) -> DtlsState {
        *self.inner.dtls_state.borrow()
    }

    /// Wait until DTLS closes
    ///
    /// Returns `false` if the worker stops reporting first, which happens
    /// once the transport is released or the worker dies.
    pub async fn dtls_closed(&self) -> bool {
        let mut dtls_state = self.inner.dtls_state.clone();
        let ended = dtls_state
            .wait_for(|state| *state == DtlsState::Closed)
            .await
            .is_ok();
        ended
    }

    /// Complete DTLS setup with the remote side's parameters
    ///
    /// Only a `new` transport can connect; any later call is `Rejected`.
    pub async fn connect(&self, remote: DtlsParameters) -> VoxResult<()> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                TransportState::New => *state = TransportState::Connecting,
                TransportState::Closed => {
                    return Err(VoxError::not_found("transport", self.id()));
                }
                other => {
                    return Err(VoxError::rejected(
                        "connect",
                        format!("transport is {}", other),
                    ));
                }
            }
        }

        let result = self
            .inner
            .router
            .worker()
            .connect_transport(self.id(), remote)
            .await;

        let mut state = self.inner.state.lock();
        match result {
            Ok(()) => {
                if *state == TransportState::Connecting {
                    *state = TransportState::Connected;
                    info!("Transport {} connected", self.id());
                }
                Ok(())
            }
            Err(e) => {
                if *state == TransportState::Connecting {
                    *state = TransportState::New;
                }
                warn!("Transport {} connect failed: {}", self.id(), e);
                Err(e)
            }
        }
    }

    /// Mark the transport as having lost its owner
    pub fn mark_disconnected(&self) {
        let mut state = self.inner.state.lock();
        if *state != TransportState::Closed {
            *state = TransportState::Disconnected;
        }
    }

    /// Close the transport and release its port; further calls are no-ops
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == TransportState::Closed {
                return;
            }
            *state = TransportState::Closed;
        }
        self.inner.router.worker().release_transport(self.id());
        debug!("Transport {} closed", self.id());
    }

    /// Start receiving a media stream from the remote side
    pub fn produce(&self, kind: MediaKind, rtp_parameters: RtpParameters) -> VoxResult<Producer> {
        if self.is_closed() {
            return Err(VoxError::not_found("transport", self.id()));
        }
        negotiator::validate_producer_parameters(
            kind,
            &rtp_parameters,
            self.inner.router.rtp_capabilities(),
        )?;

        Ok(Producer::new(
            Uuid::new_v4().to_string(),
            kind,
            rtp_parameters,
            self.id().to_string(),
        ))
    }

    /// Start sending `producer`'s stream to the remote side
    ///
    /// The consumer starts paused.
    pub fn consume(&self, producer: &Producer, remote: &RtpCapabilities) -> VoxResult<Consumer> {
        if self.is_closed() {
            return Err(VoxError::not_found("transport", self.id()));
        }
        if !self.inner.router.can_consume(producer, remote) {
            return Err(VoxError::Unsatisfiable {
                producer_id: producer.id().to_string(),
            });
        }

        let ssrc: u32 = rand::random();
        let rtp_parameters =
            negotiator::consumer_rtp_parameters(producer.id(), producer.rtp_parameters(), remote, ssrc)?;

        Ok(Consumer::new(
            Uuid::new_v4().to_string(),
            producer.clone(),
            self.id().to_string(),
            rtp_parameters,
        ))
    }
}

/// A registered transport and the peer that owns it
#[derive(Debug, Clone)]
pub struct TransportEntry {
    /// Transport handle
    pub transport: WebRtcTransport,
    /// Owning peer
    pub owner: String,
    /// Direction the peer created it for
    pub role: TransportRole,
}

/// Transports keyed by identifier
#[derive(Debug, Default)]
pub struct TransportRegistry {
    transports: HashMap<String, TransportEntry>,
}

impl TransportRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport under its identifier
    pub fn register(&mut self, transport: WebRtcTransport, owner: &str, role: TransportRole) {
        self.transports.insert(
            transport.id().to_string(),
            TransportEntry {
                transport,
                owner: owner.to_string(),
                role,
            },
        );
    }

    /// Look up a transport by id
    pub fn get(&self, transport_id: &str) -> Option<&TransportEntry> {
        self.transports.get(transport_id)
    }

    /// Look up a transport by id, only if `owner` created it
    pub fn get_owned(&self, transport_id: &str, owner: &str) -> VoxResult<&TransportEntry> {
        self.transports
            .get(transport_id)
            .filter(|entry| entry.owner == owner)
            .ok_or_else(|| VoxError::not_found("transport", transport_id))
    }

    /// Remove a transport, returning its entry
    pub fn remove(&mut self, transport_id: &str) -> Option<TransportEntry> {
        self.transports.remove(transport_id)
    }

    /// Ids of every transport owned by `owner`
    pub fn owned_by(&self, owner: &str) -> Vec<String> {
        self.transports
            .values()
            .filter(|entry| entry.owner == owner)
            .map(|entry| entry.transport.id().to_string())
            .collect()
    }

    /// Id of `owner`'s transport for `role`, if any
    pub fn find_role(&self, owner: &str, role: TransportRole) -> Option<String> {
        self.transports
            .values()
            .find(|entry| entry.owner == owner && entry.role == role)
            .map(|entry| entry.transport.id().to_string())
    }

    /// Number of registered transports
    pub fn len(&self) -> usize {
        self.transports.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}
