//! Media engine: a worker actor that owns RTC ports and transport handshakes,
//! and the router that holds the codec capability set

use crate::error::{VoxError, VoxResult};
use crate::negotiator;
use crate::producer::Producer;
use crate::rtp::{RtpCapabilities, RtpCodecCapability};
use crate::transport::{
    DtlsFingerprint, DtlsParameters, DtlsRole, DtlsState, IceCandidate, IceParameters,
    ListenIp, WebRtcTransport, WebRtcTransportOptions,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Priority advertised for host UDP candidates
const HOST_CANDIDATE_PRIORITY: u32 = 1_076_302_079;

/// Settings for the media worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerSettings {
    /// Lowest RTC port the worker may allocate
    pub rtc_min_port: u16,
    /// Highest RTC port the worker may allocate
    pub rtc_max_port: u16,
    /// Worker log level (`debug`, `warn`, `error`, `none`)
    pub log_level: String,
    /// Upper bound for a single worker request in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            rtc_min_port: 10000,
            rtc_max_port: 10100,
            log_level: "warn".to_string(),
            request_timeout_ms: 5000,
        }
    }
}

impl WorkerSettings {
    /// Request timeout as a `Duration`
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reject settings the worker cannot start with
    pub fn validate(&self) -> VoxResult<()> {
        if self.rtc_min_port == 0 {
            return Err(VoxError::EngineFatal {
                reason: "rtcMinPort must be greater than zero".to_string(),
            });
        }
        if self.rtc_min_port > self.rtc_max_port {
            return Err(VoxError::EngineFatal {
                reason: format!(
                    "rtcMinPort {} is above rtcMaxPort {}",
                    self.rtc_min_port, self.rtc_max_port
                ),
            });
        }
        if !matches!(self.log_level.as_str(), "debug" | "warn" | "error" | "none") {
            return Err(VoxError::EngineFatal {
                reason: format!("unknown worker log level {}", self.log_level),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(VoxError::EngineFatal {
                reason: "request timeout must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Network resources the worker handed out for a new transport
#[derive(Debug, Clone)]
pub(crate) struct TransportAllocation {
    pub id: String,
    pub port: u16,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
    pub dtls_state: watch::Receiver<DtlsState>,
}

enum WorkerRequest {
    CreateTransport {
        listen_ips: Vec<ListenIp>,
        reply: oneshot::Sender<VoxResult<TransportAllocation>>,
    },
    ConnectTransport {
        transport_id: String,
        dtls_parameters: DtlsParameters,
        reply: oneshot::Sender<VoxResult<()>>,
    },
    CloseDtls {
        transport_id: String,
    },
    CloseTransport {
        transport_id: String,
    },
    Shutdown,
}

struct WorkerTransport {
    port: u16,
    dtls_state: watch::Sender<DtlsState>,
}

/// State owned by the worker task
struct WorkerActor {
    free_ports: BTreeSet<u16>,
    transports: HashMap<String, WorkerTransport>,
}

impl WorkerActor {
    fn new(settings: &WorkerSettings) -> Self {
        Self {
            free_ports: (settings.rtc_min_port..=settings.rtc_max_port).collect(),
            transports: HashMap::new(),
        }
    }

    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<WorkerRequest>) {
        while let Some(request) = requests.recv().await {
            match request {
                WorkerRequest::CreateTransport { listen_ips, reply } => {
                    let _ = reply.send(self.create_transport(&listen_ips));
                }
                WorkerRequest::ConnectTransport {
                    transport_id,
                    dtls_parameters,
                    reply,
                } => {
                    let _ = reply.send(self.connect_transport(&transport_id, &dtls_parameters));
                }
                WorkerRequest::CloseDtls { transport_id } => {
                    self.close_dtls(&transport_id);
                }
                WorkerRequest::CloseTransport { transport_id } => {
                    if let Some(transport) = self.transports.remove(&transport_id) {
                        self.free_ports.insert(transport.port);
                        debug!(
                            "Worker released port {} of transport {}",
                            transport.port, transport_id
                        );
                    }
                }
                WorkerRequest::Shutdown => break,
            }
        }
    }

    fn create_transport(&mut self, listen_ips: &[ListenIp]) -> VoxResult<TransportAllocation> {
        if listen_ips.is_empty() {
            return Err(VoxError::rejected(
                "createTransport",
                "at least one listen ip is required",
            ));
        }

        let port = self
            .free_ports
            .pop_first()
            .ok_or_else(|| VoxError::ResourceExhausted {
                resource: "RTC ports".to_string(),
            })?;

        let id = Uuid::new_v4().to_string();
        let ice_candidates = listen_ips
            .iter()
            .map(|listen_ip| IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: HOST_CANDIDATE_PRIORITY,
                ip: listen_ip
                    .announced_ip
                    .clone()
                    .unwrap_or_else(|| listen_ip.ip.clone()),
                protocol: "udp".to_string(),
                port,
                kind: "host".to_string(),
            })
            .collect();

        let (dtls_tx, dtls_rx) = watch::channel(DtlsState::New);
        self.transports.insert(
            id.clone(),
            WorkerTransport {
                port,
                dtls_state: dtls_tx,
            },
        );

        Ok(TransportAllocation {
            id,
            port,
            ice_parameters: IceParameters {
                username_fragment: random_token(16),
                password: random_token(32),
                ice_lite: true,
            },
            ice_candidates,
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: random_fingerprint(),
                }],
            },
            dtls_state: dtls_rx,
        })
    }

    fn connect_transport(
        &mut self,
        transport_id: &str,
        remote: &DtlsParameters,
    ) -> VoxResult<()> {
        let transport = self
            .transports
            .get_mut(transport_id)
            .ok_or_else(|| VoxError::not_found("transport", transport_id))?;

        let current = *transport.dtls_state.borrow();
        if current != DtlsState::New {
            return Err(VoxError::rejected(
                "connect",
                format!("DTLS is already {}", current),
            ));
        }
        if remote.fingerprints.is_empty() {
            return Err(VoxError::rejected("connect", "no DTLS fingerprints given"));
        }
        if remote.role == DtlsRole::Auto {
            return Err(VoxError::rejected(
                "connect",
                "remote DTLS role must be client or server",
            ));
        }
        if let Some(bad) = remote
            .fingerprints
            .iter()
            .find(|fp| fp.algorithm.is_empty() || fp.value.is_empty())
        {
            return Err(VoxError::rejected(
                "connect",
                format!("malformed DTLS fingerprint {:?}", bad.algorithm),
            ));
        }

        transport.dtls_state.send_replace(DtlsState::Connected);
        Ok(())
    }

    fn close_dtls(&mut self, transport_id: &str) {
        let Some(transport) = self.transports.get(transport_id) else {
            debug!("DTLS close for unknown transport {}", transport_id);
            return;
        };
        let changed = transport.dtls_state.send_if_modified(|state| {
            if *state == DtlsState::Closed {
                false
            } else {
                *state = DtlsState::Closed;
                true
            }
        });
        if changed {
            info!("DTLS closed on transport {}", transport_id);
        }
    }
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

fn random_fingerprint() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

struct WorkerInner {
    id: String,
    settings: WorkerSettings,
    requests: mpsc::UnboundedSender<WorkerRequest>,
    died: watch::Receiver<Option<String>>,
}

/// Handle to a running media worker
///
/// Cloning is cheap; all clones talk to the same worker task. Once the worker
/// task ends (closed or crashed) the handle reports it as dead and every
/// request fails with `EngineFatal`.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.inner.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl Worker {
    /// Start a worker with the given settings
    ///
    /// Invalid settings fail with `EngineFatal`; callers must not serve
    /// signaling without a worker.
    pub async fn spawn(settings: WorkerSettings) -> VoxResult<Self> {
        settings.validate()?;

        let id = Uuid::new_v4().to_string();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (died_tx, died_rx) = watch::channel(None);
        let (ready_tx, ready_rx) = oneshot::channel();

        let actor = WorkerActor::new(&settings);
        let task = tokio::spawn(async move {
            let _ = ready_tx.send(());
            actor.run(request_rx).await;
        });

        let worker_id = id.clone();
        tokio::spawn(async move {
            let reason = match task.await {
                Ok(()) => "worker closed".to_string(),
                Err(e) if e.is_panic() => "worker panicked".to_string(),
                Err(e) => format!("worker aborted: {}", e),
            };
            error!("Media worker {} died: {}", worker_id, reason);
            died_tx.send_replace(Some(reason));
        });

        ready_rx.await.map_err(|_| VoxError::EngineFatal {
            reason: "worker failed to start".to_string(),
        })?;

        info!(
            "Media worker {} started (ports {}-{}, log level {})",
            id, settings.rtc_min_port, settings.rtc_max_port, settings.log_level
        );

        Ok(Self {
            inner: Arc::new(WorkerInner {
                id,
                settings,
                requests: request_tx,
                died: died_rx,
            }),
        })
    }

    /// Worker identifier
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Settings the worker was started with
    pub fn settings(&self) -> &WorkerSettings {
        &self.inner.settings
    }

    /// Whether the worker task is still running
    pub fn is_alive(&self) -> bool {
        self.inner.died.borrow().is_none()
    }

    /// Wait until the worker dies and return the reason
    pub async fn died(&self) -> String {
        let mut died = self.inner.died.clone();
        let result = died
            .wait_for(|reason| reason.is_some())
            .await
            .map(|reason| reason.clone().unwrap_or_default());
        result.unwrap_or_else(|_| "worker monitor gone".to_string())
    }

    /// Stop the worker; the engine is dead afterwards
    pub fn close(&self) {
        if self.inner.requests.send(WorkerRequest::Shutdown).is_err() {
            debug!("Worker {} already stopped", self.inner.id);
        }
    }

    /// Fail with `EngineFatal` once the worker is gone
    pub fn ensure_alive(&self) -> VoxResult<()> {
        match self.inner.died.borrow().as_ref() {
            None => Ok(()),
            Some(reason) => Err(VoxError::EngineFatal {
                reason: reason.clone(),
            }),
        }
    }

    /// Create a router carrying the capability set derived from `media_codecs`
    pub fn create_router(&self, media_codecs: &[RtpCodecCapability]) -> VoxResult<Router> {
        self.ensure_alive()?;
        let rtp_capabilities = negotiator::generate_router_rtp_capabilities(media_codecs)?;
        let router = Router {
            inner: Arc::new(RouterInner {
                id: Uuid::new_v4().to_string(),
                worker: self.clone(),
                rtp_capabilities,
            }),
        };
        info!(
            "Router {} created with {} codec(s)",
            router.id(),
            media_codecs.len()
        );
        Ok(router)
    }

    async fn request<T>(
        &self,
        operation: &'static str,
        build: impl FnOnce(oneshot::Sender<VoxResult<T>>) -> WorkerRequest,
    ) -> VoxResult<T> {
        self.ensure_alive()?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner
            .requests
            .send(build(reply_tx))
            .map_err(|_| VoxError::EngineFatal {
                reason: format!("worker gone during {}", operation),
            })?;

        let timeout = self.inner.settings.request_timeout();
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(VoxError::EngineFatal {
                reason: format!("worker dropped {} request", operation),
            }),
            Err(_) => Err(VoxError::Timeout {
                operation: operation.to_string(),
                duration: timeout,
            }),
        }
    }

    pub(crate) async fn allocate_transport(
        &self,
        listen_ips: Vec<ListenIp>,
    ) -> VoxResult<TransportAllocation> {
        self.request("createTransport", |reply| WorkerRequest::CreateTransport {
            listen_ips,
            reply,
        })
        .await
    }

    pub(crate) async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: DtlsParameters,
    ) -> VoxResult<()> {
        let transport_id = transport_id.to_string();
        self.request("connect", |reply| WorkerRequest::ConnectTransport {
            transport_id,
            dtls_parameters,
            reply,
        })
        .await
    }

    /// Tear down the DTLS association of `transport_id`
    ///
    /// Reports the same event as a close alert from the remote side; the
    /// transport's owner sees its DTLS state turn `closed`.
    pub fn close_dtls(&self, transport_id: &str) {
        let request = WorkerRequest::CloseDtls {
            transport_id: transport_id.to_string(),
        };
        if self.inner.requests.send(request).is_err() {
            warn!("Worker gone while closing DTLS of {}", transport_id);
        }
    }

    pub(crate) fn release_transport(&self, transport_id: &str) {
        let request = WorkerRequest::CloseTransport {
            transport_id: transport_id.to_string(),
        };
        if self.inner.requests.send(request).is_err() {
            warn!(
                "Worker gone while releasing transport {}",
                transport_id
            );
        }
    }
}

struct RouterInner {
    id: String,
    worker: Worker,
    rtp_capabilities: RtpCapabilities,
}

/// Media router: the single source of truth for codec capabilities
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("id", &self.inner.id).finish()
    }
}

impl Router {
    /// Router identifier
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Worker this router runs on
    pub fn worker(&self) -> &Worker {
        &self.inner.worker
    }

    /// Immutable capability set computed at creation
    pub fn rtp_capabilities(&self) -> &RtpCapabilities {
        &self.inner.rtp_capabilities
    }

    /// Whether a peer with `remote` capabilities can receive `producer`
    pub fn can_consume(&self, producer: &Producer, remote: &RtpCapabilities) -> bool {
        negotiator::can_consume(producer.rtp_parameters(), remote)
    }

    /// Allocate a new WebRTC transport on the worker
    pub async fn create_webrtc_transport(
        &self,
        options: &WebRtcTransportOptions,
    ) -> VoxResult<WebRtcTransport> {
        let allocation = self
            .inner
            .worker
            .allocate_transport(options.listen_ips.clone())
            .await?;
        let transport = WebRtcTransport::new(self.clone(), allocation, options);
        debug!("Router {} created transport {}", self.id(), transport.id());
        Ok(transport)
    }
}
