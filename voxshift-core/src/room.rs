//! Room: peers, transports, producers and consumers behind one lock
//!
//! Every identifier is owned by the peer that created it; ids belonging to
//! another peer are treated as unknown. The registry lock is never held
//! across a worker request, so a peer that leaves while its request is in
//! flight never ends up with resources registered under its name.

use crate::consumer::{Consumer, ConsumerCloseReason};
use crate::engine::Router;
use crate::error::{VoxError, VoxResult};
use crate::producer::Producer;
use crate::rtp::{MediaKind, RtpCapabilities, RtpParameters};
use crate::transport::{
    DtlsParameters, TransportParameters, TransportRegistry, TransportRole, WebRtcTransport,
    WebRtcTransportOptions,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Room policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomConfig {
    /// Resume new consumers right after creating them
    pub auto_resume_consumers: bool,
    /// Options for every transport created in the room
    pub transport_options: WebRtcTransportOptions,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            auto_resume_consumers: true,
            transport_options: WebRtcTransportOptions::default(),
        }
    }
}

/// Push sent from the room to a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomNotification {
    /// Another peer started producing
    NewProducer {
        /// New producer
        producer_id: String,
    },
    /// One of the peer's consumers closed because its producer went away
    ConsumerClosed {
        /// Closed consumer
        consumer_id: String,
    },
}

struct PeerEntry {
    notifier: mpsc::UnboundedSender<RoomNotification>,
}

struct ProducerEntry {
    producer: Producer,
    owner: String,
}

struct ConsumerEntry {
    consumer: Consumer,
    owner: String,
}

#[derive(Default)]
struct RoomState {
    peers: HashMap<String, PeerEntry>,
    transports: TransportRegistry,
    producers: HashMap<String, ProducerEntry>,
    consumers: HashMap<String, ConsumerEntry>,
}

impl RoomState {
    fn notify(&self, peer_id: &str, notification: RoomNotification) {
        if let Some(peer) = self.peers.get(peer_id) {
            if peer.notifier.send(notification).is_err() {
                debug!("Peer {} no longer listens for notifications", peer_id);
            }
        }
    }

    /// Close a producer and every consumer bound to it, telling each
    /// consumer's owner exactly once
    fn close_producer(&mut self, producer_id: &str) -> Option<Producer> {
        let entry = self.producers.remove(producer_id)?;
        entry.producer.close();

        let bound: Vec<String> = self
            .consumers
            .iter()
            .filter(|(_, c)| c.consumer.producer_id() == producer_id)
            .map(|(id, _)| id.clone())
            .collect();

        for consumer_id in bound {
            if let Some(consumer) = self.consumers.remove(&consumer_id) {
                consumer.consumer.close(ConsumerCloseReason::ProducerClosed);
                self.notify(
                    &consumer.owner,
                    RoomNotification::ConsumerClosed { consumer_id },
                );
            }
        }

        Some(entry.producer)
    }

    fn close_transport(&mut self, transport_id: &str) -> bool {
        let Some(entry) = self.transports.remove(transport_id) else {
            return false;
        };
        entry.transport.close();

        let producers: Vec<String> = self
            .producers
            .values()
            .filter(|p| p.producer.transport_id() == transport_id)
            .map(|p| p.producer.id().to_string())
            .collect();
        for producer_id in producers {
            self.close_producer(&producer_id);
        }

        let consumers: Vec<String> = self
            .consumers
            .values()
            .filter(|c| c.consumer.transport_id() == transport_id)
            .map(|c| c.consumer.id().to_string())
            .collect();
        for consumer_id in consumers {
            if let Some(consumer) = self.consumers.remove(&consumer_id) {
                consumer.consumer.close(ConsumerCloseReason::TransportClosed);
            }
        }

        info!("Transport {} closed", transport_id);
        true
    }

    fn owned_producer(&self, producer_id: &str, owner: &str) -> VoxResult<&Producer> {
        self.producers
            .get(producer_id)
            .filter(|p| p.owner == owner)
            .map(|p| &p.producer)
            .ok_or_else(|| VoxError::not_found("producer", producer_id))
    }

    fn owned_consumer(&self, consumer_id: &str, owner: &str) -> VoxResult<&Consumer> {
        self.consumers
            .get(consumer_id)
            .filter(|c| c.owner == owner)
            .map(|c| &c.consumer)
            .ok_or_else(|| VoxError::not_found("consumer", consumer_id))
    }
}

/// A single SFU room
#[derive(Clone)]
pub struct Room {
    router: Router,
    config: RoomConfig,
    state: Arc<RwLock<RoomState>>,
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Room")
            .field("router", &self.router.id())
            .field("peers", &state.peers.len())
            .field("transports", &state.transports.len())
            .field("producers", &state.producers.len())
            .field("consumers", &state.consumers.len())
            .finish()
    }
}

impl Room {
    /// Create a room on top of `router`
    pub fn new(router: Router, config: RoomConfig) -> Self {
        Self {
            router,
            config,
            state: Arc::new(RwLock::new(RoomState::default())),
        }
    }

    /// Router backing the room
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Room policy
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    fn ensure_engine_alive(&self) -> VoxResult<()> {
        self.router.worker().ensure_alive()
    }

    /// Register a peer and return its notification stream
    pub fn join(&self, peer_id: &str) -> mpsc::UnboundedReceiver<RoomNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self
            .state
            .write()
            .peers
            .insert(peer_id.to_string(), PeerEntry { notifier: tx });
        if previous.is_some() {
            warn!("Peer {} joined twice, replacing its notifier", peer_id);
        }
        info!("Peer {} joined", peer_id);
        rx
    }

    /// Remove a peer and everything it owns
    pub fn leave(&self, peer_id: &str) {
        let mut state = self.state.write();
        if state.peers.remove(peer_id).is_none() {
            return;
        }

        let transports = state.transports.owned_by(peer_id);
        for transport_id in &transports {
            if let Some(entry) = state.transports.get(transport_id) {
                entry.transport.mark_disconnected();
            }
            state.close_transport(transport_id);
        }

        info!(
            "Peer {} left, closed {} transport(s)",
            peer_id,
            transports.len()
        );
    }

    /// Whether a peer is currently joined
    pub fn has_peer(&self, peer_id: &str) -> bool {
        self.state.read().peers.contains_key(peer_id)
    }

    /// Router capability set
    pub fn rtp_capabilities(&self) -> VoxResult<RtpCapabilities> {
        self.ensure_engine_alive()?;
        Ok(self.router.rtp_capabilities().clone())
    }

    /// Whether `remote` can receive `producer_id`; false for unknown producers
    pub fn can_consume(&self, producer_id: &str, remote: &RtpCapabilities) -> bool {
        let state = self.state.read();
        state
            .producers
            .get(producer_id)
            .map(|p| self.router.can_consume(&p.producer, remote))
            .unwrap_or(false)
    }

    /// Create a transport for `peer_id`
    ///
    /// A peer has at most one transport per role; creating another closes the
    /// previous one. The transport is registered only if the peer is still
    /// joined when the worker answers.
    pub async fn create_transport(
        &self,
        peer_id: &str,
        role: TransportRole,
    ) -> VoxResult<TransportParameters> {
        self.ensure_engine_alive()?;
        if !self.has_peer(peer_id) {
            return Err(VoxError::not_found("peer", peer_id));
        }

        let transport = self
            .router
            .create_webrtc_transport(&self.config.transport_options)
            .await?;

        let mut state = self.state.write();
        if !state.peers.contains_key(peer_id) {
            drop(state);
            transport.close();
            debug!(
                "Peer {} left while transport {} was being created",
                peer_id,
                transport.id()
            );
            return Err(VoxError::not_found("peer", peer_id));
        }

        if let Some(previous) = state.transports.find_role(peer_id, role) {
            debug!("Peer {} replaces {:?} transport {}", peer_id, role, previous);
            state.close_transport(&previous);
        }

        let parameters = transport.parameters().clone();
        self.watch_dtls(transport.clone());
        state.transports.register(transport, peer_id, role);
        info!(
            "Peer {} created {:?} transport {}",
            peer_id, role, parameters.id
        );
        Ok(parameters)
    }

    /// Close `transport` with its full cascade once its DTLS association closes
    fn watch_dtls(&self, transport: WebRtcTransport) {
        let state: Weak<RwLock<RoomState>> = Arc::downgrade(&self.state);
        tokio::spawn(async move {
            if !transport.dtls_closed().await {
                return;
            }
            let Some(state) = state.upgrade() else {
                return;
            };
            if state.write().close_transport(transport.id()) {
                warn!("Transport {} closed after its DTLS closed", transport.id());
            }
        });
    }

    /// Connect one of the peer's transports
    pub async fn connect_transport(
        &self,
        peer_id: &str,
        transport_id: &str,
        dtls_parameters: DtlsParameters,
    ) -> VoxResult<()> {
        self.ensure_engine_alive()?;
        let transport = self
            .state
            .read()
            .transports
            .get_owned(transport_id, peer_id)?
            .transport
            .clone();
        transport.connect(dtls_parameters).await
    }

    /// Close one of the peer's transports and everything bound to it
    pub fn close_transport(&self, peer_id: &str, transport_id: &str) -> VoxResult<()> {
        self.ensure_engine_alive()?;
        let mut state = self.state.write();
        state.transports.get_owned(transport_id, peer_id)?;
        state.close_transport(transport_id);
        Ok(())
    }

    /// Start producing on one of the peer's transports
    ///
    /// Every other joined peer gets exactly one `NewProducer` push.
    pub fn produce(
        &self,
        peer_id: &str,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> VoxResult<String> {
        self.ensure_engine_alive()?;
        let mut state = self.state.write();
        let transport = state.transports.get_owned(transport_id, peer_id)?.transport.clone();
        let producer = transport.produce(kind, rtp_parameters)?;
        let producer_id = producer.id().to_string();

        state.producers.insert(
            producer_id.clone(),
            ProducerEntry {
                producer,
                owner: peer_id.to_string(),
            },
        );

        for (other, peer) in state.peers.iter().filter(|(id, _)| id.as_str() != peer_id) {
            let notification = RoomNotification::NewProducer {
                producer_id: producer_id.clone(),
            };
            if peer.notifier.send(notification).is_err() {
                debug!("Peer {} missed newProducer {}", other, producer_id);
            }
        }

        Ok(producer_id)
    }

    /// Consume a producer on one of the peer's transports
    ///
    /// Fails with `NotFound` for unknown ids and `Unsatisfiable` when the
    /// capabilities share no codec profile; no consumer exists afterwards in
    /// either case.
    pub fn consume(
        &self,
        peer_id: &str,
        transport_id: &str,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
    ) -> VoxResult<Consumer> {
        self.ensure_engine_alive()?;
        let mut state = self.state.write();
        let transport = state.transports.get_owned(transport_id, peer_id)?.transport.clone();
        let producer = state
            .producers
            .get(producer_id)
            .map(|p| p.producer.clone())
            .ok_or_else(|| VoxError::not_found("producer", producer_id))?;

        let consumer = transport.consume(&producer, rtp_capabilities)?;
        // Resumed before registration so a concurrent close of the producer
        // always observes the final state
        if self.config.auto_resume_consumers {
            consumer.resume()?;
        }
        state.consumers.insert(
            consumer.id().to_string(),
            ConsumerEntry {
                consumer: consumer.clone(),
                owner: peer_id.to_string(),
            },
        );
        Ok(consumer)
    }

    /// Resume one of the peer's consumers
    pub fn resume_consumer(&self, peer_id: &str, consumer_id: &str) -> VoxResult<()> {
        self.ensure_engine_alive()?;
        let consumer = self.state.read().owned_consumer(consumer_id, peer_id)?.clone();
        consumer.resume()
    }

    /// Pause one of the peer's consumers
    pub fn pause_consumer(&self, peer_id: &str, consumer_id: &str) -> VoxResult<()> {
        self.ensure_engine_alive()?;
        let consumer = self.state.read().owned_consumer(consumer_id, peer_id)?.clone();
        consumer.pause()
    }

    /// Pause one of the peer's producers
    pub fn pause_producer(&self, peer_id: &str, producer_id: &str) -> VoxResult<()> {
        self.ensure_engine_alive()?;
        let producer = self.state.read().owned_producer(producer_id, peer_id)?.clone();
        producer.pause()
    }

    /// Resume one of the peer's producers
    pub fn resume_producer(&self, peer_id: &str, producer_id: &str) -> VoxResult<()> {
        self.ensure_engine_alive()?;
        let producer = self.state.read().owned_producer(producer_id, peer_id)?.clone();
        producer.resume()
    }

    /// Close one of the peer's producers and every consumer bound to it
    pub fn close_producer(&self, peer_id: &str, producer_id: &str) -> VoxResult<()> {
        self.ensure_engine_alive()?;
        let mut state = self.state.write();
        state.owned_producer(producer_id, peer_id)?;
        state.close_producer(producer_id);
        Ok(())
    }

    /// Snapshot of live producer ids
    pub fn producer_ids(&self) -> Vec<String> {
        self.state.read().producers.keys().cloned().collect()
    }

    /// Live producer by id
    pub fn producer(&self, producer_id: &str) -> Option<Producer> {
        self.state
            .read()
            .producers
            .get(producer_id)
            .map(|p| p.producer.clone())
    }

    /// Live consumer by id
    pub fn consumer(&self, consumer_id: &str) -> Option<Consumer> {
        self.state
            .read()
            .consumers
            .get(consumer_id)
            .map(|c| c.consumer.clone())
    }

    /// Number of joined peers
    pub fn peer_count(&self) -> usize {
        self.state.read().peers.len()
    }

    /// Number of registered transports
    pub fn transport_count(&self) -> usize {
        self.state.read().transports.len()
    }

    /// Number of live consumers
    pub fn consumer_count(&self) -> usize {
        self.state.read().consumers.len()
    }
}
