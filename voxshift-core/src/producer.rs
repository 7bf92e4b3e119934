//! Producers: inbound media streams bound to a transport

use crate::error::{VoxError, VoxResult};
use crate::rtp::{MediaKind, MediaPacket, RtpParameters};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Producer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerState {
    /// Forwarding media
    Active,
    /// Media is dropped at the producer
    Paused,
    /// Terminal
    Closed,
}

/// Where a producer delivers packets for one consumer
pub(crate) struct ConsumerSink {
    pub packets: mpsc::Sender<MediaPacket>,
    pub state: watch::Receiver<crate::consumer::ConsumerState>,
    pub payload_type: u8,
    pub ssrc: u32,
}

struct ProducerInner {
    id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    transport_id: String,
    state: Mutex<ProducerState>,
    sinks: Mutex<HashMap<String, ConsumerSink>>,
    packets_received: AtomicU64,
    packets_dropped: AtomicU64,
}

/// Handle to a producer; clones share state
#[derive(Clone)]
pub struct Producer {
    inner: Arc<ProducerInner>,
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl Producer {
    pub(crate) fn new(
        id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        transport_id: String,
    ) -> Self {
        info!("Producer {} created on transport {}", id, transport_id);
        Self {
            inner: Arc::new(ProducerInner {
                id,
                kind,
                rtp_parameters,
                transport_id,
                state: Mutex::new(ProducerState::Active),
                sinks: Mutex::new(HashMap::new()),
                packets_received: AtomicU64::new(0),
                packets_dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Producer identifier
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Media kind
    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    /// RTP parameters the remote side sends with
    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.inner.rtp_parameters
    }

    /// Transport the producer is bound to
    pub fn transport_id(&self) -> &str {
        &self.inner.transport_id
    }

    /// Current state
    pub fn state(&self) -> ProducerState {
        *self.inner.state.lock()
    }

    /// Whether the producer is paused
    pub fn is_paused(&self) -> bool {
        self.state() == ProducerState::Paused
    }

    /// Whether the producer is closed
    pub fn is_closed(&self) -> bool {
        self.state() == ProducerState::Closed
    }

    /// Packets accepted from the remote side
    pub fn packets_received(&self) -> u64 {
        self.inner.packets_received.load(Ordering::Relaxed)
    }

    /// Packets not delivered to a consumer because its queue was full
    pub fn packets_dropped(&self) -> u64 {
        self.inner.packets_dropped.load(Ordering::Relaxed)
    }

    /// Forward a packet to every active consumer
    ///
    /// Packets sent while paused are discarded. Each consumer receives a copy
    /// carrying its own payload type and SSRC.
    pub fn send(&self, packet: MediaPacket) -> VoxResult<()> {
        match self.state() {
            ProducerState::Closed => {
                return Err(VoxError::InvalidState {
                    expected: "active".to_string(),
                    actual: "closed".to_string(),
                })
            }
            ProducerState::Paused => return Ok(()),
            ProducerState::Active => {}
        }

        self.inner.packets_received.fetch_add(1, Ordering::Relaxed);

        let sinks = self.inner.sinks.lock();
        for sink in sinks.values() {
            if *sink.state.borrow() != crate::consumer::ConsumerState::Active {
                continue;
            }
            let forwarded = MediaPacket {
                payload_type: sink.payload_type,
                ssrc: sink.ssrc,
                ..packet.clone()
            };
            if sink.packets.try_send(forwarded).is_err() {
                self.inner.packets_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Stop forwarding; idempotent
    pub fn pause(&self) -> VoxResult<()> {
        let mut state = self.inner.state.lock();
        match *state {
            ProducerState::Closed => Err(VoxError::not_found("producer", self.id())),
            ProducerState::Paused => Ok(()),
            ProducerState::Active => {
                *state = ProducerState::Paused;
                debug!("Producer {} paused", self.id());
                Ok(())
            }
        }
    }

    /// Resume forwarding; idempotent
    pub fn resume(&self) -> VoxResult<()> {
        let mut state = self.inner.state.lock();
        match *state {
            ProducerState::Closed => Err(VoxError::not_found("producer", self.id())),
            ProducerState::Active => Ok(()),
            ProducerState::Paused => {
                *state = ProducerState::Active;
                debug!("Producer {} resumed", self.id());
                Ok(())
            }
        }
    }

    /// Close the producer and end every consumer stream fed by it
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == ProducerState::Closed {
                return;
            }
            *state = ProducerState::Closed;
        }
        self.inner.sinks.lock().clear();
        info!("Producer {} closed", self.id());
    }

    pub(crate) fn attach(&self, consumer_id: &str, sink: ConsumerSink) {
        if self.is_closed() {
            return;
        }
        self.inner.sinks.lock().insert(consumer_id.to_string(), sink);
    }

    pub(crate) fn detach(&self, consumer_id: &str) {
        self.inner.sinks.lock().remove(consumer_id);
    }

    /// Number of consumers currently attached
    pub fn consumer_count(&self) -> usize {
        self.inner.sinks.lock().len()
    }
}
