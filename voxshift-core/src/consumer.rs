//! Consumers: a peer's view of another peer's producer

use crate::error::{VoxError, VoxResult};
use crate::producer::{ConsumerSink, Producer};
use crate::rtp::{MediaKind, MediaPacket, RtpParameters};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Packets buffered per consumer before new ones are dropped
const CONSUMER_QUEUE_DEPTH: usize = 256;

/// Consumer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerState {
    /// Created or paused, nothing is forwarded
    Paused,
    /// Receiving media
    Active,
    /// Terminal
    Closed,
}

/// Consumer type reported to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerType {
    /// Single stream, no simulcast layers
    Simple,
}

/// Why a consumer was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsumerCloseReason {
    /// Its producer closed
    ProducerClosed,
    /// Its transport closed
    TransportClosed,
    /// Closed directly
    Closed,
}

struct ConsumerInner {
    id: String,
    producer: Producer,
    transport_id: String,
    rtp_parameters: RtpParameters,
    state: watch::Sender<ConsumerState>,
    close_reason: Mutex<Option<ConsumerCloseReason>>,
    packets: tokio::sync::Mutex<mpsc::Receiver<MediaPacket>>,
}

/// Handle to a consumer; clones share state
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.inner.id)
            .field("producer_id", &self.producer_id())
            .field("state", &self.state())
            .finish()
    }
}

impl Consumer {
    pub(crate) fn new(
        id: String,
        producer: Producer,
        transport_id: String,
        rtp_parameters: RtpParameters,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConsumerState::Paused);
        let (packet_tx, packet_rx) = mpsc::channel(CONSUMER_QUEUE_DEPTH);

        let payload_type = rtp_parameters
            .codecs
            .first()
            .map(|codec| codec.payload_type)
            .unwrap_or_default();
        let ssrc = rtp_parameters.primary_ssrc().unwrap_or_default();

        producer.attach(
            &id,
            ConsumerSink {
                packets: packet_tx,
                state: state_rx,
                payload_type,
                ssrc,
            },
        );

        info!(
            "Consumer {} created for producer {} on transport {}",
            id,
            producer.id(),
            transport_id
        );

        Self {
            inner: Arc::new(ConsumerInner {
                id,
                producer,
                transport_id,
                rtp_parameters,
                state: state_tx,
                close_reason: Mutex::new(None),
                packets: tokio::sync::Mutex::new(packet_rx),
            }),
        }
    }

    /// Consumer identifier
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Producer being consumed
    pub fn producer_id(&self) -> &str {
        self.inner.producer.id()
    }

    /// Media kind
    pub fn kind(&self) -> MediaKind {
        self.inner.producer.kind()
    }

    /// Transport the consumer sends on
    pub fn transport_id(&self) -> &str {
        &self.inner.transport_id
    }

    /// RTP parameters negotiated for this consumer
    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.inner.rtp_parameters
    }

    /// Always `simple` for audio
    pub fn consumer_type(&self) -> ConsumerType {
        ConsumerType::Simple
    }

    /// Whether the producer side is currently paused
    pub fn producer_paused(&self) -> bool {
        self.inner.producer.is_paused()
    }

    /// Current state
    pub fn state(&self) -> ConsumerState {
        *self.inner.state.borrow()
    }

    /// Whether the consumer is closed
    pub fn is_closed(&self) -> bool {
        self.state() == ConsumerState::Closed
    }

    /// Reason recorded when the consumer closed
    pub fn close_reason(&self) -> Option<ConsumerCloseReason> {
        *self.inner.close_reason.lock()
    }

    /// Start forwarding; idempotent if already active
    pub fn resume(&self) -> VoxResult<()> {
        self.transition(ConsumerState::Active)
    }

    /// Stop forwarding; idempotent if already paused
    pub fn pause(&self) -> VoxResult<()> {
        self.transition(ConsumerState::Paused)
    }

    fn transition(&self, target: ConsumerState) -> VoxResult<()> {
        let mut closed = false;
        let changed = self.inner.state.send_if_modified(|state| match *state {
            ConsumerState::Closed => {
                closed = true;
                false
            }
            current if current == target => false,
            _ => {
                *state = target;
                true
            }
        });

        if closed {
            return Err(VoxError::not_found("consumer", self.id()));
        }
        if changed {
            debug!("Consumer {} is now {:?}", self.id(), target);
        }
        Ok(())
    }

    /// Close the consumer; further calls are no-ops
    pub fn close(&self, reason: ConsumerCloseReason) {
        let changed = self.inner.state.send_if_modified(|state| {
            if *state == ConsumerState::Closed {
                false
            } else {
                *state = ConsumerState::Closed;
                true
            }
        });
        if !changed {
            return;
        }
        *self.inner.close_reason.lock() = Some(reason);
        self.inner.producer.detach(self.id());
        info!("Consumer {} closed ({:?})", self.id(), reason);
    }

    /// Next forwarded packet, or `None` once the consumer closed
    pub async fn recv(&self) -> Option<MediaPacket> {
        let mut state = self.inner.state.subscribe();
        let mut packets = self.inner.packets.lock().await;

        loop {
            if *state.borrow_and_update() == ConsumerState::Closed {
                return None;
            }
            tokio::select! {
                packet = packets.recv() => return packet,
                changed = state.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::{RtpCodecParameters, RtpEncodingParameters};
    use bytes::Bytes;

    fn producer() -> Producer {
        Producer::new(
            "p1".to_string(),
            MediaKind::Audio,
            RtpParameters {
                codecs: vec![RtpCodecParameters {
                    mime_type: "audio/opus".to_string(),
                    payload_type: 111,
                    clock_rate: 48000,
                    channels: Some(2),
                    parameters: Default::default(),
                    rtcp_feedback: vec![],
                }],
                encodings: vec![RtpEncodingParameters {
                    ssrc: Some(1),
                    max_bitrate: None,
                }],
                ..Default::default()
            },
            "t1".to_string(),
        )
    }

    fn consumer_for(producer: &Producer) -> Consumer {
        let mut params = producer.rtp_parameters().clone();
        params.codecs[0].payload_type = 100;
        params.encodings[0].ssrc = Some(777);
        Consumer::new("c1".to_string(), producer.clone(), "t2".to_string(), params)
    }

    fn packet(seq: u16) -> MediaPacket {
        MediaPacket {
            payload_type: 111,
            sequence_number: seq,
            timestamp: seq as u32 * 960,
            ssrc: 1,
            payload: Bytes::from_static(b"abc"),
        }
    }

    #[tokio::test]
    async fn test_paused_consumer_receives_nothing() {
        let producer = producer();
        let consumer = consumer_for(&producer);
        assert_eq!(consumer.state(), ConsumerState::Paused);

        producer.send(packet(1)).unwrap();
        consumer.resume().unwrap();
        producer.send(packet(2)).unwrap();

        let received = consumer.recv().await.unwrap();
        assert_eq!(received.sequence_number, 2);
        assert_eq!(received.payload_type, 100);
        assert_eq!(received.ssrc, 777);
    }

    #[tokio::test]
    async fn test_paused_producer_forwards_nothing() {
        let producer = producer();
        let consumer = consumer_for(&producer);
        consumer.resume().unwrap();

        producer.pause().unwrap();
        assert!(consumer.producer_paused());
        producer.send(packet(1)).unwrap();
        producer.resume().unwrap();
        producer.send(packet(2)).unwrap();

        assert_eq!(consumer.recv().await.unwrap().sequence_number, 2);
        assert_eq!(producer.packets_received(), 1);
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let producer = producer();
        let consumer = consumer_for(&producer);
        consumer.resume().unwrap();

        let waiter = {
            let consumer = consumer.clone();
            tokio::spawn(async move { consumer.recv().await })
        };
        tokio::task::yield_now().await;
        consumer.close(ConsumerCloseReason::ProducerClosed);

        assert!(waiter.await.unwrap().is_none());
        assert_eq!(
            consumer.close_reason(),
            Some(ConsumerCloseReason::ProducerClosed)
        );
        assert!(consumer.resume().is_err());
        assert_eq!(producer.consumer_count(), 0);
    }

    #[test]
    fn test_resume_is_idempotent() {
        let producer = producer();
        let consumer = consumer_for(&producer);
        consumer.resume().unwrap();
        consumer.resume().unwrap();
        assert_eq!(consumer.state(), ConsumerState::Active);
        consumer.pause().unwrap();
        assert_eq!(consumer.state(), ConsumerState::Paused);
    }
}
