//! Client side of the signaling protocol
//!
//! [`SignalingClient`] correlates requests with responses by id and hands
//! server pushes to the caller through a channel. Messages that fail to parse
//! are logged and dropped; the connection stays up. When the connection goes
//! away every pending request fails with `ConnectionClosed`.

use crate::protocol::{
    ConnectTransportRequest, ConsumeRequest, ConsumeResponse, ConsumerRequest, PeerMessage,
    ProduceRequest, ProduceResponse, ProducerRequest, ServerMessage, ServerPush, SignalingRequest,
    TransportRequest, TransportResponse,
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use voxshift_core::{
    DtlsParameters, MediaKind, RtpCapabilities, RtpParameters, VoxError, VoxResult,
};

type PendingRequests = Arc<DashMap<u64, oneshot::Sender<VoxResult<Value>>>>;

/// Request/response client for the SFU endpoint
pub struct SignalingClient {
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingRequests,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("pending", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SignalingClient {
    /// Connect to `url` and return the client with its push stream
    pub async fn connect(url: &str) -> VoxResult<(Self, mpsc::UnboundedReceiver<ServerPush>)> {
        let (ws_stream, _) = connect_async(url).await.map_err(|e| VoxError::Connection {
            reason: format!("Failed to connect to {}: {}", url, e),
        })?;
        tracing::debug!("Connected to signaling server {}", url);

        let (mut sink, mut stream) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let pending: PendingRequests = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::debug!("Failed to write to signaling server: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_pending = pending.clone();
        let reader_closed = closed.clone();
        let reader = tokio::spawn(async move {
            while let Some(incoming) = stream.next().await {
                match incoming {
                    Ok(Message::Text(text)) => route_message(&text, &reader_pending, &push_tx),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Signaling connection error: {}", e);
                        break;
                    }
                }
            }

            reader_closed.store(true, Ordering::SeqCst);
            fail_pending(&reader_pending);
            tracing::debug!("Signaling connection closed");
        });

        Ok((
            Self {
                outbound,
                pending,
                next_id: AtomicU64::new(1),
                closed,
                reader,
                writer,
            },
            push_rx,
        ))
    }

    /// Whether the connection has gone away
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send one request and wait for its answer
    pub async fn request<T: DeserializeOwned>(&self, request: SignalingRequest) -> VoxResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let method = request.method();
        let envelope = request.into_envelope(id)?;
        let text = serde_json::to_string(&envelope).map_err(|e| VoxError::InvalidMessage {
            message: method.to_string(),
            source: e.into(),
        })?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        if self.is_closed() || self.outbound.send(Message::Text(text)).is_err() {
            self.pending.remove(&id);
            return Err(VoxError::ConnectionClosed);
        }

        let data = rx.await.map_err(|_| VoxError::ConnectionClosed)??;
        serde_json::from_value(data).map_err(|e| VoxError::InvalidMessage {
            message: format!("{} response", method),
            source: e.into(),
        })
    }

    /// Router capability set
    pub async fn get_router_rtp_capabilities(&self) -> VoxResult<RtpCapabilities> {
        self.request(SignalingRequest::GetRouterRtpCapabilities).await
    }

    /// Create the sending transport
    pub async fn create_producer_transport(&self) -> VoxResult<TransportResponse> {
        self.request(SignalingRequest::CreateProducerTransport).await
    }

    /// Create the receiving transport
    pub async fn create_consumer_transport(&self) -> VoxResult<TransportResponse> {
        self.request(SignalingRequest::CreateConsumerTransport).await
    }

    /// Connect a transport with local DTLS parameters
    pub async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: DtlsParameters,
    ) -> VoxResult<()> {
        self.request(SignalingRequest::ConnectTransport(ConnectTransportRequest {
            transport_id: transport_id.to_string(),
            dtls_parameters,
        }))
        .await
    }

    /// Start producing, returning the producer id
    pub async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> VoxResult<String> {
        let response: ProduceResponse = self
            .request(SignalingRequest::Produce(ProduceRequest {
                transport_id: transport_id.to_string(),
                kind,
                rtp_parameters,
            }))
            .await?;
        Ok(response.id)
    }

    /// Consume a producer
    pub async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
        rtp_capabilities: RtpCapabilities,
    ) -> VoxResult<ConsumeResponse> {
        self.request(SignalingRequest::Consume(ConsumeRequest {
            transport_id: transport_id.to_string(),
            producer_id: producer_id.to_string(),
            rtp_capabilities,
        }))
        .await
    }

    /// Resume a consumer
    pub async fn resume(&self, consumer_id: &str) -> VoxResult<()> {
        self.request(SignalingRequest::Resume(consumer(consumer_id))).await
    }

    /// Live producer ids
    pub async fn get_producers(&self) -> VoxResult<Vec<String>> {
        self.request(SignalingRequest::GetProducers).await
    }

    /// Pause a consumer
    pub async fn pause_consumer(&self, consumer_id: &str) -> VoxResult<()> {
        self.request(SignalingRequest::PauseConsumer(consumer(consumer_id))).await
    }

    /// Pause a producer
    pub async fn pause_producer(&self, producer_id: &str) -> VoxResult<()> {
        self.request(SignalingRequest::PauseProducer(producer(producer_id))).await
    }

    /// Resume a producer
    pub async fn resume_producer(&self, producer_id: &str) -> VoxResult<()> {
        self.request(SignalingRequest::ResumeProducer(producer(producer_id))).await
    }

    /// Close a producer
    pub async fn close_producer(&self, producer_id: &str) -> VoxResult<()> {
        self.request(SignalingRequest::CloseProducer(producer(producer_id))).await
    }

    /// Close a transport
    pub async fn close_transport(&self, transport_id: &str) -> VoxResult<()> {
        self.request(SignalingRequest::CloseTransport(TransportRequest {
            transport_id: transport_id.to_string(),
        }))
        .await
    }

    /// Close the connection; pending requests fail
    pub async fn close(self) {
        let _ = self.outbound.send(Message::Close(None));
        drop(self.outbound);
        let _ = self.writer.await;
        let _ = self.reader.await;
    }
}

fn consumer(consumer_id: &str) -> ConsumerRequest {
    ConsumerRequest {
        consumer_id: consumer_id.to_string(),
    }
}

fn producer(producer_id: &str) -> ProducerRequest {
    ProducerRequest {
        producer_id: producer_id.to_string(),
    }
}

fn route_message(
    text: &str,
    pending: &PendingRequests,
    pushes: &mpsc::UnboundedSender<ServerPush>,
) {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(ServerMessage::Response(response)) => match pending.remove(&response.id) {
            Some((_, waiter)) => {
                let _ = waiter.send(response.into_result());
            }
            None => tracing::debug!("Dropping response to unknown request {}", response.id),
        },
        Ok(ServerMessage::Push(push)) => {
            let _ = pushes.send(push);
        }
        Err(e) => tracing::warn!("Dropping unparseable signaling message: {}", e),
    }
}

fn fail_pending(pending: &PendingRequests) {
    let ids: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, waiter)) = pending.remove(&id) {
            let _ = waiter.send(Err(VoxError::ConnectionClosed));
        }
    }
}

/// Join the peer-to-peer relay at `url`
///
/// Returns a sender for outgoing peer messages and a receiver for the ones
/// relayed from other connections. Unparseable messages are dropped.
pub async fn connect_relay(
    url: &str,
) -> VoxResult<(
    mpsc::UnboundedSender<PeerMessage>,
    mpsc::UnboundedReceiver<PeerMessage>,
)> {
    let (ws_stream, _) = connect_async(url).await.map_err(|e| VoxError::Connection {
        reason: format!("Failed to connect to {}: {}", url, e),
    })?;
    let (mut sink, mut stream) = ws_stream.split();
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<PeerMessage>();
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(message) = outgoing_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to serialize peer message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
                Message::Close(_) => break,
                _ => continue,
            };
            match serde_json::from_str::<PeerMessage>(&text) {
                Ok(message) => {
                    if incoming_tx.send(message).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("Dropping unparseable peer message: {}", e),
            }
        }
    });

    Ok((outgoing_tx, incoming_rx))
}
