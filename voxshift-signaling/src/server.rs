//! Signaling server implementation
//!
//! Two websocket endpoints share one listener: `/signaling` is a broadcast
//! relay for peer-to-peer negotiation, every other path speaks the SFU
//! request/response protocol against the room.

use crate::protocol::{
    to_data, ConsumeResponse, ProduceResponse, RequestEnvelope, ServerPush, SignalingRequest,
    SignalingResponse, TransportResponse,
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message, WebSocketStream};
use uuid::Uuid;
use voxshift_core::{IceServer, Room, TransportParameters, TransportRole, VoxError, VoxResult};

/// Path of the peer-to-peer relay endpoint
pub const RELAY_PATH: &str = "/signaling";

/// Default delay between engine death and server exit
pub const DEFAULT_ENGINE_GRACE: Duration = Duration::from_secs(2);

/// WebSocket connection wrapper
type WebSocketConnection = WebSocketStream<TcpStream>;

/// Outbound queues of relay connections mapped by connection ID
type RelayConnections = Arc<DashMap<String, mpsc::UnboundedSender<Message>>>;

/// Signaling server for one SFU room
pub struct SignalingServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    room: Room,
    relay: RelayConnections,
    ice_servers: Arc<[IceServer]>,
    engine_grace: Duration,
}

impl std::fmt::Debug for SignalingServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingServer")
            .field("local_addr", &self.local_addr)
            .field("room", &self.room)
            .field("relay_connections", &self.relay.len())
            .finish()
    }
}

impl SignalingServer {
    /// Bind the listener
    pub async fn bind(bind_addr: SocketAddr, room: Room) -> VoxResult<Self> {
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            VoxError::ServerStartFailed {
                address: bind_addr,
                source: e.into(),
            }
        })?;
        let local_addr = listener.local_addr().map_err(|e| VoxError::ServerStartFailed {
            address: bind_addr,
            source: e.into(),
        })?;

        Ok(Self {
            listener,
            local_addr,
            room,
            relay: Arc::new(DashMap::new()),
            ice_servers: Arc::from(Vec::new()),
            engine_grace: DEFAULT_ENGINE_GRACE,
        })
    }

    /// Delay between engine death and [`SignalingServer::run`] returning
    pub fn with_engine_grace(mut self, grace: Duration) -> Self {
        self.engine_grace = grace;
        self
    }

    /// ICE servers returned with every created transport
    pub fn with_ice_servers(mut self, ice_servers: Vec<IceServer>) -> Self {
        self.ice_servers = Arc::from(ice_servers);
        self
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Room served by this server
    pub fn room(&self) -> &Room {
        &self.room
    }

    /// Number of open relay connections
    pub fn relay_connections(&self) -> usize {
        self.relay.len()
    }

    /// Accept connections until the media engine dies
    ///
    /// Engine death is fatal: after the grace period the server stops and
    /// returns `EngineFatal`, leaving in-flight responses time to flush.
    pub async fn run(self) -> VoxResult<()> {
        tracing::info!("Signaling server listening on {}", self.local_addr);
        let worker = self.room.router().worker().clone();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        tracing::debug!("New connection from {}", addr);
                        let room = self.room.clone();
                        let relay = self.relay.clone();
                        let ice_servers = self.ice_servers.clone();
                        tokio::spawn(handle_connection(stream, room, relay, ice_servers));
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                    }
                },
                reason = worker.died() => {
                    tracing::error!(
                        "Media worker {} died ({}), exiting in {:?}",
                        worker.id(),
                        reason,
                        self.engine_grace
                    );
                    tokio::time::sleep(self.engine_grace).await;
                    return Err(VoxError::EngineFatal { reason });
                }
            }
        }
    }
}

/// Handle incoming WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    room: Room,
    relay: RelayConnections,
    ice_servers: Arc<[IceServer]>,
) {
    let mut path = String::from("/");
    let capture_path = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        path = req.uri().path().to_string();
        Ok(resp)
    };
    let ws_stream = match accept_hdr_async(stream, capture_path).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::error!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let connection_id = Uuid::new_v4().to_string();
    if path == RELAY_PATH {
        tracing::debug!("Relay connection established: {}", connection_id);
        handle_relay(ws_stream, connection_id, relay).await;
    } else {
        tracing::debug!("Peer connection established: {}", connection_id);
        handle_peer(ws_stream, connection_id, room, ice_servers).await;
    }
}

/// Drain an outbound queue into the websocket sink
fn spawn_writer(
    mut sink: futures::stream::SplitSink<WebSocketConnection, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if let Err(e) = sink.send(message).await {
                tracing::debug!("Failed to write to websocket: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
    })
}

fn send_json<T: Serialize>(outbound: &mpsc::UnboundedSender<Message>, value: &T) {
    match serde_json::to_string(value) {
        Ok(text) => {
            let _ = outbound.send(Message::Text(text));
        }
        Err(e) => tracing::error!("Failed to serialize outbound message: {}", e),
    }
}

/// Serve one SFU peer until it disconnects
async fn handle_peer(
    ws_stream: WebSocketConnection,
    peer_id: String,
    room: Room,
    ice_servers: Arc<[IceServer]>,
) {
    let (sink, mut stream) = ws_stream.split();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let writer = spawn_writer(sink, outbound_rx);
    let mut notifications = room.join(&peer_id);

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_text(&room, &ice_servers, &peer_id, &outbound, &text).await;
                }
                Some(Ok(Message::Close(_))) => {
                    tracing::debug!("Connection {} closed", peer_id);
                    break;
                }
                Some(Err(e)) => {
                    tracing::error!("WebSocket error on connection {}: {}", peer_id, e);
                    break;
                }
                None => {
                    tracing::debug!("Connection {} stream ended", peer_id);
                    break;
                }
                _ => {
                    // Binary, Ping and Pong carry no requests
                }
            },
            Some(notification) = notifications.recv() => {
                send_json(&outbound, &ServerPush::from(notification));
            }
        }
    }

    cleanup_peer(&room, &peer_id);
    drop(outbound);
    let _ = writer.await;
}

/// Decode and answer one request
async fn handle_text(
    room: &Room,
    ice_servers: &[IceServer],
    peer_id: &str,
    outbound: &mpsc::UnboundedSender<Message>,
    text: &str,
) {
    let envelope = match serde_json::from_str::<RequestEnvelope>(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            // Without an id there is nothing to answer
            tracing::warn!("Invalid message format from {}: {}", peer_id, e);
            return;
        }
    };

    let id = envelope.id;
    let method = envelope.method.clone();
    let result = match SignalingRequest::from_envelope(envelope) {
        Ok(request) => dispatch(room, ice_servers, peer_id, request).await,
        Err(e) => Err(e),
    };

    let response = match result {
        Ok(data) => SignalingResponse::ok(id, data),
        Err(e) => {
            tracing::warn!("{} from {} failed: {}", method, peer_id, e);
            SignalingResponse::error(id, &e)
        }
    };
    send_json(outbound, &response);
}

/// Run a request against the room
async fn dispatch(
    room: &Room,
    ice_servers: &[IceServer],
    peer_id: &str,
    request: SignalingRequest,
) -> VoxResult<Value> {
    let transport_response = |parameters: TransportParameters| TransportResponse {
        parameters,
        ice_servers: ice_servers.to_vec(),
    };
    match request {
        SignalingRequest::GetRouterRtpCapabilities => to_data(&room.rtp_capabilities()?),
        SignalingRequest::CreateProducerTransport => {
            let parameters = room.create_transport(peer_id, TransportRole::Producer).await?;
            to_data(&transport_response(parameters))
        }
        SignalingRequest::CreateConsumerTransport => {
            let parameters = room.create_transport(peer_id, TransportRole::Consumer).await?;
            to_data(&transport_response(parameters))
        }
        SignalingRequest::ConnectTransport(req) => {
            room.connect_transport(peer_id, &req.transport_id, req.dtls_parameters)
                .await?;
            Ok(Value::Null)
        }
        SignalingRequest::Produce(req) => {
            let id = room.produce(peer_id, &req.transport_id, req.kind, req.rtp_parameters)?;
            to_data(&ProduceResponse { id })
        }
        SignalingRequest::Consume(req) => {
            let consumer = room.consume(
                peer_id,
                &req.transport_id,
                &req.producer_id,
                &req.rtp_capabilities,
            )?;
            to_data(&ConsumeResponse {
                id: consumer.id().to_string(),
                producer_id: consumer.producer_id().to_string(),
                kind: consumer.kind(),
                rtp_parameters: consumer.rtp_parameters().clone(),
                consumer_type: consumer.consumer_type(),
                producer_paused: consumer.producer_paused(),
            })
        }
        SignalingRequest::Resume(req) => {
            room.resume_consumer(peer_id, &req.consumer_id)?;
            Ok(Value::Null)
        }
        SignalingRequest::GetProducers => to_data(&room.producer_ids()),
        SignalingRequest::PauseConsumer(req) => {
            room.pause_consumer(peer_id, &req.consumer_id)?;
            Ok(Value::Null)
        }
        SignalingRequest::PauseProducer(req) => {
            room.pause_producer(peer_id, &req.producer_id)?;
            Ok(Value::Null)
        }
        SignalingRequest::ResumeProducer(req) => {
            room.resume_producer(peer_id, &req.producer_id)?;
            Ok(Value::Null)
        }
        SignalingRequest::CloseProducer(req) => {
            room.close_producer(peer_id, &req.producer_id)?;
            Ok(Value::Null)
        }
        SignalingRequest::CloseTransport(req) => {
            room.close_transport(peer_id, &req.transport_id)?;
            Ok(Value::Null)
        }
    }
}

/// Tear down everything the peer owned
fn cleanup_peer(room: &Room, peer_id: &str) {
    room.leave(peer_id);
    tracing::info!("Peer {} disconnected", peer_id);
}

/// Forward every message of one relay connection to all the others
async fn handle_relay(
    ws_stream: WebSocketConnection,
    connection_id: String,
    relay: RelayConnections,
) {
    let (sink, mut stream) = ws_stream.split();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let writer = spawn_writer(sink, outbound_rx);
    relay.insert(connection_id.clone(), outbound);

    while let Some(incoming) = stream.next().await {
        match incoming {
            Ok(message @ (Message::Text(_) | Message::Binary(_))) => {
                for entry in relay.iter().filter(|e| e.key() != &connection_id) {
                    let _ = entry.value().send(message.clone());
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::error!("WebSocket error on relay {}: {}", connection_id, e);
                break;
            }
        }
    }

    relay.remove(&connection_id);
    tracing::debug!("Relay connection {} closed", connection_id);
    let _ = writer.await;
}
