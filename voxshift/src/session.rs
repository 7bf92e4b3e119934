//! Client session against a voxshift SFU
//!
//! [`RoomSession::join`] runs the whole setup sequence: router capabilities,
//! one sending and one receiving transport, DTLS connect for both, then one
//! consumer per producer already live in the room. Later producers arrive as
//! `newProducer` pushes and are consumed from a background task; producers
//! that go away surface as [`Event::TrackRemoved`].
//!
//! Media itself flows in-process: the session takes a handle to the room the
//! server runs and attaches to the producer and consumer objects the server
//! created on its behalf.

use crate::error::{SessionError, SessionResult};
use crate::event::{Event, EventStream};
use crate::track::{LocalTrack, RemoteTrack};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use voxshift_core::{
    DtlsFingerprint, DtlsParameters, DtlsRole, IceServer, MediaKind, Room, RtcpParameters,
    RtpCapabilities, RtpCodecParameters, RtpEncodingParameters, RtpParameters, VoxError,
};
use voxshift_media::{Packetizer, Pipeline, PipelineConfig};
use voxshift_signaling::{ServerPush, SignalingClient};

/// Where and how to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// SFU signaling URL, e.g. `ws://127.0.0.1:3000/`
    pub url: String,
    /// ICE servers for the peer connections; when empty the servers the SFU
    /// sends with its transports are used
    pub ice_servers: Vec<IceServer>,
}

impl SessionConfig {
    /// Config for `url` that takes its ICE servers from the SFU
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ice_servers: Vec::new(),
        }
    }
}

struct SessionInner {
    client: SignalingClient,
    media: Room,
    rtp_capabilities: RtpCapabilities,
    send_transport_id: String,
    recv_transport_id: String,
    ice_servers: Vec<IceServer>,
    /// consumer id -> track
    remote_tracks: DashMap<String, RemoteTrack>,
    /// producer id -> consumer id
    consumed: DashMap<String, String>,
    /// producers published by this session
    own_producers: DashMap<String, ()>,
    events: mpsc::UnboundedSender<Event>,
}

/// A joined session
pub struct RoomSession {
    inner: Arc<SessionInner>,
    push_task: JoinHandle<()>,
}

impl std::fmt::Debug for RoomSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSession")
            .field("send_transport", &self.inner.send_transport_id)
            .field("recv_transport", &self.inner.recv_transport_id)
            .field("remote_tracks", &self.inner.remote_tracks.len())
            .finish()
    }
}

impl RoomSession {
    /// Connect to the SFU, set up both transports and consume everything live
    pub async fn join(config: SessionConfig, media: Room) -> SessionResult<(Self, EventStream)> {
        let (client, mut pushes) = SignalingClient::connect(&config.url).await?;

        let rtp_capabilities = client.get_router_rtp_capabilities().await?;
        let send = client.create_producer_transport().await?;
        let recv = client.create_consumer_transport().await?;
        let ice_servers = if config.ice_servers.is_empty() {
            send.ice_servers
        } else {
            config.ice_servers
        };
        debug!(
            "Joining {} with {} ICE server(s)",
            config.url,
            ice_servers.len()
        );

        let (send_transport, recv_transport) = (send.parameters, recv.parameters);
        client
            .connect_transport(&send_transport.id, local_dtls_parameters())
            .await?;
        client
            .connect_transport(&recv_transport.id, local_dtls_parameters())
            .await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(SessionInner {
            client,
            media,
            rtp_capabilities,
            send_transport_id: send_transport.id,
            recv_transport_id: recv_transport.id,
            ice_servers,
            remote_tracks: DashMap::new(),
            consumed: DashMap::new(),
            own_producers: DashMap::new(),
            events: events_tx,
        });

        let live = inner.client.get_producers().await?;
        info!("Joined {}, {} producer(s) live", config.url, live.len());
        for producer_id in live {
            if let Err(e) = inner.subscribe(&producer_id).await {
                inner.report(&producer_id, e);
            }
        }

        let task_inner = inner.clone();
        let push_task = tokio::spawn(async move {
            while let Some(push) = pushes.recv().await {
                task_inner.handle_push(push).await;
            }
            debug!("Push stream ended");
            let _ = task_inner.events.send(Event::Disconnected);
        });

        Ok((Self { inner, push_task }, EventStream::new(events_rx)))
    }

    /// Router capability set received at join
    pub fn rtp_capabilities(&self) -> &RtpCapabilities {
        &self.inner.rtp_capabilities
    }

    /// ICE servers in effect for this session's peer connections
    pub fn ice_servers(&self) -> &[IceServer] {
        &self.inner.ice_servers
    }

    /// Id of the sending transport
    pub fn send_transport_id(&self) -> &str {
        &self.inner.send_transport_id
    }

    /// Id of the receiving transport
    pub fn recv_transport_id(&self) -> &str {
        &self.inner.recv_transport_id
    }

    /// Publish audio processed by a pipeline built from `pipeline_config`
    pub async fn publish(&self, pipeline_config: PipelineConfig) -> SessionResult<LocalTrack> {
        let pipeline = Pipeline::new(pipeline_config)?;
        let codec = self
            .inner
            .rtp_capabilities
            .codecs
            .iter()
            .find(|c| c.kind == MediaKind::Audio)
            .ok_or_else(|| VoxError::rejected("publish", "router offers no audio codec"))?;

        let payload_type = codec.preferred_payload_type.unwrap_or(100);
        let ssrc: u32 = rand::random();
        let rtp_parameters = RtpParameters {
            mid: Some("0".to_string()),
            codecs: vec![RtpCodecParameters {
                mime_type: codec.mime_type.clone(),
                payload_type,
                clock_rate: codec.clock_rate,
                channels: codec.channels,
                parameters: codec.parameters.clone(),
                rtcp_feedback: codec.rtcp_feedback.clone(),
            }],
            encodings: vec![RtpEncodingParameters {
                ssrc: Some(ssrc),
                max_bitrate: None,
            }],
            rtcp: RtcpParameters::default(),
        };

        let producer_id = self
            .inner
            .client
            .produce(&self.inner.send_transport_id, MediaKind::Audio, rtp_parameters)
            .await?;
        self.inner.own_producers.insert(producer_id.clone(), ());

        let producer = self
            .inner
            .media
            .producer(&producer_id)
            .ok_or_else(|| VoxError::not_found("producer", &producer_id))?;
        let packetizer = Packetizer::new(payload_type, ssrc, codec.clock_rate);

        let _ = self.inner.events.send(Event::LocalTrackPublished {
            producer_id: producer_id.clone(),
        });
        info!("Published producer {}", producer_id);
        Ok(LocalTrack::new(pipeline, packetizer, producer))
    }

    /// Stop publishing a track
    pub async fn unpublish(&self, track: &LocalTrack) -> SessionResult<()> {
        self.inner.client.close_producer(track.producer_id()).await?;
        self.inner.own_producers.remove(track.producer_id());
        Ok(())
    }

    /// Pause forwarding of a published track
    pub async fn pause(&self, track: &LocalTrack) -> SessionResult<()> {
        Ok(self.inner.client.pause_producer(track.producer_id()).await?)
    }

    /// Resume forwarding of a published track
    pub async fn resume(&self, track: &LocalTrack) -> SessionResult<()> {
        Ok(self.inner.client.resume_producer(track.producer_id()).await?)
    }

    /// Remote tracks currently being received
    pub fn remote_tracks(&self) -> Vec<RemoteTrack> {
        self.inner
            .remote_tracks
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Close the connection; the server releases everything the session owned
    pub async fn leave(self) {
        self.push_task.abort();
        let _ = self.push_task.await;
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner.client.close().await,
            Err(_) => warn!("Session still shared while leaving"),
        }
        info!("Left session");
    }
}

impl SessionInner {
    async fn handle_push(&self, push: ServerPush) {
        match push {
            ServerPush::NewProducer { producer_id } => {
                if let Err(e) = self.subscribe(&producer_id).await {
                    self.report(&producer_id, e);
                }
            }
            ServerPush::ConsumerClosed { consumer_id } => {
                match self.remote_tracks.remove(&consumer_id) {
                    Some((_, track)) => {
                        self.consumed.remove(track.producer_id());
                        info!("Remote track {} removed", consumer_id);
                        let _ = self.events.send(Event::TrackRemoved { track });
                    }
                    None => debug!("Unknown consumer {} closed", consumer_id),
                }
            }
        }
    }

    async fn subscribe(&self, producer_id: &str) -> SessionResult<()> {
        if self.own_producers.contains_key(producer_id) || self.consumed.contains_key(producer_id)
        {
            return Ok(());
        }

        let response = self
            .client
            .consume(
                &self.recv_transport_id,
                producer_id,
                self.rtp_capabilities.clone(),
            )
            .await?;
        self.client.resume(&response.id).await?;

        let consumer = self
            .media
            .consumer(&response.id)
            .ok_or_else(|| VoxError::not_found("consumer", &response.id))?;
        let track = RemoteTrack::new(consumer);
        self.consumed
            .insert(producer_id.to_string(), response.id.clone());
        self.remote_tracks.insert(response.id.clone(), track.clone());
        info!("Consuming producer {} as {}", producer_id, response.id);
        let _ = self.events.send(Event::TrackReceived { track });
        Ok(())
    }

    fn report(&self, producer_id: &str, error: SessionError) {
        warn!("Failed to consume producer {}: {}", producer_id, error);
        let _ = self.events.send(Event::SessionError {
            error: error.to_string(),
        });
    }
}

fn local_dtls_parameters() -> DtlsParameters {
    let digest: [u8; 32] = rand::random();
    let value = digest
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":");
    DtlsParameters {
        role: DtlsRole::Client,
        fingerprints: vec![DtlsFingerprint {
            algorithm: "sha-256".to_string(),
            value,
        }],
    }
}
