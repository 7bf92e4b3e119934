//! # voxshift core
//!
//! Server-side SFU building blocks: the capability negotiator, the media
//! engine (worker and router), WebRTC transports, producers, consumers and
//! the room that ties their lifecycles together.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod consumer;
pub mod engine;
pub mod error;
pub mod negotiator;
pub mod producer;
pub mod room;
pub mod rtp;
pub mod transport;

// Re-export main types
pub use consumer::{Consumer, ConsumerCloseReason, ConsumerState, ConsumerType};
pub use engine::{Router, Worker, WorkerSettings};
pub use error::{VoxError, VoxResult};
pub use producer::{Producer, ProducerState};
pub use room::{Room, RoomConfig, RoomNotification};
pub use rtp::{
    MediaKind, MediaPacket, RtcpFeedback, RtcpParameters, RtpCapabilities, RtpCodecCapability,
    RtpCodecParameters, RtpEncodingParameters, RtpHeaderExtension, RtpParameters,
};
pub use transport::{
    DtlsFingerprint, DtlsParameters, DtlsRole, DtlsState, IceCandidate, IceParameters,
    IceServer, ListenIp, TransportEntry, TransportParameters, TransportRegistry, TransportRole, TransportState,
    WebRtcTransport, WebRtcTransportOptions,
};
