//! # voxshift - Live Voice Rooms with Real-Time Pitch Shifting
//!
//! voxshift is a selective forwarding unit for live audio. Each client runs
//! its microphone through a pitch-shift pipeline (noise gate, pitch shifter,
//! band-limiting filters) and publishes the result; the SFU forwards every
//! published stream to every other peer in the room.
//!
//! ## Key Features
//!
//! - **Real-time DSP**: allocation-free pitch shifting tuned at runtime
//! - **SFU core**: capability negotiation, transports, producers, consumers
//! - **JSON signaling**: request/response over WebSocket with server pushes
//! - **ICE helper**: offer/answer and candidate ordering for peer connections
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voxshift::{bind_server, PipelineConfig, RoomSession, ServerConfig, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = bind_server(&ServerConfig::default()).await?;
//!     let url = format!("ws://{}/", server.local_addr());
//!     let room = server.room().clone();
//!     tokio::spawn(server.run());
//!
//!     let (session, mut events) = RoomSession::join(SessionConfig::new(url), room).await?;
//!     let mut track = session.publish(PipelineConfig::default()).await?;
//!     track.controls().set_pitch_factor(1.5);
//!     track.send_frame(&vec![0.0; track.frame_size()])?;
//!
//!     while let Some(event) = events.next().await {
//!         println!("Session event: {}", event.event_type());
//!     }
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use voxshift_core::{
    Consumer, IceServer, MediaKind, Producer, Room, RoomConfig, Router, RtpCapabilities, VoxError,
    VoxResult, Worker, WorkerSettings,
};

#[cfg(feature = "media")]
pub use voxshift_media::{
    AudioFrame, AudioTrack, MediaError, Pipeline, PipelineConfig, PipelineControls,
    PipelineStats,
};

#[cfg(feature = "signaling")]
pub use voxshift_signaling::{
    IceNegotiator, IceState, PeerMessage, PeerSession, SignalingClient, SignalingServer,
};

// Public API modules
pub mod config;
#[cfg(all(feature = "media", feature = "signaling"))]
pub mod error;
#[cfg(all(feature = "media", feature = "signaling"))]
pub mod event;
#[cfg(feature = "signaling")]
pub mod server;
#[cfg(all(feature = "media", feature = "signaling"))]
pub mod session;
#[cfg(all(feature = "media", feature = "signaling"))]
pub mod track;

// Re-export main API types
pub use config::ServerConfig;
#[cfg(all(feature = "media", feature = "signaling"))]
pub use error::{SessionError, SessionResult};
#[cfg(all(feature = "media", feature = "signaling"))]
pub use event::{Event, EventStream};
#[cfg(feature = "signaling")]
pub use server::bind_server;
#[cfg(all(feature = "media", feature = "signaling"))]
pub use session::{RoomSession, SessionConfig};
#[cfg(all(feature = "media", feature = "signaling"))]
pub use track::{LocalTrack, RemoteTrack};
