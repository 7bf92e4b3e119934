//! # voxshift signaling
//!
//! WebSocket signaling for the SFU: the request/response protocol and its
//! server pushes, the server that runs it against a room, the matching
//! client, and the client-side ICE negotiation state machine that rides on
//! the peer-to-peer relay endpoint.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod ice;
pub mod protocol;
pub mod server;

// Re-export main types
pub use client::{connect_relay, SignalingClient};
pub use ice::{IceNegotiator, IceState, PeerSession, SessionFactory};
pub use protocol::{
    ConsumeResponse, IceCandidateInit, PeerMessage, ServerPush, SessionDescription,
    SignalingRequest, SignalingResponse, TransportResponse,
};
pub use server::{SignalingServer, DEFAULT_ENGINE_GRACE, RELAY_PATH};
