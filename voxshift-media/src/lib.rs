//! # voxshift media
//!
//! Client-side audio: frames, the real-time pitch-shift pipeline and the
//! packetizer that turns processed frames into media packets. Microphone
//! capture is available behind the `capture` feature.

#![warn(clippy::all)]

#[cfg(feature = "capture")]
pub mod capture;
pub mod dsp;
pub mod error;
pub mod framing;
pub mod packetizer;
pub mod pipeline;
pub mod tracks;

// Re-export main types
#[cfg(feature = "capture")]
pub use capture::{list_input_devices, AudioCapture, CaptureConfig};
pub use dsp::{AudioStage, Biquad, FilterKind, NoiseGate, Passthrough, PitchShifter};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use framing::{frame_buffers, FrameAssembler, FrameRecycler};
pub use packetizer::{depacketize, depacketize_frame, Packetizer, DEFAULT_FRAME_SIZE};
pub use pipeline::{Pipeline, PipelineConfig, PipelineControls, PipelineStats};
pub use tracks::{AudioFrame, AudioTrack, TrackSource};
