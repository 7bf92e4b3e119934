//! Audio frame and track types

use std::time::Duration;

/// Audio frame representation
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Audio samples (f32 PCM data, interleaved when multichannel)
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u8,
    /// Timestamp in milliseconds
    pub timestamp: u64,
}

impl AudioFrame {
    /// Mono frame
    pub fn mono(samples: Vec<f32>, sample_rate: u32, timestamp: u64) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
            timestamp,
        }
    }

    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Wall-clock length of the frame
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Average interleaved channels down to mono
    pub fn to_mono(&self) -> AudioFrame {
        if self.channels <= 1 {
            return self.clone();
        }
        let channels = self.channels as usize;
        let samples = self
            .samples
            .chunks_exact(channels)
            .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
            .collect();
        AudioFrame::mono(samples, self.sample_rate, self.timestamp)
    }
}

/// Where a track's audio comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    /// Local capture, after the DSP pipeline
    Local,
    /// Forwarded by the SFU from another peer
    Remote,
}

/// Audio track representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    /// Track ID
    pub id: String,
    /// Track source
    pub source: TrackSource,
}

impl AudioTrack {
    /// Create new audio track
    pub fn new(id: String, source: TrackSource) -> Self {
        Self { id, source }
    }

    /// Get track ID
    pub fn id(&self) -> &str {
        &self.id
    }
}
