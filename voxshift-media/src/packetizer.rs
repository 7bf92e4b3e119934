//! Conversion between processed audio frames and RTP-like media packets
//!
//! Payloads carry raw little-endian `f32` mono PCM. One packet holds one
//! frame (20 ms at 48 kHz by default).

use crate::error::{MediaError, MediaResult};
use crate::tracks::AudioFrame;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use voxshift_core::MediaPacket;

/// Samples per packet at 48 kHz
pub const DEFAULT_FRAME_SIZE: usize = 960;

/// Stamps outgoing frames with sequence numbers and RTP timestamps
#[derive(Debug, Clone)]
pub struct Packetizer {
    payload_type: u8,
    ssrc: u32,
    clock_rate: u32,
    sequence_number: u16,
    timestamp: u32,
}

impl Packetizer {
    /// Packetizer for one outgoing stream
    pub fn new(payload_type: u8, ssrc: u32, clock_rate: u32) -> Self {
        Self {
            payload_type,
            ssrc,
            clock_rate,
            sequence_number: rand::random(),
            timestamp: rand::random(),
        }
    }

    /// Start numbering from fixed values
    pub fn with_initial(mut self, sequence_number: u16, timestamp: u32) -> Self {
        self.sequence_number = sequence_number;
        self.timestamp = timestamp;
        self
    }

    /// Clock rate of the stream
    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    /// Wrap one mono frame
    pub fn packetize(&mut self, samples: &[f32]) -> MediaPacket {
        let mut payload = BytesMut::with_capacity(samples.len() * 4);
        for sample in samples {
            payload.put_f32_le(*sample);
        }

        let packet = MediaPacket {
            payload_type: self.payload_type,
            sequence_number: self.sequence_number,
            timestamp: self.timestamp,
            ssrc: self.ssrc,
            payload: payload.freeze(),
        };

        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(samples.len() as u32);
        packet
    }
}

/// Decode a packet payload back into samples
pub fn depacketize(payload: &Bytes) -> MediaResult<Vec<f32>> {
    if payload.len() % 4 != 0 {
        return Err(MediaError::MalformedPayload {
            reason: format!("{} bytes is not a whole number of f32 samples", payload.len()),
        });
    }
    let mut buf = payload.clone();
    let mut samples = Vec::with_capacity(payload.len() / 4);
    while buf.has_remaining() {
        samples.push(buf.get_f32_le());
    }
    Ok(samples)
}

/// Decode a packet into a mono frame, timestamped in milliseconds of stream time
pub fn depacketize_frame(packet: &MediaPacket, clock_rate: u32) -> MediaResult<AudioFrame> {
    let samples = depacketize(&packet.payload)?;
    let timestamp = if clock_rate == 0 {
        0
    } else {
        packet.timestamp as u64 * 1000 / clock_rate as u64
    };
    Ok(AudioFrame::mono(samples, clock_rate, timestamp))
}
