//! Local and remote audio tracks

use crate::error::SessionResult;
use tracing::{debug, info, warn};
use voxshift_core::{Consumer, Producer};
use voxshift_media::{
    depacketize_frame, AudioFrame, AudioTrack, Packetizer, Pipeline, PipelineControls,
    TrackSource,
};

/// Audio published by this peer
///
/// Every frame goes through the pitch-shift pipeline before it is
/// packetized and handed to the producer.
#[derive(Debug)]
pub struct LocalTrack {
    track: AudioTrack,
    pipeline: Pipeline,
    packetizer: Packetizer,
    producer: Producer,
    output: Vec<f32>,
    frames_sent: u64,
}

impl LocalTrack {
    pub(crate) fn new(pipeline: Pipeline, packetizer: Packetizer, producer: Producer) -> Self {
        let frame_size = pipeline.config().frame_size;
        info!(
            "Local audio track {} ready ({} samples per frame)",
            producer.id(),
            frame_size
        );
        Self {
            track: AudioTrack::new(producer.id().to_string(), TrackSource::Local),
            pipeline,
            packetizer,
            producer,
            output: vec![0.0; frame_size],
            frames_sent: 0,
        }
    }

    /// Get track ID
    pub fn id(&self) -> &str {
        self.track.id()
    }

    /// Track descriptor
    pub fn track(&self) -> &AudioTrack {
        &self.track
    }

    /// Server-side producer id
    pub fn producer_id(&self) -> &str {
        self.producer.id()
    }

    /// Handle for changing pitch, bypass and filters while the track runs
    pub fn controls(&self) -> PipelineControls {
        self.pipeline.controls()
    }

    /// Samples expected per call to [`LocalTrack::send_frame`]
    pub fn frame_size(&self) -> usize {
        self.output.len()
    }

    /// Frames handed to the producer so far
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Process one mono frame and send it
    pub fn send_frame(&mut self, samples: &[f32]) -> SessionResult<()> {
        self.pipeline.process(samples, &mut self.output)?;
        let packet = self.packetizer.packetize(&self.output);
        self.producer.send(packet)?;
        self.frames_sent += 1;
        Ok(())
    }

    /// Whether the producer has been closed
    pub fn is_closed(&self) -> bool {
        self.producer.is_closed()
    }
}

/// Audio forwarded from another peer; clones share the same consumer
#[derive(Debug, Clone)]
pub struct RemoteTrack {
    track: AudioTrack,
    consumer: Consumer,
    clock_rate: u32,
}

impl RemoteTrack {
    pub(crate) fn new(consumer: Consumer) -> Self {
        let clock_rate = consumer
            .rtp_parameters()
            .codecs
            .first()
            .map(|c| c.clock_rate)
            .unwrap_or(48000);
        debug!(
            "Remote track {} for producer {}",
            consumer.id(),
            consumer.producer_id()
        );
        Self {
            track: AudioTrack::new(consumer.id().to_string(), TrackSource::Remote),
            consumer,
            clock_rate,
        }
    }

    /// Get track ID
    pub fn id(&self) -> &str {
        self.track.id()
    }

    /// Track descriptor
    pub fn track(&self) -> &AudioTrack {
        &self.track
    }

    /// Server-side consumer id
    pub fn consumer_id(&self) -> &str {
        self.consumer.id()
    }

    /// Producer this track is fed from
    pub fn producer_id(&self) -> &str {
        self.consumer.producer_id()
    }

    /// Whether the track has ended
    pub fn is_ended(&self) -> bool {
        self.consumer.is_closed()
    }

    /// Next decoded frame, or `None` once the track has ended
    ///
    /// Packets whose payload cannot be decoded are skipped.
    pub async fn recv_frame(&self) -> Option<AudioFrame> {
        loop {
            let packet = self.consumer.recv().await?;
            match depacketize_frame(&packet, self.clock_rate) {
                Ok(frame) => return Some(frame),
                Err(e) => warn!("Dropping packet on track {}: {}", self.id(), e),
            }
        }
    }
}
