//! Microphone capture through cpal, feeding the DSP pipeline
//!
//! The input callback downmixes to mono, fills one pooled frame buffer, runs
//! the pipeline on it and hands the result to the async side over a bounded
//! channel. Frames are dropped when the consumer falls behind or holds on to
//! every pooled buffer; give delivered frames back through
//! [`AudioCapture::recycler`].

use crate::error::{MediaError, MediaResult};
use crate::framing::{frame_buffers, FrameRecycler};
use crate::pipeline::{Pipeline, PipelineControls};
use crate::tracks::AudioFrame;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Capture settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Input device name, default device when `None`
    pub device_name: Option<String>,
    /// Device channel count
    pub channels: u16,
    /// Frames buffered towards the async side
    pub queue_depth: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            channels: 1,
            queue_depth: 16,
        }
    }
}

/// Names of the available input devices
pub fn list_input_devices() -> MediaResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| MediaError::DeviceEnumerationFailed {
            reason: format!("Failed to enumerate input devices: {}", e),
        })?;
    Ok(devices
        .map(|d| d.name().unwrap_or_else(|_| "Unknown Device".to_string()))
        .collect())
}

/// A running capture stream
///
/// Dropping it (or calling [`AudioCapture::stop`]) stops the device and
/// releases the pipeline with its stage buffers.
pub struct AudioCapture {
    stream: cpal::Stream,
    controls: PipelineControls,
    recycler: FrameRecycler,
    dropped: Arc<AtomicU64>,
}

impl AudioCapture {
    /// Open the input device and start processing
    pub fn start(
        config: CaptureConfig,
        mut pipeline: Pipeline,
    ) -> MediaResult<(Self, mpsc::Receiver<AudioFrame>)> {
        let host = cpal::default_host();
        let device = if let Some(device_name) = &config.device_name {
            host.input_devices()
                .map_err(|e| MediaError::DeviceEnumerationFailed {
                    reason: format!("Failed to enumerate devices: {}", e),
                })?
                .find(|d| d.name().unwrap_or_default() == *device_name)
                .ok_or_else(|| MediaError::DeviceNotFound {
                    device_id: device_name.clone(),
                })?
        } else {
            host.default_input_device()
                .ok_or_else(|| MediaError::DeviceNotFound {
                    device_id: "default input device".to_string(),
                })?
        };

        let sample_rate = pipeline.config().sample_rate;
        let frame_size = pipeline.config().frame_size;
        let channels = config.channels.max(1) as usize;
        ensure_rate_supported(&device, sample_rate, channels)?;
        let stream_config = cpal::StreamConfig {
            channels: channels as cpal::ChannelCount,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let queue_depth = config.queue_depth.max(1);
        let (sender, receiver) = mpsc::channel::<AudioFrame>(queue_depth);
        let controls = pipeline.controls();
        let dropped = Arc::new(AtomicU64::new(0));
        let callback_dropped = dropped.clone();

        // every queued frame plus one held by the consumer
        let (mut assembler, recycler) = frame_buffers(frame_size, queue_depth + 1);
        let callback_recycler = recycler.clone();
        let mut captured: u64 = 0;

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for chunk in data.chunks_exact(channels) {
                        if !assembler.push(chunk.iter().sum::<f32>() / channels as f32) {
                            continue;
                        }

                        let processed = pipeline.process_in_place(assembler.pending_mut()).is_ok();
                        let timestamp = captured * 1000 / sample_rate as u64;
                        captured += frame_size as u64;

                        let Some(samples) = assembler.take_frame() else {
                            callback_dropped.fetch_add(1, Ordering::Relaxed);
                            continue;
                        };
                        if !processed {
                            callback_recycler.recycle_samples(samples);
                            continue;
                        }
                        let frame = AudioFrame::mono(samples, sample_rate, timestamp);
                        if let Err(e) = sender.try_send(frame) {
                            callback_dropped.fetch_add(1, Ordering::Relaxed);
                            callback_recycler.recycle(e.into_inner());
                        }
                    }
                },
                move |err| {
                    warn!("Audio capture stream error: {}", err);
                },
                None,
            )
            .map_err(|e| MediaError::Audio {
                message: format!("Failed to build input stream: {}", e),
            })?;

        stream.play().map_err(|e| MediaError::Audio {
            message: format!("Failed to start stream: {}", e),
        })?;

        info!(
            "Audio capture started at {} Hz, {} channel(s)",
            sample_rate, channels
        );

        Ok((
            Self {
                stream,
                controls,
                recycler,
                dropped,
            },
            receiver,
        ))
    }

    /// Control handle of the pipeline running inside the callback
    pub fn controls(&self) -> &PipelineControls {
        &self.controls
    }

    /// Handle for giving delivered frames back to the capture buffer pool
    pub fn recycler(&self) -> FrameRecycler {
        self.recycler.clone()
    }

    /// Frames dropped because the receiver was full or the pool ran dry
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop the device and tear down the pipeline
    pub fn stop(self) -> MediaResult<()> {
        self.stream.pause().map_err(|e| MediaError::Audio {
            message: format!("Failed to stop stream: {}", e),
        })?;
        info!("Audio capture stopped");
        Ok(())
    }
}

/// Fail with `SampleRateMismatch` unless the device can run at `sample_rate`
fn ensure_rate_supported(
    device: &cpal::Device,
    sample_rate: u32,
    channels: usize,
) -> MediaResult<()> {
    let supported = device
        .supported_input_configs()
        .map_err(|e| MediaError::DeviceEnumerationFailed {
            reason: format!("Failed to query input configs: {}", e),
        })?
        .any(|range| {
            range.channels() as usize == channels
                && range.min_sample_rate().0 <= sample_rate
                && sample_rate <= range.max_sample_rate().0
        });
    if supported {
        return Ok(());
    }

    let actual = device
        .default_input_config()
        .map(|c| c.sample_rate().0)
        .unwrap_or(0);
    Err(MediaError::SampleRateMismatch {
        expected: sample_rate,
        actual,
    })
}
