//! The pitch-shift DSP chain
//!
//! Fixed order: noise gate, pitch shift, high-pass, low-pass. The pipeline
//! itself lives on the audio thread; [`PipelineControls`] is the cloneable
//! control-side handle sharing the stages' parameter cells and counters.

use crate::dsp::{
    AudioStage, Biquad, FilterKind, FilterParams, GateParams, NoiseGate, Passthrough,
    PitchParams, PitchShifter,
};
use crate::error::{MediaError, MediaResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// DSP chain settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Operating sample rate in Hz
    pub sample_rate: u32,
    /// Samples per processed frame
    pub frame_size: usize,
    /// Gate open threshold in dBFS
    pub gate_threshold_db: f32,
    /// Gate attack in seconds
    pub gate_attack: f32,
    /// Gate release in seconds
    pub gate_release: f32,
    /// Pitch shifter sweep window in samples
    pub pitch_window: usize,
    /// Initial pitch factor
    pub pitch_factor: f32,
    /// High-pass cutoff in Hz
    pub highpass_hz: f32,
    /// High-pass resonance
    pub highpass_q: f32,
    /// Low-pass cutoff in Hz
    pub lowpass_hz: f32,
    /// Low-pass resonance
    pub lowpass_q: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            frame_size: 960,
            gate_threshold_db: -45.0,
            gate_attack: 0.003,
            gate_release: 0.25,
            pitch_window: 2048,
            pitch_factor: 1.0,
            highpass_hz: 105.0,
            highpass_q: 0.7,
            lowpass_hz: 3450.0,
            lowpass_q: 0.55,
        }
    }
}

impl PipelineConfig {
    /// Real-time budget for one frame
    pub fn frame_budget(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_size as f64 / self.sample_rate as f64)
    }
}

#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    overruns: AtomicU64,
    last_process_ns: AtomicU64,
    peak_process_ns: AtomicU64,
}

/// Snapshot of pipeline counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStats {
    /// Frames processed
    pub frames_processed: u64,
    /// Frames that took longer than their real-time budget
    pub overruns: u64,
    /// Processing time of the last frame
    pub last_process_time: Duration,
    /// Slowest frame seen
    pub peak_process_time: Duration,
}

/// Control-side handle to a running pipeline
#[derive(Debug, Clone)]
pub struct PipelineControls {
    gate: Arc<GateParams>,
    pitch: Arc<PitchParams>,
    highpass: Arc<FilterParams>,
    lowpass: Arc<FilterParams>,
    counters: Arc<Counters>,
    degraded: Arc<Vec<&'static str>>,
}

impl PipelineControls {
    /// Set the pitch factor (clamped to at least 0.1); returns the value in effect
    pub fn set_pitch_factor(&self, factor: f32) -> f32 {
        self.pitch.set_factor(factor)
    }

    /// Current pitch factor
    pub fn pitch_factor(&self) -> f32 {
        self.pitch.factor()
    }

    /// Current shift in semitones
    pub fn semitones(&self) -> f32 {
        self.pitch.semitones()
    }

    /// Bypass the pitch stage
    pub fn set_bypass(&self, bypass: bool) {
        self.pitch.set_bypass(bypass);
    }

    /// Whether the pitch stage is bypassed
    pub fn is_bypassed(&self) -> bool {
        self.pitch.is_bypassed()
    }

    /// Gate threshold in dBFS
    pub fn set_gate_threshold_db(&self, db: f32) {
        self.gate.set_threshold_db(db);
    }

    /// High-pass cutoff in Hz
    pub fn set_highpass_hz(&self, hz: f32) {
        self.highpass.set_cutoff_hz(hz);
    }

    /// Low-pass cutoff in Hz
    pub fn set_lowpass_hz(&self, hz: f32) {
        self.lowpass.set_cutoff_hz(hz);
    }

    /// Stages that fell back to passthrough at construction
    pub fn degraded_stages(&self) -> &[&'static str] {
        &self.degraded
    }

    /// Counter snapshot
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            frames_processed: self.counters.frames.load(Ordering::Relaxed),
            overruns: self.counters.overruns.load(Ordering::Relaxed),
            last_process_time: Duration::from_nanos(
                self.counters.last_process_ns.load(Ordering::Relaxed),
            ),
            peak_process_time: Duration::from_nanos(
                self.counters.peak_process_ns.load(Ordering::Relaxed),
            ),
        }
    }
}

/// Noise gate, pitch shifter and band shaping over fixed-size mono frames
pub struct Pipeline {
    config: PipelineConfig,
    stages: Vec<Box<dyn AudioStage>>,
    controls: PipelineControls,
    budget: Duration,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("frame_size", &self.config.frame_size)
            .finish()
    }
}

fn or_passthrough<S: AudioStage + 'static>(
    stage: &'static str,
    built: MediaResult<S>,
    degraded: &mut Vec<&'static str>,
) -> Box<dyn AudioStage> {
    match built {
        Ok(stage) => Box::new(stage),
        Err(e) => {
            warn!("DSP stage {} unavailable, passing audio through: {}", stage, e);
            degraded.push(stage);
            Box::new(Passthrough::new(stage))
        }
    }
}

impl Pipeline {
    /// Build the chain
    ///
    /// Only a config that cannot describe a frame at all is an error; a stage
    /// that fails to build is replaced by a passthrough and reported through
    /// [`PipelineControls::degraded_stages`].
    pub fn new(config: PipelineConfig) -> MediaResult<Self> {
        if config.sample_rate == 0 || config.frame_size == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: format!(
                    "sample rate {} and frame size {} must be non-zero",
                    config.sample_rate, config.frame_size
                ),
            });
        }

        let gate = Arc::new(GateParams::new(config.gate_threshold_db));
        let pitch = Arc::new(PitchParams::new(config.pitch_factor));
        let highpass = Arc::new(FilterParams::new(config.highpass_hz, config.highpass_q));
        let lowpass = Arc::new(FilterParams::new(config.lowpass_hz, config.lowpass_q));

        let mut degraded = Vec::new();
        let stages: Vec<Box<dyn AudioStage>> = vec![
            or_passthrough(
                "noise_gate",
                NoiseGate::new(
                    gate.clone(),
                    config.sample_rate,
                    config.gate_attack,
                    config.gate_release,
                ),
                &mut degraded,
            ),
            or_passthrough(
                "pitch_shift",
                PitchShifter::new(pitch.clone(), config.pitch_window),
                &mut degraded,
            ),
            or_passthrough(
                "highpass",
                Biquad::new(FilterKind::HighPass, highpass.clone(), config.sample_rate),
                &mut degraded,
            ),
            or_passthrough(
                "lowpass",
                Biquad::new(FilterKind::LowPass, lowpass.clone(), config.sample_rate),
                &mut degraded,
            ),
        ];

        info!(
            "DSP pipeline ready: {} Hz, {} samples/frame, pitch factor {}",
            config.sample_rate,
            config.frame_size,
            pitch.factor()
        );

        Ok(Self {
            budget: config.frame_budget(),
            config,
            stages,
            controls: PipelineControls {
                gate,
                pitch,
                highpass,
                lowpass,
                counters: Arc::new(Counters::default()),
                degraded: Arc::new(degraded),
            },
        })
    }

    /// Control-side handle
    pub fn controls(&self) -> PipelineControls {
        self.controls.clone()
    }

    /// Configuration the pipeline was built with
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stage names in processing order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Process one frame from `input` into `output`
    ///
    /// Both slices must hold exactly one frame. Does not allocate.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> MediaResult<()> {
        let frame_size = self.config.frame_size;
        if input.len() != frame_size || output.len() != frame_size {
            return Err(MediaError::InvalidFrameData {
                expected: frame_size,
                actual: if input.len() != frame_size {
                    input.len()
                } else {
                    output.len()
                },
            });
        }

        let started = Instant::now();
        output.copy_from_slice(input);
        self.run_stages(output);
        self.record(started.elapsed());
        Ok(())
    }

    /// Process one frame in place
    pub fn process_in_place(&mut self, frame: &mut [f32]) -> MediaResult<()> {
        if frame.len() != self.config.frame_size {
            return Err(MediaError::InvalidFrameData {
                expected: self.config.frame_size,
                actual: frame.len(),
            });
        }
        let started = Instant::now();
        self.run_stages(frame);
        self.record(started.elapsed());
        Ok(())
    }

    fn run_stages(&mut self, block: &mut [f32]) {
        for stage in self.stages.iter_mut() {
            stage.process(block);
        }
    }

    fn record(&self, elapsed: Duration) {
        let counters = &self.controls.counters;
        let nanos = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        counters.frames.fetch_add(1, Ordering::Relaxed);
        counters.last_process_ns.store(nanos, Ordering::Relaxed);
        counters.peak_process_ns.fetch_max(nanos, Ordering::Relaxed);
        if elapsed > self.budget {
            counters.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Clear every stage's state
    pub fn reset(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.reset();
        }
    }
}
