//! Time-domain pitch shifter
//!
//! Input is written into a circular delay line that two read taps sweep at a
//! rate scaled by the pitch factor. The taps sit half a window apart and are
//! weighted by complementary `sin²`/`cos²` windows, so whenever one tap wraps
//! around its gain is zero and the other carries the signal.

use super::AudioStage;
use crate::error::{MediaError, MediaResult};
use portable_atomic::AtomicF32;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Smallest accepted pitch factor
pub const MIN_PITCH_FACTOR: f32 = 0.1;

const MIN_WINDOW: usize = 64;
const MAX_WINDOW: usize = 1 << 16;

/// Live pitch parameters
#[derive(Debug)]
pub struct PitchParams {
    factor: AtomicF32,
    bypass: AtomicBool,
}

impl PitchParams {
    /// Parameters starting at `factor`
    pub fn new(factor: f32) -> Self {
        let params = Self {
            factor: AtomicF32::new(1.0),
            bypass: AtomicBool::new(false),
        };
        params.set_factor(factor);
        params
    }

    /// Set the pitch factor, clamped to at least [`MIN_PITCH_FACTOR`]
    ///
    /// Non-finite values are ignored. Returns the factor now in effect.
    pub fn set_factor(&self, factor: f32) -> f32 {
        if factor.is_finite() {
            self.factor
                .store(factor.max(MIN_PITCH_FACTOR), Ordering::Relaxed);
        }
        self.factor()
    }

    /// Current pitch factor
    pub fn factor(&self) -> f32 {
        self.factor.load(Ordering::Relaxed)
    }

    /// Current shift in semitones (`12 * log2(factor)`)
    pub fn semitones(&self) -> f32 {
        12.0 * self.factor().log2()
    }

    /// Route input straight through the stage
    pub fn set_bypass(&self, bypass: bool) {
        self.bypass.store(bypass, Ordering::Relaxed);
    }

    /// Whether the stage is bypassed
    pub fn is_bypassed(&self) -> bool {
        self.bypass.load(Ordering::Relaxed)
    }
}

/// Two-tap delay-line pitch shifter
#[derive(Debug)]
pub struct PitchShifter {
    params: Arc<PitchParams>,
    buffer: Vec<f32>,
    mask: usize,
    write_pos: usize,
    window: f64,
    phase: f64,
}

impl PitchShifter {
    /// Build a shifter with a sweep window of `window` samples
    pub fn new(params: Arc<PitchParams>, window: usize) -> MediaResult<Self> {
        if !(MIN_WINDOW..=MAX_WINDOW).contains(&window) {
            return Err(MediaError::StageConstruction {
                stage: "pitch_shift",
                reason: format!(
                    "window must be within {}..={} samples, got {}",
                    MIN_WINDOW, MAX_WINDOW, window
                ),
            });
        }

        // Room for the full window plus the interpolation guard
        let len = (window * 2).next_power_of_two();
        Ok(Self {
            params,
            buffer: vec![0.0; len],
            mask: len - 1,
            write_pos: 0,
            window: window as f64,
            phase: 0.0,
        })
    }

    /// Linear interpolated read `delay` samples behind the write head
    fn read(&self, delay: f64) -> f32 {
        let pos = self.write_pos as f64 - delay;
        let base = pos.floor();
        let frac = (pos - base) as f32;
        let len = self.buffer.len() as isize;
        let i0 = (base as isize).rem_euclid(len) as usize;
        let i1 = (i0 + 1) & self.mask;
        self.buffer[i0] * (1.0 - frac) + self.buffer[i1] * frac
    }
}

impl AudioStage for PitchShifter {
    fn name(&self) -> &'static str {
        "pitch_shift"
    }

    fn process(&mut self, block: &mut [f32]) {
        let bypass = self.params.is_bypassed();
        let step = (1.0 - self.params.factor() as f64) / self.window;

        for sample in block.iter_mut() {
            self.buffer[self.write_pos] = *sample;

            if !bypass {
                let phase_b = (self.phase + 0.5).fract();
                let gain_a = (PI * self.phase).sin().powi(2) as f32;
                let gain_b = 1.0 - gain_a;

                let tap_a = self.read(1.0 + self.phase * self.window);
                let tap_b = self.read(1.0 + phase_b * self.window);
                *sample = gain_a * tap_a + gain_b * tap_b;

                self.phase = (self.phase + step).rem_euclid(1.0);
            }

            self.write_pos = (self.write_pos + 1) & self.mask;
        }
    }

    fn reset(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor_clamp_and_semitones() {
        let params = PitchParams::new(0.01);
        assert_eq!(params.factor(), MIN_PITCH_FACTOR);

        assert_eq!(params.set_factor(2.0), 2.0);
        assert!((params.semitones() - 12.0).abs() < 1e-4);

        assert_eq!(params.set_factor(f32::INFINITY), 2.0);
        params.set_factor(1.0);
        assert_eq!(params.semitones(), 0.0);
    }

    #[test]
    fn test_window_validation() {
        let params = Arc::new(PitchParams::new(1.0));
        assert!(PitchShifter::new(params.clone(), 16).is_err());
        assert!(PitchShifter::new(params, 2048).is_ok());
    }

    #[test]
    fn test_unity_factor_is_a_pure_delay() {
        let params = Arc::new(PitchParams::new(1.0));
        let mut shifter = PitchShifter::new(params, 256).unwrap();
        let input: Vec<f32> = (0..2048).map(|i| ((i * 7) % 13) as f32 / 13.0).collect();
        let mut block = input.clone();
        shifter.process(&mut block);

        // tap B carries everything at phase 0, half a window plus one behind
        let delay = 1 + 128;
        for i in delay..block.len() {
            assert!((block[i] - input[i - delay]).abs() < 1e-5);
        }
    }

    #[test]
    fn test_bypass_leaves_audio_untouched() {
        let params = Arc::new(PitchParams::new(1.5));
        params.set_bypass(true);
        let mut shifter = PitchShifter::new(params, 512).unwrap();
        let input: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.01).sin()).collect();
        let mut block = input.clone();
        shifter.process(&mut block);
        assert_eq!(block, input);
    }
}
