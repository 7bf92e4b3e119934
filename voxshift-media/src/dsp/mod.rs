//! Real-time audio stages
//!
//! Every stage processes mono `f32` blocks in place and reads its parameters
//! from atomics shared with the control side, so an update lands on the next
//! processed block without locking the audio thread.

pub mod biquad;
pub mod gate;
pub mod pitch;

pub use biquad::{Biquad, FilterKind, FilterParams};
pub use gate::{GateParams, NoiseGate};
pub use pitch::{PitchParams, PitchShifter, MIN_PITCH_FACTOR};

/// A stateful transform in the DSP chain
pub trait AudioStage: Send {
    /// Short stage name used in logs and stats
    fn name(&self) -> &'static str;

    /// Process one block in place
    fn process(&mut self, block: &mut [f32]);

    /// Clear internal state (delay lines, envelopes, filter memory)
    fn reset(&mut self);
}

/// Stage that leaves audio untouched
///
/// Stands in for a stage that could not be built.
#[derive(Debug, Clone)]
pub struct Passthrough {
    name: &'static str,
}

impl Passthrough {
    /// Passthrough reporting itself as `name`
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl AudioStage for Passthrough {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&mut self, _block: &mut [f32]) {}

    fn reset(&mut self) {}
}

/// Convert decibels full scale to linear amplitude
pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// One-pole smoothing coefficient for a time constant
pub(crate) fn time_coefficient(seconds: f32, sample_rate: u32) -> f32 {
    (-1.0 / (seconds * sample_rate as f32)).exp()
}
