//! Noise gate with an attack/release envelope follower

use super::{db_to_linear, time_coefficient, AudioStage};
use crate::error::{MediaError, MediaResult};
use portable_atomic::AtomicF32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Live gate parameters
#[derive(Debug)]
pub struct GateParams {
    /// Open threshold in dBFS
    pub threshold_db: AtomicF32,
}

impl GateParams {
    /// Parameters with the given threshold
    pub fn new(threshold_db: f32) -> Self {
        Self {
            threshold_db: AtomicF32::new(threshold_db),
        }
    }

    /// Set the threshold; non-finite or positive values are ignored
    pub fn set_threshold_db(&self, db: f32) {
        if db.is_finite() && db <= 0.0 {
            self.threshold_db.store(db, Ordering::Relaxed);
        }
    }

    /// Current threshold in dBFS
    pub fn threshold_db(&self) -> f32 {
        self.threshold_db.load(Ordering::Relaxed)
    }
}

/// Silences input whose envelope stays below the threshold
#[derive(Debug)]
pub struct NoiseGate {
    params: Arc<GateParams>,
    attack: f32,
    release: f32,
    envelope: f32,
    gain: f32,
}

impl NoiseGate {
    /// Build a gate; times are in seconds
    pub fn new(
        params: Arc<GateParams>,
        sample_rate: u32,
        attack_s: f32,
        release_s: f32,
    ) -> MediaResult<Self> {
        if sample_rate == 0 {
            return Err(MediaError::StageConstruction {
                stage: "noise_gate",
                reason: "sample rate is zero".to_string(),
            });
        }
        for (label, value) in [("attack", attack_s), ("release", release_s)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(MediaError::StageConstruction {
                    stage: "noise_gate",
                    reason: format!("{} time must be positive, got {}", label, value),
                });
            }
        }

        Ok(Self {
            params,
            attack: time_coefficient(attack_s, sample_rate),
            release: time_coefficient(release_s, sample_rate),
            envelope: 0.0,
            gain: 0.0,
        })
    }

    /// Current gate gain in `[0, 1]`
    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl AudioStage for NoiseGate {
    fn name(&self) -> &'static str {
        "noise_gate"
    }

    fn process(&mut self, block: &mut [f32]) {
        let threshold = db_to_linear(self.params.threshold_db());

        for sample in block.iter_mut() {
            let level = sample.abs();
            let env_coeff = if level > self.envelope {
                self.attack
            } else {
                self.release
            };
            self.envelope = env_coeff * self.envelope + (1.0 - env_coeff) * level;

            let target = if self.envelope >= threshold { 1.0 } else { 0.0 };
            let gain_coeff = if target > self.gain {
                self.attack
            } else {
                self.release
            };
            self.gain = gain_coeff * self.gain + (1.0 - gain_coeff) * target;

            *sample *= self.gain;
        }
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
        self.gain = 0.0;
    }
}
