//! Second-order high-pass and low-pass filters (RBJ cookbook)

use super::AudioStage;
use crate::error::{MediaError, MediaResult};
use portable_atomic::AtomicF32;
use std::f64::consts::PI;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Filter response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Removes content below the cutoff
    HighPass,
    /// Removes content above the cutoff
    LowPass,
}

impl FilterKind {
    fn stage_name(self) -> &'static str {
        match self {
            FilterKind::HighPass => "highpass",
            FilterKind::LowPass => "lowpass",
        }
    }
}

/// Live filter parameters
#[derive(Debug)]
pub struct FilterParams {
    cutoff_hz: AtomicF32,
    q: AtomicF32,
}

impl FilterParams {
    /// Parameters with the given cutoff and Q
    pub fn new(cutoff_hz: f32, q: f32) -> Self {
        Self {
            cutoff_hz: AtomicF32::new(cutoff_hz),
            q: AtomicF32::new(q),
        }
    }

    /// Set the cutoff frequency in Hz
    ///
    /// Values the filter cannot realize are ignored when the next block is
    /// processed; the previous response stays in place.
    pub fn set_cutoff_hz(&self, hz: f32) {
        self.cutoff_hz.store(hz, Ordering::Relaxed);
    }

    /// Set the resonance
    pub fn set_q(&self, q: f32) {
        self.q.store(q, Ordering::Relaxed);
    }

    /// Requested cutoff frequency
    pub fn cutoff_hz(&self) -> f32 {
        self.cutoff_hz.load(Ordering::Relaxed)
    }

    /// Requested resonance
    pub fn q(&self) -> f32 {
        self.q.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
struct Coefficients {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

/// Which half of a parameter pair the filter cannot realize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unrealizable {
    Cutoff,
    Q,
}

impl Coefficients {
    /// Allocation-free check, safe to call from the audio thread
    fn check(sample_rate: u32, cutoff_hz: f32, q: f32) -> Result<(), Unrealizable> {
        let nyquist = sample_rate as f32 / 2.0;
        if !cutoff_hz.is_finite() || cutoff_hz <= 0.0 || cutoff_hz >= nyquist {
            return Err(Unrealizable::Cutoff);
        }
        if !q.is_finite() || q <= 0.0 {
            return Err(Unrealizable::Q);
        }
        Ok(())
    }

    fn design(kind: FilterKind, sample_rate: u32, cutoff_hz: f32, q: f32) -> MediaResult<Self> {
        match Self::check(sample_rate, cutoff_hz, q) {
            Ok(()) => Ok(Self::compute(kind, sample_rate, cutoff_hz, q)),
            Err(Unrealizable::Cutoff) => Err(MediaError::StageConstruction {
                stage: kind.stage_name(),
                reason: format!(
                    "cutoff {} Hz outside (0, {}) at {} Hz",
                    cutoff_hz,
                    sample_rate as f32 / 2.0,
                    sample_rate
                ),
            }),
            Err(Unrealizable::Q) => Err(MediaError::StageConstruction {
                stage: kind.stage_name(),
                reason: format!("Q must be positive, got {}", q),
            }),
        }
    }

    /// Coefficients for a pair that passed [`Coefficients::check`]
    fn compute(kind: FilterKind, sample_rate: u32, cutoff_hz: f32, q: f32) -> Self {
        let w0 = 2.0 * PI * cutoff_hz as f64 / sample_rate as f64;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q as f64);
        let a0 = 1.0 + alpha;

        let (b0, b1, b2) = match kind {
            FilterKind::HighPass => {
                let b = (1.0 + cos_w0) / 2.0;
                (b, -(1.0 + cos_w0), b)
            }
            FilterKind::LowPass => {
                let b = (1.0 - cos_w0) / 2.0;
                (b, 1.0 - cos_w0, b)
            }
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

/// Biquad filter stage (transposed direct form II)
#[derive(Debug)]
pub struct Biquad {
    kind: FilterKind,
    params: Arc<FilterParams>,
    sample_rate: u32,
    coefficients: Coefficients,
    applied: (f32, f32),
    rejected: Option<(f32, f32)>,
    z1: f64,
    z2: f64,
}

impl Biquad {
    /// Build a filter from the current parameter values
    pub fn new(kind: FilterKind, params: Arc<FilterParams>, sample_rate: u32) -> MediaResult<Self> {
        let applied = (params.cutoff_hz(), params.q());
        let coefficients = Coefficients::design(kind, sample_rate, applied.0, applied.1)?;
        Ok(Self {
            kind,
            params,
            sample_rate,
            coefficients,
            applied,
            rejected: None,
            z1: 0.0,
            z2: 0.0,
        })
    }

    /// Filter response
    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    /// Cutoff and Q the current coefficients were designed for
    pub fn applied(&self) -> (f32, f32) {
        self.applied
    }

    /// Pick up new parameters without allocating
    fn refresh(&mut self) {
        let requested = (self.params.cutoff_hz(), self.params.q());
        if requested == self.applied || Some(requested) == self.rejected {
            return;
        }
        match Coefficients::check(self.sample_rate, requested.0, requested.1) {
            Ok(()) => {
                self.coefficients =
                    Coefficients::compute(self.kind, self.sample_rate, requested.0, requested.1);
                self.applied = requested;
                self.rejected = None;
            }
            Err(_) => self.rejected = Some(requested),
        }
    }
}

impl AudioStage for Biquad {
    fn name(&self) -> &'static str {
        self.kind.stage_name()
    }

    fn process(&mut self, block: &mut [f32]) {
        self.refresh();
        let c = self.coefficients;

        for sample in block.iter_mut() {
            let x = *sample as f64;
            let y = c.b0 * x + self.z1;
            self.z1 = c.b1 * x - c.a1 * y + self.z2;
            self.z2 = c.b2 * x - c.a2 * y;
            *sample = y as f32;
        }
    }

    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rms_after_filter(filter: &mut Biquad, freq: f32) -> f32 {
        let mut block: Vec<f32> = (0..48000)
            .map(|i| (2.0 * PI * freq as f64 * i as f64 / 48000.0).sin() as f32)
            .collect();
        filter.process(&mut block);
        let tail = &block[24000..];
        (tail.iter().map(|s| s * s).sum::<f32>() / tail.len() as f32).sqrt()
    }

    #[test]
    fn test_highpass_attenuates_rumble() {
        let params = Arc::new(FilterParams::new(105.0, 0.7));
        let mut hp = Biquad::new(FilterKind::HighPass, params, 48000).unwrap();
        let low = rms_after_filter(&mut hp, 30.0);
        hp.reset();
        let mid = rms_after_filter(&mut hp, 1000.0);
        assert!(low < 0.1);
        assert!(mid > 0.65);
    }

    #[test]
    fn test_lowpass_attenuates_highs() {
        let params = Arc::new(FilterParams::new(3450.0, 0.55));
        let mut lp = Biquad::new(FilterKind::LowPass, params, 48000).unwrap();
        let high = rms_after_filter(&mut lp, 12000.0);
        lp.reset();
        let mid = rms_after_filter(&mut lp, 440.0);
        assert!(high < 0.1);
        assert!(mid > 0.65);
    }

    #[test]
    fn test_cutoff_at_nyquist_rejected() {
        let params = Arc::new(FilterParams::new(24000.0, 0.7));
        assert!(Biquad::new(FilterKind::LowPass, params, 48000).is_err());
        let params = Arc::new(FilterParams::new(1000.0, 0.0));
        assert!(Biquad::new(FilterKind::HighPass, params, 48000).is_err());
    }

    #[test]
    fn test_invalid_runtime_update_keeps_previous_response() {
        let params = Arc::new(FilterParams::new(105.0, 0.7));
        let mut hp = Biquad::new(FilterKind::HighPass, params.clone(), 48000).unwrap();

        params.set_cutoff_hz(200.0);
        hp.process(&mut [0.0; 16]);
        assert_eq!(hp.applied(), (200.0, 0.7));

        params.set_cutoff_hz(30000.0);
        hp.process(&mut [0.0; 16]);
        assert_eq!(hp.applied(), (200.0, 0.7));
    }

    #[test]
    fn test_rejected_update_leaves_output_unchanged() {
        let params = Arc::new(FilterParams::new(3450.0, 0.55));
        let mut reference = Biquad::new(FilterKind::LowPass, params.clone(), 48000).unwrap();
        let other = Arc::new(FilterParams::new(3450.0, 0.55));
        let mut updated = Biquad::new(FilterKind::LowPass, other.clone(), 48000).unwrap();

        for bad in [f32::NAN, -5.0, 0.0, 24000.0, f32::INFINITY] {
            other.set_cutoff_hz(bad);
            let mut a: Vec<f32> = (0..64).map(|i| (i as f32 * 0.37).sin()).collect();
            let mut b = a.clone();
            reference.process(&mut a);
            updated.process(&mut b);
            assert_eq!(a, b);
            assert_eq!(updated.applied(), (3450.0, 0.55));
        }

        other.set_q(-1.0);
        other.set_cutoff_hz(3450.0);
        updated.process(&mut [0.0; 8]);
        assert_eq!(updated.applied(), (3450.0, 0.55));

        other.set_q(0.55);
        other.set_cutoff_hz(2000.0);
        updated.process(&mut [0.0; 8]);
        assert_eq!(updated.applied(), (2000.0, 0.55));
        assert_eq!(params.cutoff_hz(), 3450.0);
    }
}
