//! Frequency-domain checks of the full DSP pipeline

use voxshift_media::{Pipeline, PipelineConfig, PipelineControls};

const SAMPLE_RATE: u32 = 48000;
const FRAME: usize = 960;
const TOLERANCE_HZ: f64 = 50.0;

/// Signal power at `freq` (Goertzel)
fn goertzel_power(samples: &[f32], freq: f64, sample_rate: f64) -> f64 {
    let coeff = 2.0 * (2.0 * std::f64::consts::PI * freq / sample_rate).cos();
    let (mut s1, mut s2) = (0.0f64, 0.0f64);
    for &x in samples {
        let s = x as f64 + coeff * s1 - s2;
        s2 = s1;
        s1 = s;
    }
    s1 * s1 + s2 * s2 - coeff * s1 * s2
}

/// Frequency with the most power between 80 Hz and 2 kHz
fn dominant_frequency(samples: &[f32]) -> f64 {
    let mut best = (0.0, f64::MIN);
    let mut freq = 80.0;
    while freq <= 2000.0 {
        let power = goertzel_power(samples, freq, SAMPLE_RATE as f64);
        if power > best.1 {
            best = (freq, power);
        }
        freq += 2.0;
    }
    best.0
}

fn tone(freq: f64, start: usize, len: usize) -> Vec<f32> {
    (start..start + len)
        .map(|i| {
            (0.5 * (2.0 * std::f64::consts::PI * freq * i as f64 / SAMPLE_RATE as f64).sin())
                as f32
        })
        .collect()
}

/// Run `seconds` of a tone through the pipeline, returning the output
fn run(pipeline: &mut Pipeline, freq: f64, seconds: f64, offset: usize) -> Vec<f32> {
    let total = (seconds * SAMPLE_RATE as f64) as usize / FRAME * FRAME;
    let input = tone(freq, offset, total);
    let mut output = vec![0.0; total];
    for (inp, out) in input.chunks(FRAME).zip(output.chunks_mut(FRAME)) {
        pipeline.process(inp, out).unwrap();
    }
    output
}

fn pipeline_with_factor(factor: f32) -> (Pipeline, PipelineControls) {
    let pipeline = Pipeline::new(PipelineConfig {
        pitch_factor: factor,
        ..Default::default()
    })
    .unwrap();
    let controls = pipeline.controls();
    (pipeline, controls)
}

fn assert_peak_near(samples: &[f32], expected: f64) {
    let peak = dominant_frequency(samples);
    assert!(
        (peak - expected).abs() <= TOLERANCE_HZ,
        "expected a peak near {} Hz, found {} Hz",
        expected,
        peak
    );
}

#[test]
fn test_unity_factor_keeps_440() {
    let (mut pipeline, _) = pipeline_with_factor(1.0);
    let output = run(&mut pipeline, 440.0, 1.5, 0);
    assert_peak_near(&output[12000..], 440.0);
}

#[test]
fn test_factor_scales_peak() {
    for factor in [0.5f32, 1.0, 1.5, 2.0] {
        let (mut pipeline, _) = pipeline_with_factor(factor);
        let output = run(&mut pipeline, 440.0, 1.5, 0);
        assert_peak_near(&output[12000..], 440.0 * factor as f64);
    }
}

#[test]
fn test_factor_update_applies_to_following_frames() {
    let (mut pipeline, controls) = pipeline_with_factor(1.0);
    let first = run(&mut pipeline, 440.0, 1.0, 0);
    assert_peak_near(&first[12000..], 440.0);

    controls.set_pitch_factor(1.5);
    let second = run(&mut pipeline, 440.0, 1.5, first.len());
    assert_peak_near(&second[12000..], 660.0);
}

#[test]
fn test_bypass_restores_input_pitch() {
    let (mut pipeline, controls) = pipeline_with_factor(2.0);
    controls.set_bypass(true);
    let output = run(&mut pipeline, 440.0, 1.0, 0);
    assert_peak_near(&output[12000..], 440.0);
}

#[test]
fn test_silence_stays_silent() {
    let (mut pipeline, _) = pipeline_with_factor(1.5);
    let input = vec![0.0f32; FRAME];
    let mut output = vec![1.0f32; FRAME];
    for _ in 0..10 {
        pipeline.process(&input, &mut output).unwrap();
    }
    assert!(output.iter().all(|s| s.abs() < 1e-6));
}

#[test]
fn test_realtime_budget_holds() {
    let (mut pipeline, controls) = pipeline_with_factor(1.5);
    run(&mut pipeline, 440.0, 1.0, 0);
    let stats = controls.stats();
    assert_eq!(stats.frames_processed, 50);
    // 20 ms budget per frame; a handful of scheduler hiccups is tolerated
    assert!(stats.overruns <= 2, "overruns: {}", stats.overruns);
}
