//! End-to-end signal path: profile → synthesis → bandpass → self-sync.
//!
//! These tests exercise the public free functions the control loop is built
//! from, without the loop itself.
//!
//! Run with: `cargo test --test dsp_pipeline`

use std::f64::consts::PI;

use approx::assert_abs_diff_eq;

use harmonic_field_core::array::{ArrayElement, ArrayGeometry, ArrayModel, HarmonicWeight};
use harmonic_field_core::config::SelfSyncConfig;
use harmonic_field_core::filter::{self, BandpassFilter};
use harmonic_field_core::profile::{PhaseProfile, PhaseStrategy};
use harmonic_field_core::synth::{self, WaveformSet};
use harmonic_field_core::sync::SelfSyncCorrector;
use harmonic_field_core::HarmonicError;

// ─── helpers ─────────────────────────────────────────────────────────────────

const SAMPLE_RATE: f64 = 48_000.0;
const BASE: f64 = 1_000.0;

/// One unit-amplitude element at phase 0 carrying the 1-2-3 harmonic stack.
fn three_harmonic_tone(duration: f64) -> Vec<f64> {
    let elements = [ArrayElement::new(0, 1.0)];
    let profile = PhaseProfile::from_pairs([(0, 0.0)]);
    let set = synth::synthesize(
        &elements,
        &profile,
        &HarmonicWeight::uniform(&[1.0, 2.0, 3.0]),
        BASE,
        SAMPLE_RATE,
        duration,
    )
    .unwrap();
    set.get(0).unwrap().samples().to_vec()
}

fn pure_tone(frequency: f64, amplitude: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| amplitude * (2.0 * PI * frequency * i as f64 / SAMPLE_RATE).sin())
        .collect()
}

/// Largest deviation between two signals, ignoring `margin` samples at each end.
fn interior_error(a: &[f64], b: &[f64], margin: usize) -> f64 {
    a[margin..a.len() - margin]
        .iter()
        .zip(&b[margin..b.len() - margin])
        .fold(0.0, |acc, (x, y)| f64::max(acc, (x - y).abs()))
}

fn grid_set(geometry: ArrayGeometry, strategy: PhaseStrategy, k: f64) -> WaveformSet {
    let model = ArrayModel::uniform(geometry, 1.0, 1.0).unwrap();
    let profile = PhaseProfile::generate(&geometry, strategy, k).unwrap();
    synth::synthesize(
        &model.get_snapshot(),
        &profile,
        &[HarmonicWeight::new(1.0, 1.0)],
        BASE,
        SAMPLE_RATE,
        0.01,
    )
    .unwrap()
}

// ─── test 1: fundamental isolation ───────────────────────────────────────────

/// Bandpassing the 1-2-3 stack around its fundamental leaves a single tone at
/// one third of the element amplitude, in phase with the input.
#[test]
fn test_bandpass_isolates_fundamental() {
    let signal = three_harmonic_tone(0.5);
    assert_eq!(signal.len(), 24_000);

    let filtered = filter::bandpass(&signal, BASE, 400.0, SAMPLE_RATE).unwrap();
    let expected = pure_tone(BASE, 1.0 / 3.0, signal.len());
    let err = interior_error(&filtered, &expected, 2_400);
    assert!(err < 0.01, "fundamental deviates by {}", err);

    let kept = synth::energy(&filtered[2_400..21_600]);
    let reference = synth::energy(&expected[2_400..21_600]);
    assert_abs_diff_eq!(kept / reference, 1.0, epsilon = 0.02);
}

// ─── test 2: second harmonic isolation ───────────────────────────────────────

/// The same stack filtered around 2 kHz yields only the second harmonic.
#[test]
fn test_bandpass_isolates_second_harmonic() {
    let signal = three_harmonic_tone(0.5);
    let filtered = filter::bandpass(&signal, 2.0 * BASE, 400.0, SAMPLE_RATE).unwrap();
    let expected = pure_tone(2.0 * BASE, 1.0 / 3.0, signal.len());
    let err = interior_error(&filtered, &expected, 2_400);
    assert!(err < 0.01, "second harmonic deviates by {}", err);
}

// ─── test 3: band validation reaches callers ─────────────────────────────────

/// A band reaching Nyquist is refused before any filtering happens.
#[test]
fn test_band_above_nyquist_rejected() {
    let signal = three_harmonic_tone(0.01);
    let err = filter::bandpass(&signal, 23_900.0, 400.0, SAMPLE_RATE).unwrap_err();
    assert!(matches!(err, HarmonicError::InvalidBand { .. }), "{:?}", err);
    assert!(BandpassFilter::design(BASE, 0.0, SAMPLE_RATE).is_err());
}

// ─── test 4: self-sync bound on synthesized output ───────────────────────────

/// Default self-sync never pushes a buffer beyond 1.25× its original peak.
#[test]
fn test_self_sync_respects_peak_bound() {
    let corrector = SelfSyncCorrector::new(&SelfSyncConfig::default()).unwrap();
    let set = grid_set(ArrayGeometry::square(3), PhaseStrategy::FocusCenter, PI / 4.0);
    let corrected = corrector.correct_set(&set).unwrap();

    assert_eq!(corrected.len(), set.len());
    assert_eq!(corrected.sample_count(), set.sample_count());
    for id in set.ids() {
        let before = set.get(id).unwrap().peak();
        let after = corrected.get(id).unwrap().peak();
        assert!(after <= 1.25 * before + 1e-9, "element {}: {} > 1.25 × {}", id, after, before);
        assert!(after > before, "element {} was not corrected", id);
    }
}

// ─── test 5: interference ────────────────────────────────────────────────────

/// In-phase neighbours double; a checkerboard pair at `π` cancels.
#[test]
fn test_superpose_in_phase_and_anti_phase() {
    let in_phase = grid_set(ArrayGeometry::line(2), PhaseStrategy::AlternatingNull, 0.0);
    let a = in_phase.get(0).unwrap().samples();
    let b = in_phase.get(1).unwrap().samples();
    let sum = synth::superpose(a, b).unwrap();
    assert_abs_diff_eq!(synth::peak(&sum), 2.0 * synth::peak(a), epsilon = 1e-12);

    let opposed = grid_set(ArrayGeometry::line(2), PhaseStrategy::AlternatingNull, PI);
    let a = opposed.get(0).unwrap().samples();
    let b = opposed.get(1).unwrap().samples();
    let sum = synth::superpose(a, b).unwrap();
    assert!(synth::peak(&sum) < 1e-9, "residual {}", synth::peak(&sum));

    assert!(synth::superpose(a, &b[1..]).is_err());
}

// ─── test 6: focus geometry ──────────────────────────────────────────────────

/// The center of a focused 3×3 grid starts at zero phase; corners lag by `√2·k`.
#[test]
fn test_focus_center_first_samples() {
    let k = PI / 4.0;
    let set = grid_set(ArrayGeometry::square(3), PhaseStrategy::FocusCenter, k);
    assert_abs_diff_eq!(set.get(4).unwrap().samples()[0], 0.0, epsilon = 1e-12);
    for corner in [0, 2, 6, 8] {
        let first = set.get(corner).unwrap().samples()[0];
        assert_abs_diff_eq!(first, (-(2.0_f64).sqrt() * k).sin(), epsilon = 1e-12);
    }
    for edge in [1, 3, 5, 7] {
        let first = set.get(edge).unwrap().samples()[0];
        assert_abs_diff_eq!(first, (-k).sin(), epsilon = 1e-12);
    }
}
