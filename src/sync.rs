/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Self-sync corrector: drift re-alignment that never stops the loop.
//!
//! Two corrections are offered:
//!
//! - [`SelfSyncCorrector::correct`] adds `gain · peak · sin(φ[n] + shift)` to a
//!   sampled signal, where `φ` is the instantaneous phase of its analytic signal
//!   (FFT Hilbert transform).
//! - [`SelfSyncCorrector::realign`] turns telemetry phase differences into
//!   per-channel phase deltas that pull every channel toward the mean.
//!
//! # Invariants
//!
//! - **Bounded perturbation**: the corrected peak never exceeds
//!   `(1 + gain) × original peak`; otherwise `CorrectionOverrun` is returned and
//!   the caller keeps the uncorrected signal.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use tracing::debug;

use crate::compensation::compensation_vector;
use crate::config::SelfSyncConfig;
use crate::error::{HarmonicError, Result};
use crate::synth::{peak, WaveformSet};

const OVERRUN_SLACK: f64 = 1e-12;

/// Instantaneous phase of `signal` from its analytic signal.
pub fn instantaneous_phase(signal: &[f64]) -> Vec<f64> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }
    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut spectrum: Vec<Complex<f64>> = signal.iter().map(|&x| Complex::new(x, 0.0)).collect();
    forward.process(&mut spectrum);
    // Keep DC (and Nyquist for even n), double positive bins, zero negative bins.
    for (k, bin) in spectrum.iter_mut().enumerate() {
        let h = if k == 0 || (n % 2 == 0 && k == n / 2) {
            1.0
        } else if k < (n + 1) / 2 {
            2.0
        } else {
            0.0
        };
        *bin *= h;
    }
    inverse.process(&mut spectrum);
    // Inverse is unnormalised; the 1/n factor does not change the angle.
    spectrum.iter().map(|z| z.arg()).collect()
}

/// Phase-angle driven corrector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelfSyncCorrector {
    gain: f64,
    phase_shift: f64,
}

impl SelfSyncCorrector {
    /// Corrector with `gain ∈ (0, 1]` and a finite `phase_shift`.
    pub fn new(config: &SelfSyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            gain: config.gain,
            phase_shift: config.phase_shift,
        })
    }

    /// Correction gain.
    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Phase shift applied to the corrective term.
    pub fn phase_shift(&self) -> f64 {
        self.phase_shift
    }

    /// Largest peak a corrected copy of a signal with `original_peak` may reach.
    pub fn peak_bound(&self, original_peak: f64) -> f64 {
        (1.0 + self.gain) * original_peak
    }

    /// Add the bounded corrective term to `signal`.
    ///
    /// Since `|sin| ≤ 1`, every finite result stays within
    /// [`peak_bound`](Self::peak_bound). `CorrectionOverrun` is therefore only
    /// returned for input containing NaN or infinity, or when the sum overflows
    /// to infinity near `f64::MAX`.
    pub fn correct(&self, signal: &[f64]) -> Result<Vec<f64>> {
        let original_peak = peak(signal);
        if signal.iter().any(|x| !x.is_finite()) {
            return Err(HarmonicError::CorrectionOverrun {
                corrected_peak: f64::INFINITY,
                bound: self.peak_bound(original_peak),
            });
        }
        if signal.is_empty() || original_peak == 0.0 {
            return Ok(signal.to_vec());
        }
        let scale = self.gain * original_peak;
        let corrected: Vec<f64> = signal
            .iter()
            .zip(instantaneous_phase(signal))
            .map(|(&x, phi)| x + scale * (phi + self.phase_shift).sin())
            .collect();

        let corrected_peak = if corrected.iter().all(|v| v.is_finite()) {
            peak(&corrected)
        } else {
            f64::INFINITY
        };
        let bound = self.peak_bound(original_peak);
        if !corrected_peak.is_finite() || corrected_peak > bound * (1.0 + OVERRUN_SLACK) {
            return Err(HarmonicError::CorrectionOverrun {
                corrected_peak,
                bound,
            });
        }
        Ok(corrected)
    }

    /// [`correct`](Self::correct) every buffer of `set`. Fails on the first overrun.
    pub fn correct_set(&self, set: &WaveformSet) -> Result<WaveformSet> {
        let corrected = set.try_map(|_, samples| self.correct(samples))?;
        debug!(buffers = corrected.len(), gain = self.gain, "self-sync applied");
        Ok(corrected)
    }

    /// Per-channel phase deltas pulling each channel toward the mean phase difference.
    pub fn realign(&self, phase_diffs: &[f64]) -> Vec<f64> {
        compensation_vector(phase_diffs)
            .into_iter()
            .map(|delta| delta * self.gain)
            .collect()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
