/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Stability monitor: instability score and verdict from a signal or telemetry.
//!
//! The signal path scores the standard deviation of the first difference; the
//! telemetry path ORs the four field checks against soft tuning limits. Verdicts
//! are recomputed every cycle and never stored.

use tracing::debug;

use crate::config::StabilityConfig;
use crate::telemetry::{FieldLimits, TelemetryChecks, TelemetrySample};

/// Score and pass/fail decision for one evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StabilityVerdict {
    /// Non-negative instability score.
    pub score: f64,
    /// `true` when the evaluation crossed its tolerance.
    pub unstable: bool,
}

impl StabilityVerdict {
    /// Zero-score stable verdict.
    pub const STABLE: Self = Self {
        score: 0.0,
        unstable: false,
    };
}

/// Standard deviation of the first difference of `signal`, compared to `tolerance`.
///
/// Signals shorter than two samples have no difference and score `0`. A
/// non-finite score is always unstable.
pub fn evaluate(signal: &[f64], tolerance: f64) -> StabilityVerdict {
    if signal.len() < 2 {
        return StabilityVerdict::STABLE;
    }
    let n = (signal.len() - 1) as f64;
    let diffs = signal.windows(2).map(|w| w[1] - w[0]);
    let mean = diffs.clone().sum::<f64>() / n;
    let score = (diffs.map(|d| (d - mean).powi(2)).sum::<f64>() / n).sqrt();
    StabilityVerdict {
        score,
        unstable: !score.is_finite() || score > tolerance,
    }
}

/// OR of the four field checks against `limits`; score is the summed exceedance.
pub fn evaluate_telemetry(sample: &TelemetrySample, limits: &FieldLimits) -> StabilityVerdict {
    let checks = TelemetryChecks::evaluate(sample, limits);
    StabilityVerdict {
        score: checks.score(),
        unstable: checks.any_failed(),
    }
}

/// Monitor bound to a fixed set of soft tolerances.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StabilityMonitor {
    config: StabilityConfig,
}

impl StabilityMonitor {
    /// Monitor with the given tolerances.
    pub fn new(config: StabilityConfig) -> Self {
        Self { config }
    }

    /// Configured tolerances.
    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }

    /// [`evaluate`] against the configured signal tolerance.
    pub fn signal(&self, signal: &[f64]) -> StabilityVerdict {
        evaluate(signal, self.config.signal_tolerance)
    }

    /// [`evaluate_telemetry`] against the configured soft limits.
    pub fn telemetry(&self, sample: &TelemetrySample) -> StabilityVerdict {
        let verdict = evaluate_telemetry(sample, &self.config.telemetry);
        if verdict.unstable {
            debug!(score = verdict.score, ts = sample.timestamp_us, "telemetry drift");
        }
        verdict
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
