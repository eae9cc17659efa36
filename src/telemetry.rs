/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Telemetry samples, field limit checks and the single-slot sensor handoff.
//!
//! The four checks (peak amplitude, amplitude spread, phase spread, coherence
//! floor) are computed once by [`TelemetryChecks::evaluate`] and shared by the
//! soft stability path and the hard containment path; only the [`FieldLimits`]
//! differ between the two.
//!
//! # Invariants
//!
//! - **OR composition**: a sample fails when any single check fails. Healthy
//!   channels never average away a failing one.
//! - **Non-finite fails**: a NaN or infinite reading fails the check it feeds.
//! - **Latest wins**: [`TelemetrySlot`] holds at most one sample; publishing over
//!   an unread sample drops the older one.

use core::f64::consts::PI;
use core::time::Duration;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::{HarmonicError, Result};

// ─── Sample ─────────────────────────────────────────────────────────────────

/// One reading from the external sensor collaborator.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TelemetrySample {
    /// Sensor timestamp in microseconds, monotonic per source.
    pub timestamp_us: u64,
    /// Per-channel measured amplitudes.
    pub amplitudes: Vec<f64>,
    /// Pairwise phase differences between channels, radians.
    pub phase_diffs: Vec<f64>,
    /// Channel agreement in `[0, 1]`.
    pub coherence: f64,
}

impl TelemetrySample {
    /// Construct a sample.
    pub fn new(timestamp_us: u64, amplitudes: Vec<f64>, phase_diffs: Vec<f64>, coherence: f64) -> Self {
        Self {
            timestamp_us,
            amplitudes,
            phase_diffs,
            coherence,
        }
    }

    /// Mean channel amplitude; `0.0` with no channels.
    pub fn mean_amplitude(&self) -> f64 {
        if self.amplitudes.is_empty() {
            0.0
        } else {
            self.amplitudes.iter().sum::<f64>() / self.amplitudes.len() as f64
        }
    }
}

// ─── Limits ─────────────────────────────────────────────────────────────────

/// Thresholds for the four field checks.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldLimits {
    /// Ceiling on the largest channel amplitude magnitude.
    pub max_amplitude: f64,
    /// Ceiling on the standard deviation of amplitudes across channels.
    pub max_variance: f64,
    /// Ceiling on the largest absolute pairwise phase difference, radians.
    pub max_phase_diff: f64,
    /// Floor on coherence.
    pub min_coherence: f64,
}

impl FieldLimits {
    /// All ceilings positive and finite, coherence floor in `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        let ceilings = [self.max_amplitude, self.max_variance, self.max_phase_diff];
        if !ceilings.iter().all(|v| v.is_finite() && *v > 0.0) {
            return Err(HarmonicError::invalid_config(format!(
                "field limits must be positive: {self:?}"
            )));
        }
        if !(0.0..=1.0).contains(&self.min_coherence) {
            return Err(HarmonicError::invalid_config(format!(
                "min_coherence must be in [0, 1], got {}",
                self.min_coherence
            )));
        }
        Ok(())
    }
}

impl Default for FieldLimits {
    /// Hard containment limits.
    fn default() -> Self {
        Self {
            max_amplitude: 1.25,
            max_variance: 0.12,
            max_phase_diff: 0.6 * PI,
            min_coherence: 0.85,
        }
    }
}

// ─── Checks ─────────────────────────────────────────────────────────────────

/// Which of the four checks failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldCheck {
    /// Peak amplitude above ceiling.
    Amplitude,
    /// Amplitude spread above ceiling.
    Variance,
    /// Phase spread above ceiling.
    PhaseSpread,
    /// Coherence below floor.
    Coherence,
}

/// Measured values of one sample and their verdict against a [`FieldLimits`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TelemetryChecks {
    /// Largest `|amplitude|` across channels.
    pub peak_amplitude: f64,
    /// Population standard deviation of channel amplitudes.
    pub amplitude_spread: f64,
    /// Largest `|phase_diff|`.
    pub phase_spread: f64,
    /// Reported coherence.
    pub coherence: f64,
    limits: FieldLimits,
}

fn max_abs(values: &[f64]) -> f64 {
    // NaN propagates so the check sees it.
    values.iter().fold(0.0, |acc: f64, v| {
        if acc.is_nan() || v.is_nan() {
            f64::NAN
        } else {
            acc.max(v.abs())
        }
    })
}

fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

impl TelemetryChecks {
    /// Measure `sample` and hold the result against `limits`.
    pub fn evaluate(sample: &TelemetrySample, limits: &FieldLimits) -> Self {
        Self {
            peak_amplitude: max_abs(&sample.amplitudes),
            amplitude_spread: population_std(&sample.amplitudes),
            phase_spread: max_abs(&sample.phase_diffs),
            coherence: sample.coherence,
            limits: *limits,
        }
    }

    fn exceeds(value: f64, ceiling: f64) -> bool {
        !value.is_finite() || value > ceiling
    }

    /// `true` if the given check fails.
    pub fn failed(&self, check: FieldCheck) -> bool {
        match check {
            FieldCheck::Amplitude => Self::exceeds(self.peak_amplitude, self.limits.max_amplitude),
            FieldCheck::Variance => Self::exceeds(self.amplitude_spread, self.limits.max_variance),
            FieldCheck::PhaseSpread => Self::exceeds(self.phase_spread, self.limits.max_phase_diff),
            FieldCheck::Coherence => {
                !self.coherence.is_finite() || self.coherence < self.limits.min_coherence
            }
        }
    }

    /// Failing checks in fixed order: amplitude, variance, phase spread, coherence.
    pub fn failures(&self) -> impl Iterator<Item = FieldCheck> + '_ {
        [
            FieldCheck::Amplitude,
            FieldCheck::Variance,
            FieldCheck::PhaseSpread,
            FieldCheck::Coherence,
        ]
        .into_iter()
        .filter(|c| self.failed(*c))
    }

    /// `true` if any check fails.
    pub fn any_failed(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Sum of normalised exceedances; `0.0` when every check passes.
    ///
    /// A non-finite reading contributes `1.0` so the score itself stays finite.
    pub fn score(&self) -> f64 {
        fn over(value: f64, ceiling: f64) -> f64 {
            if !value.is_finite() {
                1.0
            } else {
                ((value - ceiling) / ceiling).max(0.0)
            }
        }
        let coherence = if !self.coherence.is_finite() {
            1.0
        } else if self.limits.min_coherence > 0.0 {
            ((self.limits.min_coherence - self.coherence) / self.limits.min_coherence).max(0.0)
        } else {
            0.0
        };
        over(self.peak_amplitude, self.limits.max_amplitude)
            + over(self.amplitude_spread, self.limits.max_variance)
            + over(self.phase_spread, self.limits.max_phase_diff)
            + coherence
    }
}

// ─── Single-slot handoff ────────────────────────────────────────────────────

/// Result of a bounded wait on a [`TelemetrySlot`].
#[derive(Clone, Debug, PartialEq)]
pub enum SlotRead {
    /// A sample newer than the last read.
    Fresh(TelemetrySample),
    /// Nothing arrived before the deadline.
    TimedOut,
    /// The slot was closed and is empty.
    Closed,
}

#[derive(Debug, Default)]
struct SlotState {
    latest: Option<TelemetrySample>,
    dropped: u64,
    closed: bool,
}

/// Bounded single-slot rendezvous between the sensor pump and the control loop.
#[derive(Debug, Default)]
pub struct TelemetrySlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl TelemetrySlot {
    /// Empty open slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `sample`, replacing any unread one. Returns `false` once closed.
    pub fn publish(&self, sample: TelemetrySample) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        if state.latest.replace(sample).is_some() {
            state.dropped += 1;
        }
        drop(state);
        self.ready.notify_one();
        true
    }

    /// Take the unread sample without waiting.
    pub fn take(&self) -> Option<TelemetrySample> {
        self.state.lock().latest.take()
    }

    /// Wait up to `timeout` for an unread sample.
    pub fn take_timeout(&self, timeout: Duration) -> SlotRead {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(sample) = state.latest.take() {
                return SlotRead::Fresh(sample);
            }
            if state.closed {
                return SlotRead::Closed;
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return match state.latest.take() {
                    Some(sample) => SlotRead::Fresh(sample),
                    None => SlotRead::TimedOut,
                };
            }
        }
    }

    /// Close the slot and wake any waiter. Further publishes are refused.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    /// `true` once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Samples overwritten before they were read.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn nominal() -> TelemetrySample {
        TelemetrySample::new(0, vec![1.0, 1.02, 0.98], vec![0.1, -0.05], 0.95)
    }

    #[test]
    fn test_nominal_passes_all_checks() {
        let checks = TelemetryChecks::evaluate(&nominal(), &FieldLimits::default());
        assert!(!checks.any_failed());
        assert_eq!(checks.score(), 0.0);
    }

    #[test]
    fn test_single_channel_not_averaged_away() {
        let mut sample = nominal();
        sample.amplitudes = vec![1.0; 15];
        sample.amplitudes.push(1.3);
        let checks = TelemetryChecks::evaluate(&sample, &FieldLimits::default());
        assert!(checks.failed(FieldCheck::Amplitude));
        assert!(checks.score() > 0.0);
    }

    #[test]
    fn test_failures_in_fixed_order() {
        let sample = TelemetrySample::new(0, vec![0.2, 1.5], vec![PI], 0.1);
        let checks = TelemetryChecks::evaluate(&sample, &FieldLimits::default());
        let failed: Vec<_> = checks.failures().collect();
        assert_eq!(
            failed,
            vec![
                FieldCheck::Amplitude,
                FieldCheck::Variance,
                FieldCheck::PhaseSpread,
                FieldCheck::Coherence
            ]
        );
    }

    #[test]
    fn test_non_finite_reading_fails() {
        let mut sample = nominal();
        sample.amplitudes[1] = f64::NAN;
        let checks = TelemetryChecks::evaluate(&sample, &FieldLimits::default());
        assert!(checks.failed(FieldCheck::Amplitude));
        assert!(checks.failed(FieldCheck::Variance));
        assert!(checks.score().is_finite());

        let mut sample = nominal();
        sample.coherence = f64::NAN;
        let checks = TelemetryChecks::evaluate(&sample, &FieldLimits::default());
        assert!(checks.failed(FieldCheck::Coherence));
    }

    #[test]
    fn test_empty_channels_pass_spread_checks() {
        let sample = TelemetrySample::new(0, vec![], vec![], 1.0);
        let checks = TelemetryChecks::evaluate(&sample, &FieldLimits::default());
        assert!(!checks.any_failed());
        assert_eq!(sample.mean_amplitude(), 0.0);
    }

    #[test]
    fn test_limits_validation() {
        assert!(FieldLimits::default().validate().is_ok());
        let mut limits = FieldLimits::default();
        limits.min_coherence = 1.5;
        assert!(limits.validate().is_err());
        let mut limits = FieldLimits::default();
        limits.max_variance = 0.0;
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_slot_latest_wins() {
        let slot = TelemetrySlot::new();
        for t in 0..3 {
            let mut s = nominal();
            s.timestamp_us = t;
            assert!(slot.publish(s));
        }
        assert_eq!(slot.dropped(), 2);
        assert_eq!(slot.take().map(|s| s.timestamp_us), Some(2));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn test_slot_timeout_when_empty() {
        let slot = TelemetrySlot::new();
        let start = Instant::now();
        assert_eq!(slot.take_timeout(Duration::from_millis(5)), SlotRead::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_slot_wakes_waiter() {
        let slot = Arc::new(TelemetrySlot::new());
        let producer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                slot.publish(TelemetrySample::new(7, vec![1.0], vec![], 1.0));
            })
        };
        let read = slot.take_timeout(Duration::from_secs(5));
        producer.join().unwrap();
        match read {
            SlotRead::Fresh(sample) => assert_eq!(sample.timestamp_us, 7),
            other => panic!("expected fresh sample, got {:?}", other),
        }
    }

    #[test]
    fn test_closed_slot_refuses_publish() {
        let slot = TelemetrySlot::new();
        slot.close();
        assert!(slot.is_closed());
        assert!(!slot.publish(nominal()));
        assert_eq!(slot.take_timeout(Duration::from_millis(1)), SlotRead::Closed);
    }
}
