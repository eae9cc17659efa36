/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Containment guard: the final interlock.
//!
//! The guard runs the same four field checks as the stability monitor, but
//! against hard safety limits, and latches the result.
//!
//! # Invariants
//!
//! - **Sticky trip**: once [`ContainmentState::Tripped`], the guard keeps
//!   evaluating telemetry but stays tripped until [`ContainmentGuard::reset`],
//!   even if every later sample is nominal.
//! - **First reason kept**: the [`TripReason`] recorded is the one that caused the
//!   transition; later failures do not overwrite it.
//! - **Dominance**: callers must emit no actuator output while tripped.

use tracing::{error, info, warn};

use crate::error::Result;
use crate::synth::WaveformSet;
use crate::telemetry::{FieldCheck, FieldLimits, TelemetryChecks, TelemetrySample};

/// Interlock state of one control loop instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ContainmentState {
    /// Output permitted.
    #[default]
    Armed,
    /// All output halted until an external reset.
    Tripped,
}

/// Why the guard tripped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TripReason {
    /// A channel amplitude exceeded the hard ceiling.
    Amplitude,
    /// Channel amplitude spread exceeded the hard ceiling.
    Variance,
    /// Phase spread exceeded the hard ceiling.
    PhaseSpread,
    /// Coherence fell below the hard floor.
    Coherence,
    /// Telemetry missing for longer than one stale cycle.
    TelemetryLost,
    /// A synthesized buffer exceeded the amplitude ceiling.
    OutputAmplitude,
    /// External stop signal.
    Cancelled,
}

impl From<FieldCheck> for TripReason {
    fn from(check: FieldCheck) -> Self {
        match check {
            FieldCheck::Amplitude => TripReason::Amplitude,
            FieldCheck::Variance => TripReason::Variance,
            FieldCheck::PhaseSpread => TripReason::PhaseSpread,
            FieldCheck::Coherence => TripReason::Coherence,
        }
    }
}

/// Stateless decision: `Tripped` if any check fails against `limits`.
pub fn assess(sample: &TelemetrySample, limits: &FieldLimits) -> ContainmentState {
    if TelemetryChecks::evaluate(sample, limits).any_failed() {
        ContainmentState::Tripped
    } else {
        ContainmentState::Armed
    }
}

/// Latching interlock bound to hard limits.
#[derive(Clone, Debug, PartialEq)]
pub struct ContainmentGuard {
    limits: FieldLimits,
    state: ContainmentState,
    reason: Option<TripReason>,
    trips: u64,
}

impl ContainmentGuard {
    /// Armed guard over validated `limits`.
    pub fn new(limits: FieldLimits) -> Result<Self> {
        limits.validate()?;
        Ok(Self {
            limits,
            state: ContainmentState::Armed,
            reason: None,
            trips: 0,
        })
    }

    /// Evaluate `sample` and return the latched state.
    pub fn check(&mut self, sample: &TelemetrySample) -> ContainmentState {
        let checks = TelemetryChecks::evaluate(sample, &self.limits);
        if let Some(failed) = checks.failures().next() {
            if self.state == ContainmentState::Armed {
                error!(
                    check = ?failed,
                    peak = checks.peak_amplitude,
                    spread = checks.amplitude_spread,
                    phase_spread = checks.phase_spread,
                    coherence = checks.coherence,
                    "containment limit exceeded"
                );
            }
            self.trip(failed.into());
        }
        self.state
    }

    /// Trip if any buffer of `output` exceeds the amplitude ceiling or is non-finite.
    pub fn check_output(&mut self, output: &WaveformSet) -> ContainmentState {
        let ceiling = self.limits.max_amplitude;
        let offending = output.iter().find(|b| {
            b.samples().iter().any(|v| !v.is_finite()) || b.peak() > ceiling
        });
        if let Some(buffer) = offending {
            if self.state == ContainmentState::Armed {
                error!(element = buffer.element_id(), peak = buffer.peak(), ceiling, "output interlock");
            }
            self.trip(TripReason::OutputAmplitude);
        }
        self.state
    }

    /// Trip unconditionally (telemetry loss, cancellation).
    pub fn force_trip(&mut self, reason: TripReason) -> ContainmentState {
        if self.state == ContainmentState::Armed {
            warn!(?reason, "containment forced");
        }
        self.trip(reason);
        self.state
    }

    fn trip(&mut self, reason: TripReason) {
        if self.state == ContainmentState::Armed {
            self.state = ContainmentState::Tripped;
            self.reason = Some(reason);
            self.trips += 1;
        }
    }

    /// External reset back to `Armed`.
    pub fn reset(&mut self) {
        if self.state == ContainmentState::Tripped {
            info!(reason = ?self.reason, "containment reset");
        }
        self.state = ContainmentState::Armed;
        self.reason = None;
    }

    /// Current latched state.
    pub fn state(&self) -> ContainmentState {
        self.state
    }

    /// Reason for the current trip, if tripped.
    pub fn reason(&self) -> Option<TripReason> {
        self.reason
    }

    /// `true` while tripped.
    pub fn is_tripped(&self) -> bool {
        self.state == ContainmentState::Tripped
    }

    /// Total trips since construction, across resets.
    pub fn trip_count(&self) -> u64 {
        self.trips
    }

    /// Hard limits.
    pub fn limits(&self) -> &FieldLimits {
        &self.limits
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
