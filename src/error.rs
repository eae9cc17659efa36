/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Error taxonomy for synthesis, filtering, correction and telemetry.
//!
//! A containment trip is deliberately absent from this enum: it is a latched
//! state ([`crate::guard::ContainmentState::Tripped`]), not a failure of a call.
//!
//! # Propagation
//!
//! - [`HarmonicError::InvalidConfig`] and [`HarmonicError::InvalidBand`] are fatal
//!   when raised during configuration validation.
//! - Every other variant is contained to the cycle that produced it and is
//!   reported through [`crate::runtime::CycleReport::errors`].

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, HarmonicError>;

/// Errors raised by the harmonic field core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HarmonicError {
    /// Synthesis, filter, controller or loop parameters are unusable.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        message: String,
    },

    /// A correction would move an element outside its bounds. Previous state is retained.
    #[error("correction for element {element_id} out of range: {message}")]
    OutOfRange {
        /// Element the correction targeted.
        element_id: u32,
        /// Why the correction was rejected.
        message: String,
    },

    /// The requested pass band does not fit between DC and Nyquist.
    #[error("invalid band: {low_hz:.3} Hz .. {high_hz:.3} Hz (nyquist {nyquist_hz:.3} Hz)")]
    InvalidBand {
        /// Lower band edge in Hz.
        low_hz: f64,
        /// Upper band edge in Hz.
        high_hz: f64,
        /// Nyquist frequency of the sample rate in Hz.
        nyquist_hz: f64,
    },

    /// A self-sync correction grew the peak beyond its bounded-perturbation contract.
    #[error("self-sync correction overrun: peak {corrected_peak:.6} exceeds bound {bound:.6}")]
    CorrectionOverrun {
        /// Peak magnitude of the corrected signal.
        corrected_peak: f64,
        /// Maximum permitted peak, `(1 + gain) × original peak`.
        bound: f64,
    },

    /// No fresh telemetry arrived within the bounded read timeout.
    #[error("telemetry timeout after {waited_ms} ms ({missed} consecutive misses)")]
    TelemetryTimeout {
        /// How long the read waited, in milliseconds.
        waited_ms: u64,
        /// Consecutive cycles without fresh telemetry.
        missed: u32,
    },
}

impl HarmonicError {
    /// Create an [`HarmonicError::InvalidConfig`] error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an [`HarmonicError::OutOfRange`] error.
    pub fn out_of_range(element_id: u32, message: impl Into<String>) -> Self {
        Self::OutOfRange {
            element_id,
            message: message.into(),
        }
    }

    /// `true` for errors that must stop the loop before it starts.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. } | Self::InvalidBand { .. })
    }
}
