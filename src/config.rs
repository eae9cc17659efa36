/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Immutable configuration for the whole control core.
//!
//! Every component receives its slice of a validated [`HarmonicConfig`] at
//! construction; there is no process-wide state. [`HarmonicConfig::validate`]
//! checks each field and every cross-field combination so that invalid setups
//! fail before the first cycle rather than degrading at runtime.
//!
//! With the `serde` feature all types here are (de)serialisable and
//! [`HarmonicConfig::from_json_str`] loads and validates a JSON document. Missing
//! fields fall back to [`Default`].

use core::f64::consts::PI;
use core::time::Duration;

use crate::array::{ArrayGeometry, HarmonicWeight};
use crate::controller::PidGains;
use crate::error::{HarmonicError, Result};
use crate::filter::band_edges;
use crate::profile::{PhaseProfile, PhaseStrategy};
use crate::synth::sample_count;
use crate::telemetry::FieldLimits;

/// Shortest permitted cycle period.
pub const MIN_CYCLE_PERIOD: Duration = Duration::from_millis(1);

/// Longest permitted cycle period.
pub const MAX_CYCLE_PERIOD: Duration = Duration::from_secs(1);

/// Largest frame a cycle may synthesize: elements × samples per element.
pub const MAX_FRAME_SAMPLES: usize = 1 << 24;

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(HarmonicError::invalid_config(message()))
    }
}

fn finite_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

// ─── Synthesis ──────────────────────────────────────────────────────────────

/// Waveform synthesis parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SynthesisConfig {
    /// Samples per second.
    pub sample_rate: f64,
    /// Window length in seconds.
    pub duration: f64,
    /// Fundamental frequency in Hz.
    pub base_frequency: f64,
    /// Default harmonic set for elements without their own.
    pub harmonic_weights: Vec<HarmonicWeight>,
}

impl SynthesisConfig {
    /// Check sample count, base frequency, weights, and that the highest harmonic
    /// stays below Nyquist.
    pub fn validate(&self) -> Result<()> {
        sample_count(self.sample_rate, self.duration)?;
        ensure(finite_positive(self.base_frequency), || {
            format!("base_frequency must be positive, got {}", self.base_frequency)
        })?;
        ensure(!self.harmonic_weights.is_empty(), || {
            "harmonic_weights must not be empty".into()
        })?;
        ensure(
            self.harmonic_weights
                .iter()
                .all(|h| finite_positive(h.multiplier) && h.weight.is_finite()),
            || "harmonic multipliers must be positive and weights finite".into(),
        )?;
        ensure(
            self.harmonic_weights.iter().map(|h| h.weight.abs()).sum::<f64>() > 0.0,
            || "harmonic weights sum to zero".into(),
        )?;
        let top = self
            .harmonic_weights
            .iter()
            .map(|h| h.multiplier)
            .fold(0.0, f64::max)
            * self.base_frequency;
        ensure(top < self.sample_rate / 2.0, || {
            format!(
                "highest harmonic {top} Hz is not below nyquist {} Hz",
                self.sample_rate / 2.0
            )
        })
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 96_000.0,
            duration: 0.01,
            base_frequency: 3_000.0,
            harmonic_weights: HarmonicWeight::uniform(&[1.0, 2.0, 3.0]),
        }
    }
}

// ─── Phase profile ──────────────────────────────────────────────────────────

/// Phase profile strategy and its scalar constant.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ProfileConfig {
    /// Strategy variant.
    pub strategy: PhaseStrategy,
    /// Phase constant `k` handed to the strategy.
    pub phase_constant: f64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            strategy: PhaseStrategy::FocusCenter,
            phase_constant: PI / 4.0,
        }
    }
}

// ─── Filter ─────────────────────────────────────────────────────────────────

/// Optional bandpass stage applied to every synthesized buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterConfig {
    /// Band center in Hz.
    pub target_frequency: f64,
    /// Full bandwidth in Hz (`target ± bandwidth / 2`).
    pub bandwidth: f64,
}

// ─── PID ────────────────────────────────────────────────────────────────────

/// Feedback controller parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PidConfig {
    /// Proportional, integral and derivative gains.
    pub gains: PidGains,
    /// Actuator inertia step: `output[t] = output[t−1] + step_size × control`.
    pub step_size: f64,
    /// Symmetric clamp on the accumulated integral error.
    pub integral_limit: f64,
    /// Target mean telemetry amplitude.
    pub setpoint: f64,
}

impl PidConfig {
    /// Gains must be finite and non-negative; step and clamp positive.
    pub fn validate(&self) -> Result<()> {
        let PidGains { kp, ki, kd } = self.gains;
        ensure(
            [kp, ki, kd].iter().all(|g| g.is_finite() && *g >= 0.0),
            || format!("PID gains must be finite and non-negative, got kp={kp} ki={ki} kd={kd}"),
        )?;
        ensure(finite_positive(self.step_size), || {
            format!("PID step_size must be positive, got {}", self.step_size)
        })?;
        ensure(finite_positive(self.integral_limit), || {
            format!("PID integral_limit must be positive, got {}", self.integral_limit)
        })?;
        ensure(self.setpoint.is_finite(), || "PID setpoint must be finite".into())
    }
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            gains: PidGains::new(2.0, 0.5, 1.2),
            step_size: 0.01,
            integral_limit: 50.0,
            setpoint: 0.8,
        }
    }
}

// ─── Self-sync ──────────────────────────────────────────────────────────────

/// Self-sync corrector parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SelfSyncConfig {
    /// Correction gain in `(0, 1]`.
    pub gain: f64,
    /// Phase shift applied to the corrective term, radians.
    pub phase_shift: f64,
}

impl SelfSyncConfig {
    /// Gain in `(0, 1]`, finite shift.
    pub fn validate(&self) -> Result<()> {
        ensure(self.gain > 0.0 && self.gain <= 1.0, || {
            format!("self-sync gain must be in (0, 1], got {}", self.gain)
        })?;
        ensure(self.phase_shift.is_finite(), || {
            "self-sync phase_shift must be finite".into()
        })
    }
}

impl Default for SelfSyncConfig {
    fn default() -> Self {
        Self {
            gain: 0.25,
            phase_shift: PI / 6.0,
        }
    }
}

// ─── Stability ──────────────────────────────────────────────────────────────

/// Soft tuning tolerances for the stability monitor.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StabilityConfig {
    /// Tolerance on the standard deviation of a signal's first difference.
    pub signal_tolerance: f64,
    /// Soft telemetry limits; crossing one triggers self-sync re-alignment.
    pub telemetry: FieldLimits,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            signal_tolerance: 0.05,
            telemetry: FieldLimits {
                max_amplitude: 1.15,
                max_variance: 0.08,
                max_phase_diff: 0.4 * PI,
                min_coherence: 0.9,
            },
        }
    }
}

// ─── Loop ───────────────────────────────────────────────────────────────────

/// Control loop timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LoopConfig {
    /// Fixed cycle period in microseconds.
    pub cycle_period_us: u64,
    /// Bounded wait for fresh telemetry each cycle, in microseconds.
    pub telemetry_timeout_us: u64,
}

impl LoopConfig {
    /// Cycle period.
    pub fn cycle_period(&self) -> Duration {
        Duration::from_micros(self.cycle_period_us)
    }

    /// Telemetry read timeout.
    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_micros(self.telemetry_timeout_us)
    }

    /// Period in `[1 ms, 1 s]`, timeout positive and no longer than the period.
    pub fn validate(&self) -> Result<()> {
        let period = self.cycle_period();
        ensure(
            (MIN_CYCLE_PERIOD..=MAX_CYCLE_PERIOD).contains(&period),
            || format!("cycle period {period:?} outside [1ms, 1s]"),
        )?;
        ensure(
            self.telemetry_timeout_us > 0 && self.telemetry_timeout_us <= self.cycle_period_us,
            || {
                format!(
                    "telemetry timeout {}us must be positive and within the {}us period",
                    self.telemetry_timeout_us, self.cycle_period_us
                )
            },
        )
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            cycle_period_us: 10_000,
            telemetry_timeout_us: 5_000,
        }
    }
}

// ─── Top level ──────────────────────────────────────────────────────────────

/// Complete configuration of one control loop instance.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct HarmonicConfig {
    /// Actuator layout.
    pub geometry: ArrayGeometry,
    /// Starting amplitude of every element.
    pub initial_amplitude: f64,
    /// Amplitude ceiling enforced by the array model.
    pub max_element_amplitude: f64,
    /// Waveform synthesis.
    pub synthesis: SynthesisConfig,
    /// Phase profile.
    pub profile: ProfileConfig,
    /// Optional bandpass stage.
    pub filter: Option<FilterConfig>,
    /// Feedback controller.
    pub pid: PidConfig,
    /// Self-sync corrector.
    pub self_sync: SelfSyncConfig,
    /// Soft stability tolerances.
    pub stability: StabilityConfig,
    /// Hard containment limits.
    pub containment: FieldLimits,
    /// Loop timing.
    pub cycle: LoopConfig,
}

impl HarmonicConfig {
    /// Validate every field and cross-field combination.
    ///
    /// Returns `InvalidBand` for a filter band outside `(0, nyquist)` and
    /// `InvalidConfig` for everything else.
    pub fn validate(&self) -> Result<()> {
        let elements = self.geometry.element_count()?;
        ensure(elements > 0, || "geometry must contain at least one element".into())?;
        ensure(finite_positive(self.max_element_amplitude), || {
            format!(
                "max_element_amplitude must be positive, got {}",
                self.max_element_amplitude
            )
        })?;
        ensure(
            self.initial_amplitude >= 0.0 && self.initial_amplitude <= self.max_element_amplitude,
            || {
                format!(
                    "initial_amplitude {} outside [0, {}]",
                    self.initial_amplitude, self.max_element_amplitude
                )
            },
        )?;
        self.synthesis.validate()?;
        let samples = sample_count(self.synthesis.sample_rate, self.synthesis.duration)?;
        ensure(elements.saturating_mul(samples) <= MAX_FRAME_SAMPLES, || {
            format!(
                "{elements} elements × {samples} samples exceeds the frame limit of {MAX_FRAME_SAMPLES}"
            )
        })?;
        PhaseProfile::generate(
            &self.geometry,
            self.profile.strategy,
            self.profile.phase_constant,
        )?;
        if let Some(filter) = &self.filter {
            band_edges(filter.target_frequency, filter.bandwidth, self.synthesis.sample_rate)?;
        }
        self.pid.validate()?;
        self.self_sync.validate()?;
        ensure(finite_positive(self.stability.signal_tolerance), || {
            "stability signal_tolerance must be positive".into()
        })?;
        self.stability.telemetry.validate()?;
        self.containment.validate()?;
        self.cycle.validate()
    }

    /// Parse a JSON document and validate it.
    #[cfg(feature = "serde")]
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: HarmonicConfig = serde_json::from_str(json)
            .map_err(|e| HarmonicError::invalid_config(format!("config parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for HarmonicConfig {
    fn default() -> Self {
        Self {
            geometry: ArrayGeometry::square(8),
            initial_amplitude: 0.8,
            max_element_amplitude: 1.0,
            synthesis: SynthesisConfig::default(),
            profile: ProfileConfig::default(),
            filter: None,
            pid: PidConfig::default(),
            self_sync: SelfSyncConfig::default(),
            stability: StabilityConfig::default(),
            containment: FieldLimits::default(),
            cycle: LoopConfig::default(),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        HarmonicConfig::default().validate().unwrap();
    }

    #[test]
    fn test_empty_harmonics_rejected() {
        let mut config = HarmonicConfig::default();
        config.synthesis.harmonic_weights.clear();
        assert!(matches!(
            config.validate(),
            Err(HarmonicError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_harmonic_above_nyquist_rejected() {
        let mut config = HarmonicConfig::default();
        config.synthesis.base_frequency = 20_000.0; // 3rd harmonic at 60 kHz > 48 kHz
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_filter_band_beyond_nyquist_is_invalid_band() {
        let mut config = HarmonicConfig::default();
        config.filter = Some(FilterConfig {
            target_frequency: 47_990.0,
            bandwidth: 100.0,
        });
        assert!(matches!(
            config.validate(),
            Err(HarmonicError::InvalidBand { .. })
        ));
    }

    #[test]
    fn test_negative_gain_rejected() {
        let mut config = HarmonicConfig::default();
        config.pid.gains.ki = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_self_sync_gain_range() {
        let mut config = HarmonicConfig::default();
        config.self_sync.gain = 0.0;
        assert!(config.validate().is_err());
        config.self_sync.gain = 1.0;
        assert!(config.validate().is_ok());
        config.self_sync.gain = 1.01;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cycle_period_bounds() {
        let mut config = HarmonicConfig::default();
        config.cycle = LoopConfig {
            cycle_period_us: 500,
            telemetry_timeout_us: 100,
        };
        assert!(config.validate().is_err());
        config.cycle = LoopConfig {
            cycle_period_us: 20_000,
            telemetry_timeout_us: 25_000,
        };
        assert!(config.validate().is_err());
        config.cycle = LoopConfig {
            cycle_period_us: 1_000,
            telemetry_timeout_us: 1_000,
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.cycle.cycle_period(), Duration::from_millis(1));
    }

    #[test]
    fn test_tri_axis_needs_three_channel_geometry() {
        let mut config = HarmonicConfig::default();
        config.profile.strategy = PhaseStrategy::TriAxisLock;
        assert!(config.validate().is_err());
        config.geometry = ArrayGeometry::line(3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_oversized_geometry_rejected() {
        let mut config = HarmonicConfig::default();
        config.geometry = ArrayGeometry::grid(usize::MAX, 2);
        assert!(matches!(
            config.validate(),
            Err(HarmonicError::InvalidConfig { .. })
        ));
        config.geometry = ArrayGeometry::grid(crate::array::MAX_ELEMENTS, 2);
        assert!(config.validate().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_overflowing_geometry_document_rejected() {
        let json = r#"{ "geometry": { "rows": 18446744073709551615, "cols": 2 } }"#;
        assert!(matches!(
            HarmonicConfig::from_json_str(json),
            Err(HarmonicError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_oversized_buffers_rejected() {
        let mut config = HarmonicConfig::default();
        config.geometry = ArrayGeometry::line(1);
        config.synthesis.sample_rate = 1e19;
        config.synthesis.duration = 1.0;
        assert!(matches!(
            config.validate(),
            Err(HarmonicError::InvalidConfig { .. })
        ));
        assert!(crate::runtime::ControlLoop::new(config).is_err());

        // Each dimension alone is allowed, the frame as a whole is not.
        let mut config = HarmonicConfig::default();
        config.synthesis.sample_rate = 192_000.0;
        config.synthesis.duration = 20.0;
        assert!(config.synthesis.validate().is_ok());
        assert!(config.geometry.element_count().is_ok());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_initial_amplitude_within_max() {
        let mut config = HarmonicConfig::default();
        config.initial_amplitude = 1.5;
        assert!(config.validate().is_err());
    }
}
