/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Discrete-time PID feedback controller with an integrating actuator output.
//!
//! Per step:
//!
//! ```text
//! error      = setpoint − measured
//! integral  += error                 (clamped to ±integral_limit)
//! derivative = error − previous_error
//! control    = Kp·error + Ki·integral + Kd·derivative
//! output     = output + step_size·control
//! ```
//!
//! # Invariants
//!
//! - **Unconditional history**: `previous_error` is updated every step.
//! - **Bounded integral**: `|integral_error| ≤ integral_limit` after every step.
//! - **Steady-state no-op**: `measured == setpoint` from rest gives `control = 0`
//!   and leaves the output unchanged.

use tracing::trace;

use crate::config::PidConfig;
use crate::error::Result;

/// Proportional, integral and derivative gains.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PidGains {
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain.
    pub ki: f64,
    /// Derivative gain.
    pub kd: f64,
}

impl PidGains {
    /// Gains from `(kp, ki, kd)`.
    pub const fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }
}

/// Persistent controller memory. Reset on shutdown or restart.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControllerState {
    /// Accumulated error.
    pub integral_error: f64,
    /// Error of the previous step.
    pub previous_error: f64,
}

/// Outcome of one controller step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControlStep {
    /// `setpoint − measured`.
    pub error: f64,
    /// PID control effort.
    pub control: f64,
    /// Integrated actuator output after this step.
    pub output: f64,
}

/// Stateful PID controller.
#[derive(Clone, Debug, PartialEq)]
pub struct FeedbackController {
    gains: PidGains,
    step_size: f64,
    integral_limit: f64,
    initial_output: f64,
    state: ControllerState,
    output: f64,
}

impl FeedbackController {
    /// Build from a validated config with the actuator output starting at `initial_output`.
    pub fn new(config: &PidConfig, initial_output: f64) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            gains: config.gains,
            step_size: config.step_size,
            integral_limit: config.integral_limit,
            initial_output,
            state: ControllerState::default(),
            output: initial_output,
        })
    }

    /// Advance one cycle.
    pub fn step(&mut self, setpoint: f64, measured: f64) -> ControlStep {
        let error = setpoint - measured;
        self.state.integral_error =
            (self.state.integral_error + error).clamp(-self.integral_limit, self.integral_limit);
        let derivative = error - self.state.previous_error;
        self.state.previous_error = error;

        let PidGains { kp, ki, kd } = self.gains;
        let control = kp * error + ki * self.state.integral_error + kd * derivative;
        self.output += self.step_size * control;
        trace!(error, control, output = self.output, "pid step");

        ControlStep {
            error,
            control,
            output: self.output,
        }
    }

    /// Run over `measurements` from the current state; returns the output trajectory.
    pub fn simulate(&mut self, setpoint: f64, measurements: &[f64]) -> Vec<f64> {
        measurements
            .iter()
            .map(|&m| self.step(setpoint, m).output)
            .collect()
    }

    /// Clear state and return the output to its initial value.
    pub fn reset(&mut self) {
        self.state = ControllerState::default();
        self.output = self.initial_output;
    }

    /// Restore state from a snapshot.
    pub fn restore(&mut self, state: ControllerState, output: f64) {
        self.state = ControllerState {
            integral_error: state
                .integral_error
                .clamp(-self.integral_limit, self.integral_limit),
            ..state
        };
        self.output = output;
    }

    /// Current controller memory.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Current integrated output.
    pub fn output(&self) -> f64 {
        self.output
    }

    /// Configured gains.
    pub fn gains(&self) -> PidGains {
        self.gains
    }

    /// Actuator step size.
    pub fn step_size(&self) -> f64 {
        self.step_size
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn reference() -> PidConfig {
        PidConfig {
            gains: PidGains::new(2.0, 0.5, 1.2),
            ..PidConfig::default()
        }
    }

    #[test]
    fn test_steady_state_is_noop() {
        let mut pid = FeedbackController::new(&reference(), 0.4).unwrap();
        for _ in 0..100 {
            let step = pid.step(0.8, 0.8);
            assert_eq!(step.control, 0.0);
            assert_eq!(step.output, 0.4);
        }
        assert_eq!(pid.state(), ControllerState::default());
    }

    #[test]
    fn test_first_step_terms() {
        let mut pid = FeedbackController::new(&reference(), 0.0).unwrap();
        let step = pid.step(1.0, 0.5);
        // error 0.5, integral 0.5, derivative 0.5
        assert_abs_diff_eq!(step.control, 2.0 * 0.5 + 0.5 * 0.5 + 1.2 * 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(step.output, 0.01 * step.control, epsilon = 1e-12);
        assert_eq!(pid.state().previous_error, 0.5);
    }

    #[test]
    fn test_integral_clamped() {
        let config = PidConfig {
            integral_limit: 2.0,
            ..reference()
        };
        let mut pid = FeedbackController::new(&config, 0.0).unwrap();
        for _ in 0..50 {
            pid.step(10.0, 0.0);
            assert!(pid.state().integral_error.abs() <= 2.0);
        }
        assert_eq!(pid.state().integral_error, 2.0);
        for _ in 0..50 {
            pid.step(-10.0, 0.0);
        }
        assert_eq!(pid.state().integral_error, -2.0);
    }

    #[test]
    fn test_zero_gains_freeze_output() {
        let config = PidConfig {
            gains: PidGains::new(0.0, 0.0, 0.0),
            ..reference()
        };
        let mut pid = FeedbackController::new(&config, 0.3).unwrap();
        let outputs = pid.simulate(1.0, &[0.0, 0.5, 2.0]);
        assert_eq!(outputs, vec![0.3, 0.3, 0.3]);
        assert_eq!(pid.state().previous_error, -1.0);
    }

    #[test]
    fn test_simulate_closes_on_setpoint() {
        let mut pid = FeedbackController::new(&reference(), 0.0).unwrap();
        let mut measured = 0.0;
        for _ in 0..2000 {
            measured = pid.step(0.8, measured).output;
        }
        assert!((measured - 0.8).abs() < 1e-3, "settled at {}", measured);
    }

    #[test]
    fn test_reset_restores_initial_output() {
        let mut pid = FeedbackController::new(&reference(), 0.25).unwrap();
        pid.simulate(1.0, &[0.0; 10]);
        assert_ne!(pid.output(), 0.25);
        pid.reset();
        assert_eq!(pid.output(), 0.25);
        assert_eq!(pid.state(), ControllerState::default());
    }

    #[test]
    fn test_invalid_gains_rejected() {
        let config = PidConfig {
            gains: PidGains::new(1.0, f64::NAN, 0.0),
            ..reference()
        };
        assert!(FeedbackController::new(&config, 0.0).is_err());
    }
}
