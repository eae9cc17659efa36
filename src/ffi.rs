//! Python FFI bindings via PyO3.
//!
//! Exposes the signal-processing pipeline and the two stateful controllers to
//! Python. Signals cross the boundary as `list[float]`; errors surface as
//! `ValueError`.
//!
//! # Building the Python extension
//!
//! ```bash
//! pip install maturin
//! maturin develop --features python-ffi
//! ```
//!
//! # Usage
//!
//! ```python
//! from harmonic_field_core import synthesize, bandpass, FeedbackController, ContainmentGuard
//!
//! buffers = synthesize(3, 3, "focus_center", 0.785, 3000.0, 96000.0, 0.01, [1.0, 2.0, 3.0])
//! center = dict(buffers)[4]
//! clean = bandpass(center, 3000.0, 400.0, 96000.0)
//!
//! pid = FeedbackController(2.0, 0.5, 1.2)
//! error, control, output = pid.step(0.8, 0.75)
//!
//! guard = ContainmentGuard()
//! print(guard.check([1.1, 1.15, 1.17], [0.3, 0.6], 0.81))   # "Tripped"
//! ```

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::array::{ArrayGeometry, ArrayModel, HarmonicWeight};
use crate::config::{PidConfig, SelfSyncConfig};
use crate::controller::{FeedbackController as RustController, PidGains};
use crate::error::HarmonicError;
use crate::filter;
use crate::guard::{ContainmentGuard as RustGuard, ContainmentState};
use crate::profile::{PhaseProfile, PhaseStrategy};
use crate::stability;
use crate::synth;
use crate::sync::SelfSyncCorrector;
use crate::telemetry::{FieldLimits, TelemetrySample};

fn to_py_err(err: HarmonicError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

fn parse_strategy(name: &str) -> PyResult<PhaseStrategy> {
    match name {
        "focus_center" => Ok(PhaseStrategy::FocusCenter),
        "radial_null" => Ok(PhaseStrategy::RadialNull),
        "alternating_null" => Ok(PhaseStrategy::AlternatingNull),
        "ring_offset" => Ok(PhaseStrategy::RingOffset),
        "tri_axis_lock" => Ok(PhaseStrategy::TriAxisLock),
        other => Err(PyValueError::new_err(format!("unknown strategy '{other}'"))),
    }
}

// ── Pure functions ───────────────────────────────────────────────────────────

/// Synthesize one buffer per element of a `rows × cols` grid at unit amplitude.
///
/// Returns `[(element_id, samples), ...]` ordered by id.
#[pyfunction]
#[pyo3(signature = (rows, cols, strategy, phase_constant, base_frequency, sample_rate, duration, multipliers=vec![1.0]))]
#[allow(clippy::too_many_arguments)]
pub fn synthesize(
    rows: usize,
    cols: usize,
    strategy: &str,
    phase_constant: f64,
    base_frequency: f64,
    sample_rate: f64,
    duration: f64,
    multipliers: Vec<f64>,
) -> PyResult<Vec<(u32, Vec<f64>)>> {
    let geometry = ArrayGeometry::grid(rows, cols);
    let profile = PhaseProfile::generate(&geometry, parse_strategy(strategy)?, phase_constant)
        .map_err(to_py_err)?;
    let model = ArrayModel::uniform(geometry, 1.0, 1.0).map_err(to_py_err)?;
    let set = synth::synthesize(
        &model.get_snapshot(),
        &profile,
        &HarmonicWeight::uniform(&multipliers),
        base_frequency,
        sample_rate,
        duration,
    )
    .map_err(to_py_err)?;
    Ok(set
        .ids()
        .into_iter()
        .filter_map(|id| set.get(id).map(|b| (id, b.samples().to_vec())))
        .collect())
}

/// Zero-phase 4th-order Butterworth bandpass around `target ± bandwidth / 2`.
#[pyfunction]
pub fn bandpass(
    signal: Vec<f64>,
    target_frequency: f64,
    bandwidth: f64,
    sample_rate: f64,
) -> PyResult<Vec<f64>> {
    filter::bandpass(&signal, target_frequency, bandwidth, sample_rate).map_err(to_py_err)
}

/// `(score, unstable)` from the first-difference spread of `signal`.
#[pyfunction]
pub fn evaluate_stability(signal: Vec<f64>, tolerance: f64) -> (f64, bool) {
    let v = stability::evaluate(&signal, tolerance);
    (v.score, v.unstable)
}

/// Add the bounded self-sync term to `signal`.
#[pyfunction]
#[pyo3(signature = (signal, gain=0.25, phase_shift=std::f64::consts::FRAC_PI_6))]
pub fn self_sync_correct(signal: Vec<f64>, gain: f64, phase_shift: f64) -> PyResult<Vec<f64>> {
    SelfSyncCorrector::new(&SelfSyncConfig { gain, phase_shift })
        .and_then(|c| c.correct(&signal))
        .map_err(to_py_err)
}

// ── FeedbackController ───────────────────────────────────────────────────────

/// Discrete PID with integrating output and a clamped integral.
#[pyclass(name = "FeedbackController")]
pub struct PyFeedbackController {
    inner: RustController,
}

#[pymethods]
impl PyFeedbackController {
    /// Create a controller.
    ///
    /// Args:
    ///     kp, ki, kd: non-negative gains
    ///     step_size: actuator integration step (default 0.01)
    ///     integral_limit: clamp on accumulated error (default 50.0)
    ///     initial_output: starting output (default 0.0)
    #[new]
    #[pyo3(signature = (kp, ki, kd, step_size=0.01, integral_limit=50.0, initial_output=0.0))]
    pub fn new(
        kp: f64,
        ki: f64,
        kd: f64,
        step_size: f64,
        integral_limit: f64,
        initial_output: f64,
    ) -> PyResult<Self> {
        let config = PidConfig {
            gains: PidGains::new(kp, ki, kd),
            step_size,
            integral_limit,
            ..PidConfig::default()
        };
        let inner = RustController::new(&config, initial_output).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// Advance one cycle; returns `(error, control, output)`.
    pub fn step(&mut self, setpoint: f64, measured: f64) -> (f64, f64, f64) {
        let s = self.inner.step(setpoint, measured);
        (s.error, s.control, s.output)
    }

    /// Output trajectory over `measurements`.
    pub fn simulate(&mut self, setpoint: f64, measurements: Vec<f64>) -> Vec<f64> {
        self.inner.simulate(setpoint, &measurements)
    }

    /// Clear state and restore the initial output.
    pub fn reset(&mut self) {
        self.inner.reset();
    }

    /// Current integrated output.
    #[getter]
    pub fn output(&self) -> f64 {
        self.inner.output()
    }

    /// Python repr string.
    pub fn __repr__(&self) -> String {
        let g = self.inner.gains();
        format!(
            "FeedbackController(kp={}, ki={}, kd={}, output={:.6})",
            g.kp,
            g.ki,
            g.kd,
            self.inner.output()
        )
    }
}

// ── ContainmentGuard ─────────────────────────────────────────────────────────

/// Latching interlock over hard field limits.
#[pyclass(name = "ContainmentGuard")]
pub struct PyContainmentGuard {
    inner: RustGuard,
}

#[pymethods]
impl PyContainmentGuard {
    /// Create an armed guard. Defaults are the standard hard limits.
    #[new]
    #[pyo3(signature = (max_amplitude=1.25, max_variance=0.12, max_phase_diff=0.6 * std::f64::consts::PI, min_coherence=0.85))]
    pub fn new(
        max_amplitude: f64,
        max_variance: f64,
        max_phase_diff: f64,
        min_coherence: f64,
    ) -> PyResult<Self> {
        let limits = FieldLimits {
            max_amplitude,
            max_variance,
            max_phase_diff,
            min_coherence,
        };
        Ok(Self {
            inner: RustGuard::new(limits).map_err(to_py_err)?,
        })
    }

    /// Evaluate one reading; returns `"Armed"` or `"Tripped"` (latched).
    pub fn check(&mut self, amplitudes: Vec<f64>, phase_diffs: Vec<f64>, coherence: f64) -> &'static str {
        let sample = TelemetrySample::new(0, amplitudes, phase_diffs, coherence);
        match self.inner.check(&sample) {
            ContainmentState::Armed => "Armed",
            ContainmentState::Tripped => "Tripped",
        }
    }

    /// External reset.
    pub fn reset(&mut self) {
        self.inner.reset();
    }

    /// `True` while tripped.
    #[getter]
    pub fn tripped(&self) -> bool {
        self.inner.is_tripped()
    }

    /// Trip reason name, or `None`.
    #[getter]
    pub fn reason(&self) -> Option<String> {
        self.inner.reason().map(|r| format!("{r:?}"))
    }
}

// ── Module entry point ───────────────────────────────────────────────────────

/// Harmonic field core Python bindings.
#[pymodule]
pub fn harmonic_field_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(synthesize, m)?)?;
    m.add_function(wrap_pyfunction!(bandpass, m)?)?;
    m.add_function(wrap_pyfunction!(evaluate_stability, m)?)?;
    m.add_function(wrap_pyfunction!(self_sync_correct, m)?)?;
    m.add_class::<PyFeedbackController>()?;
    m.add_class::<PyContainmentGuard>()?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
