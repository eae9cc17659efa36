//! Portable snapshot of a control loop for persistence and transport.
//!
//! A [`ControlSnapshot`] records everything that evolves at runtime: the cycle
//! counter, the latched containment state, controller memory and every element's
//! phase trim, amplitude and harmonic set. Configuration is not included; a snapshot is only
//! restored into a loop built from the same geometry.
//!
//! Restoring goes through [`ArrayModel::apply_corrections`](crate::array::ArrayModel::apply_corrections),
//! so it is atomic and bounded by the same amplitude limits as any correction.
//! Harmonic sets are checked before anything is written. A tripped snapshot
//! restores as tripped.
//!
//! This module requires the `serde` feature.

use crate::array::{ArrayElement, Correction, ElementId, HarmonicWeight};
use crate::controller::ControllerState;
use crate::error::{HarmonicError, Result};
use crate::guard::{ContainmentState, TripReason};
use crate::runtime::ControlLoop;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u16 = 1;

/// Serializable runtime state of one [`ControlLoop`].
///
/// ```rust,ignore
/// let snapshot = ControlSnapshot::from_loop(&control);
/// let json = snapshot.to_json()?;
/// ControlSnapshot::from_json(&json)?.restore_into(&mut fresh_loop)?;
/// ```
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct ControlSnapshot {
    /// Format version; [`SNAPSHOT_VERSION`] for new snapshots.
    pub version: u16,
    /// Cycles run at capture time.
    pub cycle: u64,
    /// Latched containment state.
    pub containment: ContainmentState,
    /// Trip reason when tripped.
    pub trip_reason: Option<TripReason>,
    /// Feedback controller memory.
    pub controller: ControllerRecord,
    /// Every element, ordered by id.
    pub elements: Vec<ElementRecord>,
}

/// Controller memory plus integrated output.
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ControllerRecord {
    /// Accumulated error.
    pub integral_error: f64,
    /// Previous step's error.
    pub previous_error: f64,
    /// Integrated actuator output.
    pub output: f64,
}

/// One element's mutable state.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct ElementRecord {
    /// Element id.
    pub id: ElementId,
    /// Phase trim, radians.
    pub phase: f64,
    /// Amplitude.
    pub amplitude: f64,
    /// Element-specific harmonic set, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub harmonic_weights: Vec<HarmonicWeight>,
}

impl From<&ArrayElement> for ElementRecord {
    fn from(e: &ArrayElement) -> Self {
        Self {
            id: e.id,
            phase: e.phase,
            amplitude: e.amplitude,
            harmonic_weights: e.harmonic_weights.clone(),
        }
    }
}

impl ControlSnapshot {
    /// Capture the runtime state of `control`.
    pub fn from_loop(control: &ControlLoop) -> Self {
        let ControllerState {
            integral_error,
            previous_error,
        } = control.controller_state();
        Self {
            version: SNAPSHOT_VERSION,
            cycle: control.cycle(),
            containment: control.state(),
            trip_reason: control.trip_reason(),
            controller: ControllerRecord {
                integral_error,
                previous_error,
                output: control.controller_output(),
            },
            elements: control.array().get_snapshot().iter().map(ElementRecord::from).collect(),
        }
    }

    /// Look up an element record.
    pub fn element(&self, id: ElementId) -> Option<&ElementRecord> {
        self.elements.iter().find(|e| e.id == id)
    }

    /// Serialise to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| HarmonicError::invalid_config(format!("snapshot encode error: {e}")))
    }

    /// Parse a JSON snapshot and check its version.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: ControlSnapshot = serde_json::from_str(json)
            .map_err(|e| HarmonicError::invalid_config(format!("snapshot parse error: {e}")))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(HarmonicError::invalid_config(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }

    /// Write this snapshot's state into `control`.
    ///
    /// Fails with `InvalidConfig` if the element ids differ from the loop's or a
    /// harmonic set is invalid, and with `OutOfRange` if an amplitude exceeds the
    /// loop's ceiling. Nothing is changed on failure.
    pub fn restore_into(&self, control: &mut ControlLoop) -> Result<()> {
        let array = control.array();
        let current = array.get_snapshot();
        let same_ids = current.len() == self.elements.len()
            && current.iter().all(|e| self.element(e.id).is_some());
        if !same_ids {
            return Err(HarmonicError::invalid_config(
                "snapshot elements do not match the loop geometry",
            ));
        }
        for record in &self.elements {
            HarmonicWeight::check_set(&record.harmonic_weights)?;
        }

        let corrections: Vec<Correction> = current
            .iter()
            .filter_map(|e| {
                self.element(e.id).map(|target| {
                    Correction::new(e.id, target.phase - e.phase, target.amplitude - e.amplitude)
                })
            })
            .collect();
        array.apply_corrections(&corrections)?;
        let weights: Vec<(ElementId, Vec<HarmonicWeight>)> = self
            .elements
            .iter()
            .map(|e| (e.id, e.harmonic_weights.clone()))
            .collect();
        array.replace_harmonic_weights(&weights)?;

        control.restore_controller(
            ControllerState {
                integral_error: self.controller.integral_error,
                previous_error: self.controller.previous_error,
            },
            self.controller.output,
            self.cycle,
        );
        if self.containment == ContainmentState::Tripped {
            control.restore_trip(self.trip_reason.unwrap_or(TripReason::Cancelled));
        }
        Ok(())
    }
}
