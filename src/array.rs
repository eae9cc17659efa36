/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Array model: the authoritative per-element phase, amplitude and harmonic state.
//!
//! - [`ArrayGeometry`]: rectangular row-major layout of the actuator array.
//! - [`ArrayElement`]: one actuator's phase trim, gain and optional harmonic weights.
//! - [`ArrayModel`]: owns the elements behind a single mutation entry point.
//!
//! # Invariants
//!
//! - **Unique ids**: element ids are exactly the ids of the geometry, each once.
//! - **Bounded gain**: every amplitude stays in `[0, max_amplitude]`; a correction
//!   that would leave that range is rejected and the previous state retained.
//! - **Additive writers**: concurrent corrections are serialised behind one lock and
//!   applied as deltas to the current state, so no writer's delta is lost.

use core::f64::consts::PI;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{HarmonicError, Result};

/// Identifier of one actuator element.
pub type ElementId = u32;

/// Largest element count a geometry may describe.
pub const MAX_ELEMENTS: usize = 4096;

// ─── Harmonic weights ───────────────────────────────────────────────────────

/// One term of a composite waveform: `weight × sin(2π · base · multiplier · t + φ)`.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HarmonicWeight {
    /// Multiple of the base frequency.
    pub multiplier: f64,
    /// Scalar applied to this harmonic before normalisation.
    pub weight: f64,
}

impl HarmonicWeight {
    /// Construct a harmonic term.
    pub fn new(multiplier: f64, weight: f64) -> Self {
        Self { multiplier, weight }
    }

    /// Equal-weight harmonic set for the given multipliers.
    pub fn uniform(multipliers: &[f64]) -> Vec<Self> {
        multipliers.iter().map(|&m| Self::new(m, 1.0)).collect()
    }

    /// Check an element-specific set: either empty, or finite terms whose weights
    /// do not sum to zero.
    pub fn check_set(weights: &[Self]) -> Result<()> {
        if weights
            .iter()
            .any(|h| !h.weight.is_finite() || !(h.multiplier.is_finite() && h.multiplier > 0.0))
        {
            return Err(HarmonicError::invalid_config(
                "element harmonic weights must be finite with positive multipliers",
            ));
        }
        if !weights.is_empty() && weights.iter().map(|h| h.weight.abs()).sum::<f64>() == 0.0 {
            return Err(HarmonicError::invalid_config("element harmonic weights sum to zero"));
        }
        Ok(())
    }
}

// ─── Geometry ───────────────────────────────────────────────────────────────

/// Rectangular actuator layout. Element ids are assigned row-major:
/// `id = row × cols + col`.
///
/// A ring or a three-channel interlock is a `1 × n` geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArrayGeometry {
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
}

impl ArrayGeometry {
    /// Rectangular `rows × cols` layout.
    pub fn grid(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Square `size × size` layout.
    pub fn square(size: usize) -> Self {
        Self::grid(size, size)
    }

    /// Single row of `count` elements.
    pub fn line(count: usize) -> Self {
        Self::grid(1, count)
    }

    /// Total element count.
    ///
    /// Fails with `InvalidConfig` if `rows × cols` overflows or exceeds [`MAX_ELEMENTS`].
    pub fn element_count(&self) -> Result<usize> {
        match self.rows.checked_mul(self.cols) {
            Some(count) if count <= MAX_ELEMENTS => Ok(count),
            _ => Err(HarmonicError::invalid_config(format!(
                "geometry {}x{} exceeds {} elements",
                self.rows, self.cols, MAX_ELEMENTS
            ))),
        }
    }

    /// Geometric center `(row, col)`; lies between elements for even dimensions.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.rows as f64 - 1.0) / 2.0,
            (self.cols as f64 - 1.0) / 2.0,
        )
    }

    /// `(row, col)` of an element id, or `None` if the id is outside the layout.
    pub fn position_of(&self, id: ElementId) -> Option<(usize, usize)> {
        let idx = id as usize;
        let count = self.element_count().ok()?;
        if self.cols == 0 || idx >= count {
            return None;
        }
        Some((idx / self.cols, idx % self.cols))
    }

    /// Iterate `(id, row, col)` over every element in row-major order.
    ///
    /// Yields nothing for a geometry whose element count is invalid.
    pub fn positions(&self) -> impl Iterator<Item = (ElementId, usize, usize)> + '_ {
        (0..self.element_count().unwrap_or(0)).map(move |idx| {
            (idx as ElementId, idx / self.cols, idx % self.cols)
        })
    }
}

// ─── Elements ───────────────────────────────────────────────────────────────

/// One actuator element.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArrayElement {
    /// Unique element id (row-major index in the geometry).
    pub id: ElementId,
    /// Phase trim in radians, added on top of the active phase profile.
    pub phase: f64,
    /// Unitless gain; bounds the peak of this element's synthesized buffer.
    pub amplitude: f64,
    /// Element-specific harmonic set. Empty means "use the synthesis default".
    pub harmonic_weights: Vec<HarmonicWeight>,
}

impl ArrayElement {
    /// Element with zero phase trim and the default harmonic set.
    pub fn new(id: ElementId, amplitude: f64) -> Self {
        Self {
            id,
            phase: 0.0,
            amplitude,
            harmonic_weights: Vec::new(),
        }
    }
}

/// A phase/amplitude delta addressed to one element.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Correction {
    /// Target element.
    pub element_id: ElementId,
    /// Phase delta in radians.
    pub delta_phase: f64,
    /// Amplitude delta.
    pub delta_amplitude: f64,
}

impl Correction {
    /// Construct a correction.
    pub fn new(element_id: ElementId, delta_phase: f64, delta_amplitude: f64) -> Self {
        Self {
            element_id,
            delta_phase,
            delta_amplitude,
        }
    }
}

/// Wrap a phase into `[-π, π)`.
pub fn wrap_phase(phase: f64) -> f64 {
    (phase + PI).rem_euclid(2.0 * PI) - PI
}

// ─── Array Model ────────────────────────────────────────────────────────────

struct ArrayState {
    elements: Vec<ArrayElement>,
    index: HashMap<ElementId, usize>,
}

impl ArrayState {
    fn slot(&self, id: ElementId) -> Result<usize> {
        self.index
            .get(&id)
            .copied()
            .ok_or_else(|| HarmonicError::out_of_range(id, "unknown element id"))
    }

    /// Resulting amplitude if `correction` were applied, or the rejection.
    fn checked_amplitude(&self, slot: usize, correction: &Correction, max: f64) -> Result<f64> {
        let amplitude = self.elements[slot].amplitude + correction.delta_amplitude;
        if !amplitude.is_finite() || !correction.delta_phase.is_finite() {
            return Err(HarmonicError::out_of_range(
                correction.element_id,
                "non-finite correction",
            ));
        }
        if amplitude > max {
            return Err(HarmonicError::out_of_range(
                correction.element_id,
                format!("amplitude {amplitude:.6} above maximum {max:.6}"),
            ));
        }
        if amplitude < 0.0 {
            return Err(HarmonicError::out_of_range(
                correction.element_id,
                format!("amplitude {amplitude:.6} below zero"),
            ));
        }
        Ok(amplitude)
    }
}

/// Authoritative array state.
///
/// Shared between the feedback path and the self-sync path (typically behind an
/// `Arc`); all mutation goes through [`ArrayModel::apply_correction`] or
/// [`ArrayModel::apply_corrections`].
pub struct ArrayModel {
    geometry: ArrayGeometry,
    max_amplitude: f64,
    state: Mutex<ArrayState>,
}

impl ArrayModel {
    /// Build a model from explicit elements.
    ///
    /// Fails with `InvalidConfig` if the element ids are not exactly the geometry's
    /// ids, or if any amplitude lies outside `[0, max_amplitude]`.
    pub fn new(
        geometry: ArrayGeometry,
        mut elements: Vec<ArrayElement>,
        max_amplitude: f64,
    ) -> Result<Self> {
        let count = geometry.element_count()?;
        if count == 0 {
            return Err(HarmonicError::invalid_config("array geometry has no elements"));
        }
        if !(max_amplitude.is_finite() && max_amplitude > 0.0) {
            return Err(HarmonicError::invalid_config(format!(
                "max element amplitude must be positive and finite, got {max_amplitude}"
            )));
        }
        if elements.len() != count {
            return Err(HarmonicError::invalid_config(format!(
                "geometry {}x{} expects {} elements, got {}",
                geometry.rows,
                geometry.cols,
                count,
                elements.len()
            )));
        }

        elements.sort_by_key(|e| e.id);
        let mut index = HashMap::with_capacity(elements.len());
        for (slot, element) in elements.iter().enumerate() {
            if geometry.position_of(element.id).is_none() {
                return Err(HarmonicError::invalid_config(format!(
                    "element id {} outside geometry",
                    element.id
                )));
            }
            if index.insert(element.id, slot).is_some() {
                return Err(HarmonicError::invalid_config(format!(
                    "duplicate element id {}",
                    element.id
                )));
            }
            if !(element.amplitude >= 0.0 && element.amplitude <= max_amplitude) {
                return Err(HarmonicError::invalid_config(format!(
                    "element {} amplitude {} outside [0, {}]",
                    element.id, element.amplitude, max_amplitude
                )));
            }
        }

        Ok(Self {
            geometry,
            max_amplitude,
            state: Mutex::new(ArrayState { elements, index }),
        })
    }

    /// Every element at `amplitude` with zero phase trim and the default harmonic set.
    pub fn uniform(geometry: ArrayGeometry, amplitude: f64, max_amplitude: f64) -> Result<Self> {
        let elements = geometry
            .positions()
            .map(|(id, _, _)| ArrayElement::new(id, amplitude))
            .collect();
        Self::new(geometry, elements, max_amplitude)
    }

    /// Layout of the array.
    pub fn geometry(&self) -> ArrayGeometry {
        self.geometry
    }

    /// Configured amplitude ceiling.
    pub fn max_amplitude(&self) -> f64 {
        self.max_amplitude
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.state.lock().elements.len()
    }

    /// `true` if the model holds no elements (never the case for a constructed model).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-only copy of every element, ordered by id.
    pub fn get_snapshot(&self) -> Vec<ArrayElement> {
        self.state.lock().elements.clone()
    }

    /// Apply a phase/amplitude delta to one element.
    ///
    /// Fails with `OutOfRange` for an unknown id or if the resulting amplitude would
    /// leave `[0, max_amplitude]`; the element is left untouched in that case.
    pub fn apply_correction(
        &self,
        id: ElementId,
        delta_phase: f64,
        delta_amplitude: f64,
    ) -> Result<()> {
        self.apply_corrections(&[Correction::new(id, delta_phase, delta_amplitude)])
    }

    /// Apply a batch of deltas atomically: either every correction lands or none does.
    ///
    /// Several corrections for the same element accumulate.
    pub fn apply_corrections(&self, corrections: &[Correction]) -> Result<()> {
        let mut state = self.state.lock();

        // Validate the whole batch against the cumulative result before writing.
        let mut pending: HashMap<usize, (f64, f64)> = HashMap::with_capacity(corrections.len());
        for correction in corrections {
            let slot = state.slot(correction.element_id)?;
            let (acc_phase, acc_amp) = pending.get(&slot).copied().unwrap_or((0.0, 0.0));
            let merged = Correction::new(
                correction.element_id,
                acc_phase + correction.delta_phase,
                acc_amp + correction.delta_amplitude,
            );
            if let Err(err) = state.checked_amplitude(slot, &merged, self.max_amplitude) {
                warn!(element = correction.element_id, %err, "correction rejected");
                return Err(err);
            }
            pending.insert(slot, (merged.delta_phase, merged.delta_amplitude));
        }

        for (slot, (delta_phase, delta_amplitude)) in pending {
            let element = &mut state.elements[slot];
            element.phase = wrap_phase(element.phase + delta_phase);
            element.amplitude += delta_amplitude;
        }
        debug!(count = corrections.len(), "corrections applied");
        Ok(())
    }

    /// Replace the harmonic sets of several elements atomically.
    ///
    /// Fails with `OutOfRange` for an unknown id, or `InvalidConfig` for a set
    /// rejected by [`HarmonicWeight::check_set`]; nothing is written in either case.
    pub fn replace_harmonic_weights(&self, updates: &[(ElementId, Vec<HarmonicWeight>)]) -> Result<()> {
        let mut state = self.state.lock();
        let mut slots = Vec::with_capacity(updates.len());
        for (id, weights) in updates {
            slots.push(state.slot(*id)?);
            HarmonicWeight::check_set(weights)?;
        }
        for (slot, (_, weights)) in slots.into_iter().zip(updates) {
            state.elements[slot].harmonic_weights = weights.clone();
        }
        debug!(count = updates.len(), "harmonic weights replaced");
        Ok(())
    }
}

impl core::fmt::Debug for ArrayModel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ArrayModel")
            .field("geometry", &self.geometry)
            .field("max_amplitude", &self.max_amplitude)
            .field("element_count", &self.len())
            .finish()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_model() -> ArrayModel {
        ArrayModel::uniform(ArrayGeometry::square(4), 0.5, 1.0).unwrap()
    }

    #[test]
    fn test_geometry_positions_row_major() {
        let g = ArrayGeometry::grid(2, 3);
        let positions: Vec<_> = g.positions().collect();
        assert_eq!(positions.len(), 6);
        assert_eq!(positions[4], (4, 1, 1));
        assert_eq!(g.position_of(5), Some((1, 2)));
        assert_eq!(g.position_of(6), None);
    }

    #[test]
    fn test_geometry_center_even_and_odd() {
        assert_eq!(ArrayGeometry::square(8).center(), (3.5, 3.5));
        assert_eq!(ArrayGeometry::square(5).center(), (2.0, 2.0));
    }

    #[test]
    fn test_snapshot_is_ordered_copy() {
        let model = grid_model();
        let snap = model.get_snapshot();
        assert_eq!(snap.len(), 16);
        assert!(snap.windows(2).all(|w| w[0].id < w[1].id));

        model.apply_correction(0, 0.1, 0.1).unwrap();
        assert!((snap[0].amplitude - 0.5).abs() < 1e-12, "snapshot must not alias");
    }

    #[test]
    fn test_apply_correction_updates_state() {
        let model = grid_model();
        model.apply_correction(5, 0.25, 0.2).unwrap();
        let el = &model.get_snapshot()[5];
        assert!((el.phase - 0.25).abs() < 1e-12);
        assert!((el.amplitude - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_apply_correction_rejects_over_max() {
        let model = grid_model();
        let err = model.apply_correction(2, 0.0, 0.6).unwrap_err();
        assert!(matches!(err, HarmonicError::OutOfRange { element_id: 2, .. }));
        assert!((model.get_snapshot()[2].amplitude - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_apply_correction_rejects_negative_amplitude() {
        let model = grid_model();
        assert!(model.apply_correction(1, 0.0, -0.6).is_err());
    }

    #[test]
    fn test_apply_correction_unknown_id() {
        let model = grid_model();
        let err = model.apply_correction(99, 0.0, 0.0).unwrap_err();
        assert!(matches!(err, HarmonicError::OutOfRange { element_id: 99, .. }));
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let model = grid_model();
        let batch = [
            Correction::new(0, 0.1, 0.1),
            Correction::new(1, 0.0, 0.3),
            Correction::new(1, 0.0, 0.3), // cumulative 1.1 > 1.0
        ];
        assert!(model.apply_corrections(&batch).is_err());
        let snap = model.get_snapshot();
        assert!((snap[0].amplitude - 0.5).abs() < 1e-12);
        assert!((snap[1].amplitude - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_same_element_deltas_accumulate() {
        let model = grid_model();
        model
            .apply_corrections(&[Correction::new(3, 0.1, 0.1), Correction::new(3, 0.2, 0.1)])
            .unwrap();
        let el = &model.get_snapshot()[3];
        assert!((el.phase - 0.3).abs() < 1e-12);
        assert!((el.amplitude - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_new_rejects_duplicate_ids() {
        let g = ArrayGeometry::line(2);
        let elements = vec![ArrayElement::new(0, 0.5), ArrayElement::new(0, 0.5)];
        assert!(ArrayModel::new(g, elements, 1.0).is_err());
    }

    #[test]
    fn test_new_rejects_wrong_count_and_foreign_ids() {
        let g = ArrayGeometry::line(2);
        assert!(ArrayModel::new(g, vec![ArrayElement::new(0, 0.5)], 1.0).is_err());
        let foreign = vec![ArrayElement::new(0, 0.5), ArrayElement::new(7, 0.5)];
        assert!(ArrayModel::new(g, foreign, 1.0).is_err());
    }

    #[test]
    fn test_geometry_overflow_rejected() {
        let huge = ArrayGeometry::grid(usize::MAX, 2);
        assert!(matches!(huge.element_count(), Err(HarmonicError::InvalidConfig { .. })));
        assert_eq!(huge.position_of(0), None);
        assert_eq!(huge.positions().count(), 0);
        assert!(ArrayModel::uniform(huge, 0.5, 1.0).is_err());

        assert!(ArrayGeometry::grid(MAX_ELEMENTS + 1, 1).element_count().is_err());
        assert_eq!(ArrayGeometry::grid(MAX_ELEMENTS, 1).element_count().unwrap(), MAX_ELEMENTS);
    }

    #[test]
    fn test_replace_harmonic_weights_is_atomic() {
        let model = grid_model();
        let thirds = vec![HarmonicWeight::new(3.0, 1.0)];
        model.replace_harmonic_weights(&[(4, thirds.clone())]).unwrap();
        assert_eq!(model.get_snapshot()[4].harmonic_weights, thirds);

        let silent = vec![HarmonicWeight::new(2.0, 0.0)];
        assert!(model
            .replace_harmonic_weights(&[(5, thirds.clone()), (6, silent)])
            .is_err());
        assert!(model
            .replace_harmonic_weights(&[(5, thirds.clone()), (99, Vec::new())])
            .is_err());
        assert!(model.get_snapshot()[5].harmonic_weights.is_empty());

        model.replace_harmonic_weights(&[(4, Vec::new())]).unwrap();
        assert!(model.get_snapshot()[4].harmonic_weights.is_empty());
    }

    #[test]
    fn test_wrap_phase_range() {
        for raw in [-7.0, -PI, 0.0, PI, 4.0, 13.0] {
            let w = wrap_phase(raw);
            assert!((-PI..PI).contains(&w), "wrap({})={}", raw, w);
            assert!((w.sin() - raw.sin()).abs() < 1e-9);
            assert!((w.cos() - raw.cos()).abs() < 1e-9);
        }
    }
}
