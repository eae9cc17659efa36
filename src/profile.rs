/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Phase profile generation over an array geometry.
//!
//! A [`PhaseProfile`] assigns one phase (radians) to every element id of a
//! geometry. Profiles are produced fresh for each reconfiguration by
//! [`PhaseProfile::generate`] and never mutated afterwards.
//!
//! | Strategy | Phase of element at `(row, col)`, index `i` of `n` |
//! |---|---|
//! | [`PhaseStrategy::FocusCenter`] | `−distance(center) × k` |
//! | [`PhaseStrategy::RadialNull`] | `k × manhattan(center) / (max(rows, cols) / 2)` |
//! | [`PhaseStrategy::AlternatingNull`] | `k × ((row + col) mod 2)` |
//! | [`PhaseStrategy::RingOffset`] | `k + 2π · i / n` |
//! | [`PhaseStrategy::TriAxisLock`] | `k + i · 2π/3`, exactly three channels |
//!
//! # Invariants
//!
//! - **Coverage**: a profile covers exactly the ids of its geometry.
//! - **Determinism**: same geometry, strategy and constant give an identical profile.

use core::f64::consts::PI;

use hashbrown::HashMap;

use crate::array::{ArrayElement, ArrayGeometry, ElementId};
use crate::error::{HarmonicError, Result};

/// Phase assignment strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PhaseStrategy {
    /// Radial phase lag from the geometric center; forms a constructive focal point.
    FocusCenter,
    /// Phase grows with Manhattan distance from the center cell; shapes a null boundary.
    RadialNull,
    /// Checkerboard of `0` and `k`; with `k = π` neighbours cancel.
    AlternatingNull,
    /// Evenly spread phases around the ring for N-fold rotational symmetry.
    RingOffset,
    /// Fixed 120° steps across exactly three channels.
    TriAxisLock,
}

impl PhaseStrategy {
    /// Phase for the element at `(row, col)` with row-major `index` out of `count`.
    fn phase_at(
        self,
        geometry: &ArrayGeometry,
        index: usize,
        count: usize,
        row: usize,
        col: usize,
        k: f64,
    ) -> f64 {
        match self {
            PhaseStrategy::FocusCenter => {
                let (cr, cc) = geometry.center();
                let dr = row as f64 - cr;
                let dc = col as f64 - cc;
                -((dr * dr + dc * dc).sqrt() * k)
            }
            PhaseStrategy::RadialNull => {
                let manhattan = row.abs_diff(geometry.rows / 2) + col.abs_diff(geometry.cols / 2);
                let half_span = geometry.rows.max(geometry.cols) as f64 / 2.0;
                k * manhattan as f64 / half_span
            }
            PhaseStrategy::AlternatingNull => {
                if (row + col) % 2 == 0 {
                    0.0
                } else {
                    k
                }
            }
            PhaseStrategy::RingOffset => {
                k + 2.0 * PI * index as f64 / count as f64
            }
            PhaseStrategy::TriAxisLock => k + index as f64 * 2.0 * PI / 3.0,
        }
    }
}

/// Immutable mapping from element id to phase in radians.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseProfile {
    phases: HashMap<ElementId, f64>,
}

impl PhaseProfile {
    /// Generate a profile for `geometry` under `strategy` with phase constant `k`.
    ///
    /// Fails with `InvalidConfig` for an empty or oversized geometry, a non-finite constant, or a
    /// [`PhaseStrategy::TriAxisLock`] request on anything other than three elements.
    pub fn generate(geometry: &ArrayGeometry, strategy: PhaseStrategy, k: f64) -> Result<Self> {
        let count = geometry.element_count()?;
        if count == 0 {
            return Err(HarmonicError::invalid_config("cannot profile an empty geometry"));
        }
        if !k.is_finite() {
            return Err(HarmonicError::invalid_config(format!(
                "phase constant must be finite, got {k}"
            )));
        }
        if strategy == PhaseStrategy::TriAxisLock && count != 3 {
            return Err(HarmonicError::invalid_config(format!(
                "tri-axis lock needs exactly 3 channels, geometry has {count}"
            )));
        }

        let phases = geometry
            .positions()
            .map(|(id, row, col)| {
                (id, strategy.phase_at(geometry, id as usize, count, row, col, k))
            })
            .collect();
        Ok(Self { phases })
    }

    /// Build a profile from explicit `(id, phase)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (ElementId, f64)>) -> Self {
        Self {
            phases: pairs.into_iter().collect(),
        }
    }

    /// Phase of `id`, if covered.
    pub fn get(&self, id: ElementId) -> Option<f64> {
        self.phases.get(&id).copied()
    }

    /// Number of covered elements.
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// `true` if no element is covered.
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Iterate `(id, phase)` in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (ElementId, f64)> + '_ {
        self.phases.iter().map(|(&id, &phase)| (id, phase))
    }

    /// `true` if this profile covers exactly the ids of `elements`.
    pub fn covers(&self, elements: &[ArrayElement]) -> bool {
        elements.len() == self.phases.len()
            && elements.iter().all(|e| self.phases.contains_key(&e.id))
    }

    /// New profile with each element's phase trim added to its profile phase.
    ///
    /// Ids not present in `elements` keep their profile phase.
    pub fn with_trims(&self, elements: &[ArrayElement]) -> Self {
        let mut phases = self.phases.clone();
        for element in elements {
            if let Some(phase) = phases.get_mut(&element.id) {
                *phase += element.phase;
            }
        }
        Self { phases }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
