/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Waveform synthesis: array + phase profile + harmonic weights → per-element buffers.
//!
//! For each element with amplitude `A`, phase `φ` from the profile and harmonic
//! terms `(mₖ, wₖ)`:
//!
//! ```text
//! x[n] = A · Σₖ wₖ · sin(2π · f₀ · mₖ · tₙ + φ) / Σₖ |wₖ|,   tₙ = n / fs,  n ∈ [0, fs·T)
//! ```
//!
//! The time base is half-open: there is no sample at `t = T`.
//!
//! # Invariants
//!
//! - **Equal length**: every buffer of one call holds exactly `fs × T` samples.
//! - **Bounded peak**: `|x[n]| ≤ A` for every element.
//! - **Immutable output**: buffers are never mutated; transforms build new buffers.

use core::f64::consts::PI;

use hashbrown::HashMap;
use tracing::debug;

use crate::array::{ArrayElement, ElementId, HarmonicWeight};
use crate::config::SynthesisConfig;
use crate::error::{HarmonicError, Result};
use crate::profile::PhaseProfile;

// ─── Buffers ────────────────────────────────────────────────────────────────

/// Samples for one element over one synthesis window.
#[derive(Clone, Debug, PartialEq)]
pub struct WaveformBuffer {
    element_id: ElementId,
    sample_rate: f64,
    samples: Vec<f64>,
}

impl WaveformBuffer {
    /// Wrap already-computed samples.
    pub fn from_samples(element_id: ElementId, sample_rate: f64, samples: Vec<f64>) -> Self {
        Self {
            element_id,
            sample_rate,
            samples,
        }
    }

    /// Element this buffer drives.
    pub fn element_id(&self) -> ElementId {
        self.element_id
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Sample values.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// `true` if the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Largest absolute sample value.
    pub fn peak(&self) -> f64 {
        peak(&self.samples)
    }

    /// Sum of squared samples.
    pub fn energy(&self) -> f64 {
        energy(&self.samples)
    }
}

/// Largest absolute value of a signal (0 for an empty signal).
pub fn peak(signal: &[f64]) -> f64 {
    signal.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()))
}

/// Sum of squares of a signal.
pub fn energy(signal: &[f64]) -> f64 {
    signal.iter().map(|x| x * x).sum()
}

/// One synthesis call's output: a buffer per element, all the same length.
#[derive(Clone, Debug, PartialEq)]
pub struct WaveformSet {
    sample_rate: f64,
    sample_count: usize,
    buffers: HashMap<ElementId, WaveformBuffer>,
}

impl WaveformSet {
    /// Assemble a set from externally produced buffers.
    ///
    /// Every buffer must carry `sample_rate`, a unique id and the same length.
    pub fn from_buffers(sample_rate: f64, buffers: Vec<WaveformBuffer>) -> Result<Self> {
        let sample_count = buffers.first().map_or(0, WaveformBuffer::len);
        let mut map = HashMap::with_capacity(buffers.len());
        for buffer in buffers {
            if buffer.sample_rate != sample_rate || buffer.len() != sample_count {
                return Err(HarmonicError::invalid_config(format!(
                    "buffer for element {} does not match set shape ({} Hz, {} samples)",
                    buffer.element_id, sample_rate, sample_count
                )));
            }
            let id = buffer.element_id;
            if map.insert(id, buffer).is_some() {
                return Err(HarmonicError::invalid_config(format!(
                    "duplicate buffer for element {id}"
                )));
            }
        }
        Ok(Self {
            sample_rate,
            sample_count,
            buffers: map,
        })
    }

    /// Sample rate shared by every buffer.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Samples per buffer.
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Number of element buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// `true` if no element buffer is present.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffer for one element.
    pub fn get(&self, id: ElementId) -> Option<&WaveformBuffer> {
        self.buffers.get(&id)
    }

    /// Iterate all buffers in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &WaveformBuffer> + '_ {
        self.buffers.values()
    }

    /// Element ids in ascending order.
    pub fn ids(&self) -> Vec<ElementId> {
        let mut ids: Vec<ElementId> = self.buffers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Largest peak across all buffers.
    pub fn peak(&self) -> f64 {
        self.buffers.values().map(WaveformBuffer::peak).fold(0.0, f64::max)
    }

    /// Per-sample mean across every element buffer (the linked-ring feedback signal).
    pub fn mean_field(&self) -> Vec<f64> {
        let mut field = vec![0.0; self.sample_count];
        if self.buffers.is_empty() {
            return field;
        }
        for id in self.ids() {
            if let Some(buffer) = self.buffers.get(&id) {
                for (acc, x) in field.iter_mut().zip(buffer.samples()) {
                    *acc += x;
                }
            }
        }
        let n = self.buffers.len() as f64;
        field.iter_mut().for_each(|x| *x /= n);
        field
    }

    /// New set with `transform` applied to every buffer's samples.
    ///
    /// The transform must preserve length; the first error aborts the whole set.
    pub fn try_map<F>(&self, mut transform: F) -> Result<WaveformSet>
    where
        F: FnMut(ElementId, &[f64]) -> Result<Vec<f64>>,
    {
        let mut buffers = HashMap::with_capacity(self.buffers.len());
        for id in self.ids() {
            let Some(buffer) = self.buffers.get(&id) else {
                continue;
            };
            let samples = transform(id, buffer.samples())?;
            if samples.len() != self.sample_count {
                return Err(HarmonicError::invalid_config(format!(
                    "transform changed buffer length for element {id}: {} -> {}",
                    self.sample_count,
                    samples.len()
                )));
            }
            buffers.insert(id, WaveformBuffer::from_samples(id, self.sample_rate, samples));
        }
        Ok(WaveformSet {
            sample_rate: self.sample_rate,
            sample_count: self.sample_count,
            buffers,
        })
    }
}

/// Sample-by-sample sum of two equal-length signals (interference output).
pub fn superpose(a: &[f64], b: &[f64]) -> Result<Vec<f64>> {
    if a.len() != b.len() {
        return Err(HarmonicError::invalid_config(format!(
            "cannot superpose signals of length {} and {}",
            a.len(),
            b.len()
        )));
    }
    Ok(a.iter().zip(b).map(|(x, y)| x + y).collect())
}

// ─── Synthesis ──────────────────────────────────────────────────────────────

/// Largest per-element buffer length, in samples.
pub const MAX_SAMPLES: usize = 1 << 22;

/// Number of samples in `[0, duration)` at `sample_rate`.
///
/// Products within 1e-9 of an integer round to it, so `192 kHz × 0.01 s` is
/// 1920 samples regardless of binary representation error. Fails with
/// `InvalidConfig` above [`MAX_SAMPLES`].
pub fn sample_count(sample_rate: f64, duration: f64) -> Result<usize> {
    let raw = sample_rate * duration;
    if !(raw.is_finite() && sample_rate > 0.0 && duration > 0.0) {
        return Err(HarmonicError::invalid_config(format!(
            "sample_rate × duration must be positive and finite, got {sample_rate} × {duration}"
        )));
    }
    let rounded = raw.round();
    let count = if (raw - rounded).abs() < 1e-9 {
        rounded
    } else {
        raw.floor()
    };
    if count < 1.0 {
        return Err(HarmonicError::invalid_config(format!(
            "sample_rate × duration yields no samples ({raw})"
        )));
    }
    if count > MAX_SAMPLES as f64 {
        return Err(HarmonicError::invalid_config(format!(
            "sample_rate × duration yields {count} samples, limit is {MAX_SAMPLES}"
        )));
    }
    Ok(count as usize)
}

fn weight_norm(weights: &[HarmonicWeight]) -> Result<f64> {
    if weights.is_empty() {
        return Err(HarmonicError::invalid_config("harmonic weights are empty"));
    }
    if weights
        .iter()
        .any(|h| !h.weight.is_finite() || !h.multiplier.is_finite())
    {
        return Err(HarmonicError::invalid_config("harmonic weights must be finite"));
    }
    let norm: f64 = weights.iter().map(|h| h.weight.abs()).sum();
    if norm <= 0.0 {
        return Err(HarmonicError::invalid_config("harmonic weights sum to zero"));
    }
    Ok(norm)
}

/// Synthesize one buffer per element.
///
/// `harmonic_weights` is the default harmonic set; an element with its own
/// non-empty set uses that instead. Fails with `InvalidConfig` if the sample count
/// is non-positive, the default set is empty, the base frequency is not positive,
/// or the profile does not cover every element.
pub fn synthesize(
    elements: &[ArrayElement],
    profile: &PhaseProfile,
    harmonic_weights: &[HarmonicWeight],
    base_frequency: f64,
    sample_rate: f64,
    duration: f64,
) -> Result<WaveformSet> {
    let count = sample_count(sample_rate, duration)?;
    let default_norm = weight_norm(harmonic_weights)?;
    if !(base_frequency.is_finite() && base_frequency > 0.0) {
        return Err(HarmonicError::invalid_config(format!(
            "base frequency must be positive, got {base_frequency}"
        )));
    }

    let mut buffers = HashMap::with_capacity(elements.len());
    for element in elements {
        let phase = profile.get(element.id).ok_or_else(|| {
            HarmonicError::invalid_config(format!(
                "phase profile does not cover element {}",
                element.id
            ))
        })?;
        let (weights, norm) = if element.harmonic_weights.is_empty() {
            (harmonic_weights, default_norm)
        } else {
            (
                element.harmonic_weights.as_slice(),
                weight_norm(&element.harmonic_weights)?,
            )
        };

        let scale = element.amplitude / norm;
        let samples: Vec<f64> = (0..count)
            .map(|n| {
                let t = n as f64 / sample_rate;
                let sum: f64 = weights
                    .iter()
                    .map(|h| h.weight * (2.0 * PI * base_frequency * h.multiplier * t + phase).sin())
                    .sum();
                sum * scale
            })
            .collect();
        buffers.insert(
            element.id,
            WaveformBuffer::from_samples(element.id, sample_rate, samples),
        );
    }

    debug!(
        elements = elements.len(),
        samples = count,
        base_frequency,
        "waveforms synthesized"
    );
    Ok(WaveformSet {
        sample_rate,
        sample_count: count,
        buffers,
    })
}

/// Synthesizer bound to a validated [`SynthesisConfig`].
#[derive(Clone, Debug)]
pub struct Synthesizer {
    config: SynthesisConfig,
}

impl Synthesizer {
    /// Validate `config` and bind it.
    pub fn new(config: SynthesisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Bound configuration.
    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Synthesize `elements` under `profile` with the bound parameters.
    pub fn render(&self, elements: &[ArrayElement], profile: &PhaseProfile) -> Result<WaveformSet> {
        synthesize(
            elements,
            profile,
            &self.config.harmonic_weights,
            self.config.base_frequency,
            self.config.sample_rate,
            self.config.duration,
        )
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::ArrayGeometry;
    use crate::profile::PhaseStrategy;

    fn elements(n: u32, amplitude: f64) -> Vec<ArrayElement> {
        (0..n).map(|id| ArrayElement::new(id, amplitude)).collect()
    }

    fn harmonics_369() -> Vec<HarmonicWeight> {
        HarmonicWeight::uniform(&[1.0, 2.0, 3.0])
    }

    #[test]
    fn test_sample_count_half_open() {
        assert_eq!(sample_count(192_000.0, 0.01).unwrap(), 1920);
        assert_eq!(sample_count(192_000.0, 0.015).unwrap(), 2880);
        assert_eq!(sample_count(100.0, 0.29).unwrap(), 29);
        assert!(sample_count(0.0, 1.0).is_err());
        assert!(sample_count(1000.0, -0.1).is_err());
        assert!(sample_count(10.0, 0.01).is_err());
        assert_eq!(sample_count(MAX_SAMPLES as f64, 1.0).unwrap(), MAX_SAMPLES);
        assert!(sample_count(MAX_SAMPLES as f64 + 1.0, 1.0).is_err());
        assert!(sample_count(1e19, 1.0).is_err());
    }

    #[test]
    fn test_equal_length_buffers() {
        let els = elements(4, 1.0);
        let profile =
            PhaseProfile::generate(&ArrayGeometry::square(2), PhaseStrategy::FocusCenter, 0.5).unwrap();
        let set = synthesize(&els, &profile, &harmonics_369(), 3000.0, 96_000.0, 0.01).unwrap();
        assert_eq!(set.len(), 4);
        assert!(set.iter().all(|b| b.len() == 960));
        assert_eq!(set.sample_count(), 960);
    }

    #[test]
    fn test_first_sample_is_phase_sine() {
        let els = elements(1, 1.0);
        let profile = PhaseProfile::from_pairs([(0, 0.7)]);
        let set = synthesize(&els, &profile, &harmonics_369(), 3000.0, 96_000.0, 0.01).unwrap();
        let first = set.get(0).unwrap().samples()[0];
        // All harmonics start at sin(φ); normalised by 3 weights then summed 3 times.
        assert!((first - 0.7_f64.sin()).abs() < 1e-12, "first={}", first);
    }

    #[test]
    fn test_peak_bounded_by_amplitude() {
        let els = elements(3, 0.8);
        let profile =
            PhaseProfile::generate(&ArrayGeometry::line(3), PhaseStrategy::RingOffset, 0.0).unwrap();
        let weights = vec![
            HarmonicWeight::new(1.0, 0.5),
            HarmonicWeight::new(2.0, 1.5),
            HarmonicWeight::new(3.0, -0.25),
        ];
        let set = synthesize(&els, &profile, &weights, 1000.0, 48_000.0, 0.05).unwrap();
        assert!(set.peak() <= 0.8 + 1e-12, "peak={}", set.peak());
    }

    #[test]
    fn test_synthesis_is_bit_identical() {
        let els = elements(9, 1.0);
        let profile =
            PhaseProfile::generate(&ArrayGeometry::square(3), PhaseStrategy::RadialNull, 1.1).unwrap();
        let a = synthesize(&els, &profile, &harmonics_369(), 3330.0, 192_000.0, 0.002).unwrap();
        let b = synthesize(&els, &profile, &harmonics_369(), 3330.0, 192_000.0, 0.002).unwrap();
        for id in a.ids() {
            let sa = a.get(id).unwrap().samples();
            let sb = b.get(id).unwrap().samples();
            assert!(sa.iter().zip(sb).all(|(x, y)| x.to_bits() == y.to_bits()));
        }
    }

    #[test]
    fn test_element_weights_override_default() {
        let mut els = elements(2, 1.0);
        els[1].harmonic_weights = vec![HarmonicWeight::new(2.0, 1.0)];
        let profile = PhaseProfile::from_pairs([(0, 0.0), (1, 0.0)]);
        let set = synthesize(&els, &profile, &[HarmonicWeight::new(1.0, 1.0)], 100.0, 1000.0, 0.1)
            .unwrap();
        // Sample 2 is t = 2 ms: sin(0.4π) for the fundamental, sin(0.8π) for the override.
        let a = set.get(0).unwrap().samples()[2];
        let b = set.get(1).unwrap().samples()[2];
        assert!((a - (0.4 * PI).sin()).abs() < 1e-12);
        assert!((b - (0.8 * PI).sin()).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        let els = elements(1, 1.0);
        let profile = PhaseProfile::from_pairs([(0, 0.0)]);
        assert!(matches!(
            synthesize(&els, &profile, &[], 100.0, 1000.0, 0.1),
            Err(HarmonicError::InvalidConfig { .. })
        ));
        assert!(synthesize(&els, &profile, &harmonics_369(), 100.0, 0.0, 0.1).is_err());
        assert!(synthesize(&els, &profile, &harmonics_369(), 0.0, 1000.0, 0.1).is_err());
        let zero = [HarmonicWeight::new(1.0, 0.0)];
        assert!(synthesize(&els, &profile, &zero, 100.0, 1000.0, 0.1).is_err());
    }

    #[test]
    fn test_rejects_uncovered_element() {
        let els = elements(2, 1.0);
        let profile = PhaseProfile::from_pairs([(0, 0.0)]);
        assert!(synthesize(&els, &profile, &harmonics_369(), 100.0, 1000.0, 0.1).is_err());
    }

    #[test]
    fn test_mean_field_of_balanced_ring_cancels() {
        let els = elements(3, 1.0);
        let profile =
            PhaseProfile::generate(&ArrayGeometry::line(3), PhaseStrategy::RingOffset, 0.0).unwrap();
        let set = synthesize(&els, &profile, &[HarmonicWeight::new(1.0, 1.0)], 3690.0, 20_000.0, 0.02)
            .unwrap();
        let field = set.mean_field();
        assert_eq!(field.len(), 400);
        assert!(peak(&field) < 1e-9, "ring residue={}", peak(&field));
    }

    #[test]
    fn test_superpose_and_length_mismatch() {
        let sum = superpose(&[1.0, -1.0], &[0.5, 1.0]).unwrap();
        assert_eq!(sum, vec![1.5, 0.0]);
        assert!(superpose(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_try_map_preserves_ids() {
        let els = elements(2, 1.0);
        let profile = PhaseProfile::from_pairs([(0, 0.0), (1, 1.0)]);
        let set = synthesize(&els, &profile, &harmonics_369(), 100.0, 1000.0, 0.1).unwrap();
        let halved = set
            .try_map(|_, s| Ok(s.iter().map(|x| x * 0.5).collect()))
            .unwrap();
        assert_eq!(halved.ids(), vec![0, 1]);
        assert!((halved.peak() - set.peak() * 0.5).abs() < 1e-12);
        assert!(set.try_map(|_, _| Ok(vec![0.0])).is_err());
    }
}
