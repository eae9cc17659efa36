//! Reference configurations.
//!
//! Each preset is a complete, valid [`HarmonicConfig`] for one of the array
//! layouts the core was built around. They are starting points, not tuned
//! hardware profiles; adjust limits and gains for a real actuator.
//!
//! | Preset | Layout | Strategy | Base | Sample rate |
//! |---|---|---|---|---|
//! | [`Preset::HarmonicDrive369`] | 1 | focus, `k = 0` | 3 kHz × {1, 2, 3} | 96 kHz |
//! | [`Preset::FocusGrid`] | 8×8 | focus, `π/4` | 40 kHz | 192 kHz |
//! | [`Preset::RadialNullGrid`] | 6×6 | radial null, `π/2` | 9.99 kHz | 192 kHz |
//! | [`Preset::AlternatingNullGrid`] | 8×8 | alternating, `π` | 3.33 kHz | 192 kHz |
//! | [`Preset::FluxRing`] | 3 | ring offset | 3.69 kHz | 20 kHz |
//! | [`Preset::TriAxisInterlock`] | 3 | tri-axis lock | 3.33 kHz, bandpassed | 192 kHz |

use core::f64::consts::PI;

use crate::array::{ArrayGeometry, HarmonicWeight};
use crate::config::{FilterConfig, HarmonicConfig, ProfileConfig, SynthesisConfig};
use crate::profile::PhaseStrategy;

/// Named reference configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Preset {
    /// Single channel carrying the 3-6-9 harmonic stack.
    HarmonicDrive369,
    /// 8×8 ultrasonic grid focused on its center.
    FocusGrid,
    /// 6×6 grid with phase rising toward the edges.
    RadialNullGrid,
    /// 8×8 checkerboard of opposing phases.
    AlternatingNullGrid,
    /// Three nodes evenly spaced around a ring.
    FluxRing,
    /// Three channels locked 120° apart.
    TriAxisInterlock,
}

impl Preset {
    /// Every preset, in declaration order.
    pub const ALL: [Preset; 6] = [
        Preset::HarmonicDrive369,
        Preset::FocusGrid,
        Preset::RadialNullGrid,
        Preset::AlternatingNullGrid,
        Preset::FluxRing,
        Preset::TriAxisInterlock,
    ];

    /// Stable kebab-case name.
    pub fn name(self) -> &'static str {
        match self {
            Preset::HarmonicDrive369 => "harmonic-drive-369",
            Preset::FocusGrid => "focus-grid",
            Preset::RadialNullGrid => "radial-null-grid",
            Preset::AlternatingNullGrid => "alternating-null-grid",
            Preset::FluxRing => "flux-ring",
            Preset::TriAxisInterlock => "tri-axis-interlock",
        }
    }

    /// Look a preset up by [`name`](Self::name).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    /// Full configuration for this preset.
    pub fn config(self) -> HarmonicConfig {
        let single_tone = |base_frequency: f64, sample_rate: f64, duration: f64| SynthesisConfig {
            sample_rate,
            duration,
            base_frequency,
            harmonic_weights: vec![HarmonicWeight::new(1.0, 1.0)],
        };
        let profile = |strategy: PhaseStrategy, phase_constant: f64| ProfileConfig {
            strategy,
            phase_constant,
        };

        let base = HarmonicConfig::default();
        match self {
            Preset::HarmonicDrive369 => HarmonicConfig {
                geometry: ArrayGeometry::line(1),
                synthesis: SynthesisConfig::default(),
                profile: profile(PhaseStrategy::FocusCenter, 0.0),
                ..base
            },
            Preset::FocusGrid => HarmonicConfig {
                geometry: ArrayGeometry::square(8),
                synthesis: single_tone(40_000.0, 192_000.0, 0.001),
                profile: profile(PhaseStrategy::FocusCenter, PI / 4.0),
                ..base
            },
            Preset::RadialNullGrid => HarmonicConfig {
                geometry: ArrayGeometry::square(6),
                synthesis: single_tone(9_990.0, 192_000.0, 0.01),
                profile: profile(PhaseStrategy::RadialNull, PI / 2.0),
                ..base
            },
            Preset::AlternatingNullGrid => HarmonicConfig {
                geometry: ArrayGeometry::square(8),
                synthesis: single_tone(3_330.0, 192_000.0, 0.015),
                profile: profile(PhaseStrategy::AlternatingNull, PI),
                ..base
            },
            Preset::FluxRing => HarmonicConfig {
                geometry: ArrayGeometry::line(3),
                synthesis: single_tone(3_690.0, 20_000.0, 0.02),
                profile: profile(PhaseStrategy::RingOffset, 0.0),
                ..base
            },
            Preset::TriAxisInterlock => HarmonicConfig {
                geometry: ArrayGeometry::line(3),
                synthesis: single_tone(3_330.0, 192_000.0, 0.01),
                profile: profile(PhaseStrategy::TriAxisLock, 0.0),
                filter: Some(FilterConfig {
                    target_frequency: 3_330.0,
                    bandwidth: 120.0,
                }),
                ..base
            },
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
