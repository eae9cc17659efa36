//! # harmonic-field-core
//!
//! Multi-channel harmonic waveform synthesis with a closed-loop coherence
//! controller and a latched containment interlock.
//!
//! ---
//!
//! ## What this crate is, and is not
//!
//! The crate drives an array of phase-addressable actuators (transducers, coils,
//! RF elements) with composable harmonic waveforms, watches the telemetry that
//! comes back, and corrects or shuts down. Its contract is purely signal
//! processing: synthesis, filtering, feedback control and threshold enforcement.
//! It makes no claim about the physical effect of any waveform it produces.
//!
//! Sensors and actuators are external collaborators behind two traits,
//! [`TelemetrySource`] and [`ActuatorSink`]. Everything else is in here.
//!
//! ---
//!
//! ## The pipeline
//!
//! ```text
//!   ArrayModel ──snapshot──▶ PhaseProfile + trims ──▶ Synthesizer ──▶ Bandpass ──▶ sink
//!       ▲                                                                  │
//!       │ apply_corrections                                 output interlock
//!       │                                                                  ▼
//!   FeedbackController ◀── StabilityMonitor ◀── TelemetrySample ──▶ ContainmentGuard
//!   SelfSyncCorrector  ◀──────────┘                                  (latched trip)
//! ```
//!
//! ## Module overview
//!
//! | Module | Key types | What it does |
//! |--------|-----------|--------------|
//! | [`array`] | [`ArrayModel`], [`ArrayElement`] | Authoritative element state; single mutation entry point |
//! | [`profile`] | [`PhaseProfile`], [`PhaseStrategy`] | Deterministic phase assignment over a geometry |
//! | [`synth`] | [`Synthesizer`], [`WaveformSet`] | Normalised harmonic sum per element |
//! | [`filter`] | [`BandpassFilter`] | Zero-phase 4th-order Butterworth bandpass |
//! | [`telemetry`] | [`TelemetrySample`], [`FieldLimits`], [`TelemetrySlot`] | Field checks and single-slot sensor handoff |
//! | [`stability`] | [`StabilityVerdict`], [`StabilityMonitor`] | Instability score and soft verdict |
//! | [`controller`] | [`FeedbackController`] | PID with integrating output and clamped integral |
//! | [`sync`] | [`SelfSyncCorrector`] | Phase-angle self-correction and re-alignment |
//! | [`compensation`] | [`FieldSymmetry`] | Mean-seeking compensation vectors |
//! | [`guard`] | [`ContainmentGuard`], [`ContainmentState`] | Hard-limit interlock, sticky until reset |
//! | [`runtime`] | [`ControlLoop`], [`CycleReport`] | Fixed-period loop, pump thread, cancellation |
//! | [`config`] | [`HarmonicConfig`] | Validated immutable configuration |
//! | [`presets`] | [`Preset`] | Reference configurations |
//! | [`snapshot`] | `ControlSnapshot` | Serialisable runtime state (requires `serde` feature) |
//!
//! ## Logging
//!
//! Every module logs through [`tracing`]. The crate never installs a subscriber;
//! that is the embedding application's job.
//!
//! ## License
//!
//! Business Source License 1.1. Free for evaluation and non-production use.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod error;
pub mod config;
pub mod array;
pub mod profile;
pub mod synth;
pub mod filter;
pub mod telemetry;
pub mod stability;
pub mod controller;
pub mod sync;
pub mod compensation;
pub mod guard;
pub mod runtime;
pub mod presets;
#[cfg(feature = "serde")]
pub mod snapshot;

#[cfg(feature = "python-ffi")]
pub mod ffi;

pub use array::{ArrayElement, ArrayGeometry, ArrayModel, Correction, ElementId, HarmonicWeight};
pub use compensation::{compensation_vector, FieldSymmetry};
pub use config::HarmonicConfig;
pub use controller::{ControllerState, FeedbackController, PidGains};
pub use error::{HarmonicError, Result};
pub use filter::BandpassFilter;
pub use guard::{ContainmentGuard, ContainmentState, TripReason};
pub use presets::Preset;
pub use profile::{PhaseProfile, PhaseStrategy};
pub use runtime::{ActuatorSink, ControlLoop, CycleReport, LoopHandle, TelemetrySource};
pub use stability::{StabilityMonitor, StabilityVerdict};
pub use sync::SelfSyncCorrector;
pub use synth::{Synthesizer, WaveformBuffer, WaveformSet};
pub use telemetry::{FieldLimits, TelemetrySample, TelemetrySlot};
