/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Fixed-period control loop.
//!
//! One cycle, in order:
//!
//! 1. **Telemetry**: fresh sample, or the last good sample for at most one
//!    missed cycle, else a `TelemetryLost` trip.
//! 2. **Containment**: hard-limit check; a trip halts the sink once and ends the
//!    cycle with no output.
//! 3. **Stability**: soft-limit verdict; drift triggers self-sync phase and
//!    amplitude re-alignment through the array model.
//! 4. **Feedback**: PID on mean telemetry amplitude; its output delta is applied
//!    to every element through the same array model entry point.
//! 5. **Synthesis**: snapshot → trimmed profile → waveforms → optional bandpass
//!    → self-sync waveform correction when drifting → output interlock → sink.
//!
//! [`ControlLoop::run_cycle`] is deterministic and thread-free; it is what tests
//! replay against. [`ControlLoop::run`] adds the sensor pump thread, the
//! single-slot handoff, fixed-period scheduling and between-cycle commands.
//!
//! # Invariants
//!
//! - **Tripped is silent**: no [`ActuatorSink::render`] call while tripped, and
//!   exactly one [`ActuatorSink::halt`] per trip.
//! - **Contained errors**: per-cycle errors land in [`CycleReport::errors`]; only
//!   configuration errors escape, from [`ControlLoop::new`].
//! - **Cancellation trips**: a stop request forces `Tripped` before `run` returns.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::array::{ArrayModel, Correction};
use crate::compensation::compensation_vector;
use crate::config::HarmonicConfig;
use crate::controller::{ControlStep, ControllerState, FeedbackController};
use crate::error::{HarmonicError, Result};
use crate::filter::BandpassFilter;
use crate::guard::{ContainmentGuard, ContainmentState, TripReason};
use crate::profile::PhaseProfile;
use crate::stability::{StabilityMonitor, StabilityVerdict};
use crate::synth::{Synthesizer, WaveformSet};
use crate::sync::SelfSyncCorrector;
use crate::telemetry::{SlotRead, TelemetrySample, TelemetrySlot};

// ─── Collaborator seams ─────────────────────────────────────────────────────

/// External sensor. Returns `None` when no reading is available right now.
pub trait TelemetrySource: Send {
    /// Produce the next reading, if any.
    fn sample(&mut self) -> Option<TelemetrySample>;
}

impl<F> TelemetrySource for F
where
    F: FnMut() -> Option<TelemetrySample> + Send,
{
    fn sample(&mut self) -> Option<TelemetrySample> {
        self()
    }
}

/// External actuator driver.
pub trait ActuatorSink {
    /// Emit one cycle's waveforms.
    fn render(&mut self, cycle: u64, output: &WaveformSet);
    /// Cease all output. Called once per containment trip.
    fn halt(&mut self);
}

/// Deterministic source replaying a recorded sequence; `None` entries are gaps.
#[derive(Clone, Debug, Default)]
pub struct ReplaySource {
    queue: VecDeque<Option<TelemetrySample>>,
}

impl ReplaySource {
    /// Replay `samples` with no gaps.
    pub fn new(samples: impl IntoIterator<Item = TelemetrySample>) -> Self {
        Self {
            queue: samples.into_iter().map(Some).collect(),
        }
    }

    /// Replay a sequence that may contain gaps.
    pub fn with_gaps(samples: impl IntoIterator<Item = Option<TelemetrySample>>) -> Self {
        Self {
            queue: samples.into_iter().collect(),
        }
    }

    /// Entries not yet replayed.
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl TelemetrySource for ReplaySource {
    fn sample(&mut self) -> Option<TelemetrySample> {
        self.queue.pop_front().flatten()
    }
}

/// Sink that keeps every rendered frame in memory.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    /// `(cycle, output)` per rendered cycle.
    pub frames: Vec<(u64, WaveformSet)>,
    /// Number of halt calls.
    pub halts: u32,
}

impl ActuatorSink for RecordingSink {
    fn render(&mut self, cycle: u64, output: &WaveformSet) {
        self.frames.push((cycle, output.clone()));
    }

    fn halt(&mut self) {
        self.halts += 1;
    }
}

// ─── Commands ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoopCommand {
    Stop,
    Reset,
}

/// Cloneable handle for stopping or resetting a running loop from another thread.
///
/// Commands are observed between cycles.
#[derive(Clone, Debug)]
pub struct LoopHandle {
    tx: Sender<LoopCommand>,
}

impl LoopHandle {
    /// Request cancellation. Returns `false` if the loop no longer exists.
    pub fn stop(&self) -> bool {
        self.tx.send(LoopCommand::Stop).is_ok()
    }

    /// Request an external containment reset.
    pub fn reset(&self) -> bool {
        self.tx.send(LoopCommand::Reset).is_ok()
    }
}

// ─── Reports ────────────────────────────────────────────────────────────────

/// Where this cycle's telemetry came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TelemetryStatus {
    /// New sample this cycle.
    Fresh,
    /// Previous cycle's sample reused after one miss.
    Stale,
    /// Nothing usable.
    Missing,
}

/// Outcome of one cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    /// 1-based cycle number.
    pub cycle: u64,
    /// Containment state at the end of the cycle.
    pub state: ContainmentState,
    /// Reason of the current trip, if any.
    pub trip_reason: Option<TripReason>,
    /// Telemetry provenance.
    pub telemetry: TelemetryStatus,
    /// Soft stability verdict, when the cycle got that far.
    pub verdict: Option<StabilityVerdict>,
    /// PID step, when the cycle got that far.
    pub control: Option<ControlStep>,
    /// `true` if self-sync re-alignment ran.
    pub resynced: bool,
    /// `true` if the sink received output.
    pub rendered: bool,
    /// Contained per-cycle errors.
    pub errors: Vec<HarmonicError>,
}

impl CycleReport {
    fn new(cycle: u64, telemetry: TelemetryStatus) -> Self {
        Self {
            cycle,
            state: ContainmentState::Armed,
            trip_reason: None,
            telemetry,
            verdict: None,
            control: None,
            resynced: false,
            rendered: false,
            errors: Vec::new(),
        }
    }
}

/// Summary returned by [`ControlLoop::run`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunSummary {
    /// Cycles executed.
    pub cycles: u64,
    /// Cycles whose work overran the period.
    pub overruns: u64,
    /// Final containment state (always `Tripped`).
    pub state: ContainmentState,
    /// Reason of the final trip.
    pub reason: Option<TripReason>,
}

// ─── Loop ───────────────────────────────────────────────────────────────────

/// Closes the slot when dropped so the pump thread exits on every path.
struct CloseOnDrop<'a>(&'a TelemetrySlot);

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// One control loop instance.
#[derive(Debug)]
pub struct ControlLoop {
    config: HarmonicConfig,
    array: Arc<ArrayModel>,
    profile: PhaseProfile,
    synth: Synthesizer,
    filter: Option<BandpassFilter>,
    monitor: StabilityMonitor,
    controller: FeedbackController,
    corrector: SelfSyncCorrector,
    guard: ContainmentGuard,
    cycle: u64,
    missed: u32,
    last_good: Option<TelemetrySample>,
    halted: bool,
    commands_tx: Sender<LoopCommand>,
    commands_rx: Receiver<LoopCommand>,
}

impl ControlLoop {
    /// Validate `config` and assemble every component. Fails fast on any
    /// configuration error.
    pub fn new(config: HarmonicConfig) -> Result<Self> {
        config.validate()?;
        let array = Arc::new(ArrayModel::uniform(
            config.geometry,
            config.initial_amplitude,
            config.max_element_amplitude,
        )?);
        let profile = PhaseProfile::generate(
            &config.geometry,
            config.profile.strategy,
            config.profile.phase_constant,
        )?;
        let synth = Synthesizer::new(config.synthesis.clone())?;
        let filter = config
            .filter
            .map(|f| BandpassFilter::design(f.target_frequency, f.bandwidth, config.synthesis.sample_rate))
            .transpose()?;
        let controller = FeedbackController::new(&config.pid, config.initial_amplitude)?;
        let corrector = SelfSyncCorrector::new(&config.self_sync)?;
        let guard = ContainmentGuard::new(config.containment)?;
        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();

        info!(
            elements = array.len(),
            strategy = ?config.profile.strategy,
            period_us = config.cycle.cycle_period_us,
            filtered = filter.is_some(),
            "control loop configured"
        );
        Ok(Self {
            monitor: StabilityMonitor::new(config.stability),
            config,
            array,
            profile,
            synth,
            filter,
            controller,
            corrector,
            guard,
            cycle: 0,
            missed: 0,
            last_good: None,
            halted: false,
            commands_tx,
            commands_rx,
        })
    }

    /// Handle for stop and reset requests.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            tx: self.commands_tx.clone(),
        }
    }

    /// Shared array model, for external correction writers.
    pub fn array(&self) -> Arc<ArrayModel> {
        Arc::clone(&self.array)
    }

    /// Bound configuration.
    pub fn config(&self) -> &HarmonicConfig {
        &self.config
    }

    /// Base phase profile (before element trims).
    pub fn profile(&self) -> &PhaseProfile {
        &self.profile
    }

    /// Latched containment state.
    pub fn state(&self) -> ContainmentState {
        self.guard.state()
    }

    /// Reason of the current trip.
    pub fn trip_reason(&self) -> Option<TripReason> {
        self.guard.reason()
    }

    /// Cycles run so far.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Controller memory.
    pub fn controller_state(&self) -> ControllerState {
        self.controller.state()
    }

    /// Controller integrated output.
    pub fn controller_output(&self) -> f64 {
        self.controller.output()
    }

    #[cfg_attr(not(feature = "serde"), allow(dead_code))]
    pub(crate) fn restore_controller(&mut self, state: ControllerState, output: f64, cycle: u64) {
        self.controller.restore(state, output);
        self.cycle = cycle;
    }

    /// Latch a trip without a sink; the next cycle halts it.
    #[cfg_attr(not(feature = "serde"), allow(dead_code))]
    pub(crate) fn restore_trip(&mut self, reason: TripReason) {
        self.guard.force_trip(reason);
    }

    /// External reset: re-arm the guard and clear controller and telemetry memory.
    pub fn reset(&mut self) {
        self.guard.reset();
        self.controller.reset();
        self.missed = 0;
        self.last_good = None;
        self.halted = false;
    }

    /// Force a trip and halt the sink if it is still emitting.
    pub fn shutdown<K: ActuatorSink + ?Sized>(&mut self, reason: TripReason, sink: &mut K) {
        self.guard.force_trip(reason);
        self.halt(sink);
    }

    fn halt<K: ActuatorSink + ?Sized>(&mut self, sink: &mut K) {
        if !self.halted {
            sink.halt();
            self.halted = true;
            self.controller.reset();
            info!(cycle = self.cycle, reason = ?self.guard.reason(), "actuator output halted");
        }
    }

    fn resolve_telemetry(
        &mut self,
        telemetry: Option<TelemetrySample>,
    ) -> (Option<TelemetrySample>, TelemetryStatus, Option<HarmonicError>) {
        if let Some(sample) = telemetry {
            self.missed = 0;
            self.last_good = Some(sample.clone());
            return (Some(sample), TelemetryStatus::Fresh, None);
        }
        self.missed = self.missed.saturating_add(1);
        let timeout = HarmonicError::TelemetryTimeout {
            waited_ms: self.config.cycle.telemetry_timeout().as_millis() as u64,
            missed: self.missed,
        };
        match (&self.last_good, self.missed) {
            (Some(last), 1) => {
                warn!(cycle = self.cycle, "telemetry timeout, reusing last sample");
                (Some(last.clone()), TelemetryStatus::Stale, Some(timeout))
            }
            _ => (None, TelemetryStatus::Missing, Some(timeout)),
        }
    }

    /// Self-sync re-alignment of element phases and amplitudes from telemetry.
    fn realign(&self, sample: &TelemetrySample, errors: &mut Vec<HarmonicError>) {
        let elements = self.array.get_snapshot();
        let phase_deltas = self.corrector.realign(&sample.phase_diffs);
        let amplitude_deltas: Vec<f64> = compensation_vector(&sample.amplitudes)
            .into_iter()
            .map(|d| d * self.corrector.gain())
            .collect();

        let corrections: Vec<Correction> = elements
            .iter()
            .enumerate()
            .map(|(i, e)| {
                Correction::new(
                    e.id,
                    phase_deltas.get(i).copied().unwrap_or(0.0),
                    amplitude_deltas.get(i).copied().unwrap_or(0.0),
                )
            })
            .filter(|c| c.delta_phase != 0.0 || c.delta_amplitude != 0.0)
            .collect();
        if corrections.is_empty() {
            return;
        }
        if let Err(err) = self.array.apply_corrections(&corrections) {
            errors.push(err);
        }
    }

    fn feedback(&mut self, sample: &TelemetrySample, errors: &mut Vec<HarmonicError>) -> ControlStep {
        let step = self
            .controller
            .step(self.config.pid.setpoint, sample.mean_amplitude());
        let delta = self.controller.step_size() * step.control;
        if delta != 0.0 {
            let corrections: Vec<Correction> = self
                .array
                .get_snapshot()
                .iter()
                .map(|e| Correction::new(e.id, 0.0, delta))
                .collect();
            if let Err(err) = self.array.apply_corrections(&corrections) {
                errors.push(err);
            }
        }
        step
    }

    fn render_output(&self, resync: bool, errors: &mut Vec<HarmonicError>) -> Option<WaveformSet> {
        let elements = self.array.get_snapshot();
        let profile = self.profile.with_trims(&elements);
        let mut output = match self.synth.render(&elements, &profile) {
            Ok(output) => output,
            Err(err) => {
                errors.push(err);
                return None;
            }
        };
        if let Some(filter) = &self.filter {
            match output.try_map(|_, samples| Ok(filter.apply(samples))) {
                Ok(filtered) => output = filtered,
                Err(err) => {
                    errors.push(err);
                    return None;
                }
            }
        }
        if resync {
            // An overrun discards the correction; the cycle proceeds uncorrected.
            match self.corrector.correct_set(&output) {
                Ok(corrected) => output = corrected,
                Err(err) => errors.push(err),
            }
        }
        Some(output)
    }

    /// Run exactly one cycle with the given telemetry (`None` = read timed out).
    pub fn run_cycle<K: ActuatorSink + ?Sized>(
        &mut self,
        telemetry: Option<TelemetrySample>,
        sink: &mut K,
    ) -> CycleReport {
        self.cycle += 1;
        let (sample, status, timeout) = self.resolve_telemetry(telemetry);
        let mut report = CycleReport::new(self.cycle, status);
        report.errors.extend(timeout);

        let Some(sample) = sample else {
            self.guard.force_trip(TripReason::TelemetryLost);
            self.halt(sink);
            return self.finish(report);
        };
        if self.guard.check(&sample) == ContainmentState::Tripped {
            self.halt(sink);
            return self.finish(report);
        }

        let verdict = self.monitor.telemetry(&sample);
        report.verdict = Some(verdict);
        if verdict.unstable {
            self.realign(&sample, &mut report.errors);
            report.resynced = true;
        }
        report.control = Some(self.feedback(&sample, &mut report.errors));

        let Some(output) = self.render_output(verdict.unstable, &mut report.errors) else {
            return self.finish(report);
        };
        if self.guard.check_output(&output) == ContainmentState::Tripped {
            self.halt(sink);
            return self.finish(report);
        }
        sink.render(self.cycle, &output);
        report.rendered = true;
        self.finish(report)
    }

    fn finish(&self, mut report: CycleReport) -> CycleReport {
        report.state = self.guard.state();
        report.trip_reason = self.guard.reason();
        for err in &report.errors {
            warn!(cycle = report.cycle, %err, "cycle error contained");
        }
        debug!(
            cycle = report.cycle,
            state = ?report.state,
            telemetry = ?report.telemetry,
            rendered = report.rendered,
            "cycle complete"
        );
        report
    }

    /// Drain pending commands. Returns `true` if a stop was requested.
    fn drain_commands<K: ActuatorSink + ?Sized>(&mut self, sink: &mut K) -> bool {
        let mut stop = false;
        while let Ok(command) = self.commands_rx.try_recv() {
            match command {
                LoopCommand::Stop => stop = true,
                LoopCommand::Reset if !stop => self.reset(),
                LoopCommand::Reset => {}
            }
        }
        if stop {
            self.shutdown(TripReason::Cancelled, sink);
        }
        stop
    }

    /// Run until a stop request arrives through a [`LoopHandle`].
    ///
    /// A pump thread polls `source` and publishes into a single-slot handoff; the
    /// loop waits at most the telemetry timeout for each cycle's sample.
    pub fn run<S, K>(&mut self, source: &mut S, sink: &mut K) -> RunSummary
    where
        S: TelemetrySource + ?Sized,
        K: ActuatorSink + ?Sized,
    {
        let period = self.config.cycle.cycle_period();
        let timeout = self.config.cycle.telemetry_timeout();
        let pump_interval = period / 4;
        let slot = TelemetrySlot::new();
        let start_cycle = self.cycle;
        let mut overruns = 0u64;

        thread::scope(|scope| {
            let closer = CloseOnDrop(&slot);
            let slot = &slot;
            scope.spawn(move || {
                while !slot.is_closed() {
                    if let Some(sample) = source.sample() {
                        if !slot.publish(sample) {
                            break;
                        }
                    }
                    thread::sleep(pump_interval);
                }
                debug!("telemetry pump stopped");
            });

            info!(period_us = self.config.cycle.cycle_period_us, "control loop running");
            let mut deadline = Instant::now() + period;
            loop {
                if self.drain_commands(sink) {
                    break;
                }
                let telemetry = match slot.take_timeout(timeout) {
                    SlotRead::Fresh(sample) => Some(sample),
                    SlotRead::TimedOut | SlotRead::Closed => None,
                };
                self.run_cycle(telemetry, sink);

                let now = Instant::now();
                if now < deadline {
                    thread::sleep(deadline - now);
                    deadline += period;
                } else {
                    overruns += 1;
                    warn!(cycle = self.cycle, late_us = (now - deadline).as_micros() as u64, "cycle overran period");
                    deadline = now + period;
                }
            }
            drop(closer);
        });

        info!(cycles = self.cycle - start_cycle, reason = ?self.guard.reason(), "control loop stopped");
        RunSummary {
            cycles: self.cycle - start_cycle,
            overruns,
            state: self.guard.state(),
            reason: self.guard.reason(),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::ArrayGeometry;
    use crate::config::PidConfig;
    use core::f64::consts::PI;

    fn small_config() -> HarmonicConfig {
        HarmonicConfig {
            geometry: ArrayGeometry::grid(2, 2),
            initial_amplitude: 0.5,
            pid: PidConfig {
                setpoint: 0.5,
                ..PidConfig::default()
            },
            ..HarmonicConfig::default()
        }
    }

    fn at_setpoint(ts: u64) -> TelemetrySample {
        TelemetrySample::new(ts, vec![0.5; 4], vec![0.05 * PI; 4], 0.95)
    }

    #[test]
    fn test_nominal_cycle_renders_without_corrections() {
        let mut control = ControlLoop::new(small_config()).unwrap();
        let mut sink = RecordingSink::default();
        let before = control.array().get_snapshot();
        let report = control.run_cycle(Some(at_setpoint(0)), &mut sink);
        assert!(report.rendered);
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.control.map(|c| c.control), Some(0.0));
        assert_eq!(control.array().get_snapshot(), before);
        assert_eq!(sink.frames.len(), 1);
        assert_eq!(sink.frames[0].1.len(), 4);
    }

    #[test]
    fn test_stale_then_lost() {
        let mut control = ControlLoop::new(small_config()).unwrap();
        let mut sink = RecordingSink::default();
        control.run_cycle(Some(at_setpoint(0)), &mut sink);

        let stale = control.run_cycle(None, &mut sink);
        assert_eq!(stale.telemetry, TelemetryStatus::Stale);
        assert_eq!(stale.state, ContainmentState::Armed);
        assert!(matches!(stale.errors[0], HarmonicError::TelemetryTimeout { missed: 1, .. }));

        let lost = control.run_cycle(None, &mut sink);
        assert_eq!(lost.telemetry, TelemetryStatus::Missing);
        assert_eq!(lost.trip_reason, Some(TripReason::TelemetryLost));
        assert_eq!(sink.halts, 1);
        assert_eq!(sink.frames.len(), 2);
    }

    #[test]
    fn test_no_telemetry_ever_trips_immediately() {
        let mut control = ControlLoop::new(small_config()).unwrap();
        let mut sink = RecordingSink::default();
        let report = control.run_cycle(None, &mut sink);
        assert_eq!(report.state, ContainmentState::Tripped);
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn test_fresh_sample_resets_miss_count() {
        let mut control = ControlLoop::new(small_config()).unwrap();
        let mut sink = RecordingSink::default();
        for ts in 0..5 {
            control.run_cycle(Some(at_setpoint(ts)), &mut sink);
            let report = control.run_cycle(None, &mut sink);
            assert_eq!(report.state, ContainmentState::Armed, "cycle {}", report.cycle);
        }
        assert_eq!(sink.frames.len(), 10);
    }

    #[test]
    fn test_drift_triggers_resync() {
        let mut control = ControlLoop::new(small_config()).unwrap();
        let mut sink = RecordingSink::default();
        // Within hard limits, outside soft phase limit.
        let drift = TelemetrySample::new(0, vec![0.5; 4], vec![0.0, 0.1, 0.2, 0.5 * PI], 0.95);
        let report = control.run_cycle(Some(drift), &mut sink);
        assert!(report.resynced);
        assert!(report.rendered);
        assert_eq!(report.state, ContainmentState::Armed);
        let phases: Vec<f64> = control.array().get_snapshot().iter().map(|e| e.phase).collect();
        assert!(phases[0] > 0.0 && phases[3] < 0.0, "phases {:?}", phases);
    }

    #[test]
    fn test_trip_halts_once_and_silences_output() {
        let mut control = ControlLoop::new(small_config()).unwrap();
        let mut sink = RecordingSink::default();
        let hot = TelemetrySample::new(0, vec![1.4, 0.5, 0.5, 0.5], vec![0.0; 4], 0.95);
        assert_eq!(control.run_cycle(Some(hot), &mut sink).state, ContainmentState::Tripped);
        for ts in 1..5 {
            let report = control.run_cycle(Some(at_setpoint(ts)), &mut sink);
            assert_eq!(report.state, ContainmentState::Tripped);
            assert!(!report.rendered);
        }
        assert_eq!(sink.halts, 1);
        assert!(sink.frames.is_empty());

        control.reset();
        assert!(control.run_cycle(Some(at_setpoint(9)), &mut sink).rendered);
    }

    #[test]
    fn test_stop_command_trips_before_exit() {
        let mut control = ControlLoop::new(small_config()).unwrap();
        let mut sink = RecordingSink::default();
        let handle = control.handle();
        assert!(handle.stop());
        let mut source = ReplaySource::new(vec![at_setpoint(0)]);
        let summary = control.run(&mut source, &mut sink);
        assert_eq!(summary.cycles, 0);
        assert_eq!(summary.state, ContainmentState::Tripped);
        assert_eq!(summary.reason, Some(TripReason::Cancelled));
        assert_eq!(sink.halts, 1);
    }

    #[test]
    fn test_invalid_config_refuses_to_start() {
        let mut config = small_config();
        config.synthesis.harmonic_weights.clear();
        assert!(ControlLoop::new(config).is_err());
    }
}
