//! Control loop against a simulated sensor.
//!
//! The mock sensor reports the array's own amplitudes plus seeded noise, so the
//! feedback controller pulls the elements from 0.7 toward the 0.8 setpoint.
//! After about one second coherence starts to fade; the guard trips and output
//! stays halted until the watchdog stops the loop.
//!
//! ```bash
//! RUST_LOG=harmonic_field_core=debug cargo run --example control_loop
//! ```

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

use harmonic_field_core::runtime::{ActuatorSink, ControlLoop};
use harmonic_field_core::synth::WaveformSet;
use harmonic_field_core::telemetry::TelemetrySample;
use harmonic_field_core::{ArrayModel, HarmonicConfig, Preset};

/// Sink that only logs what it would emit.
#[derive(Default)]
struct LoggingSink {
    frames: u64,
}

impl ActuatorSink for LoggingSink {
    fn render(&mut self, cycle: u64, output: &WaveformSet) {
        self.frames += 1;
        if cycle % 50 == 0 {
            info!(cycle, peak = output.peak(), channels = output.len(), "frame");
        }
    }

    fn halt(&mut self) {
        info!(frames = self.frames, "actuators halted");
    }
}

/// Sensor reading back the model's amplitudes with noise; coherence decays after `fade_after`.
fn mock_sensor(array: Arc<ArrayModel>, fade_after: Duration) -> impl FnMut() -> Option<TelemetrySample> + Send {
    let mut rng = StdRng::seed_from_u64(369);
    let start = Instant::now();
    move || {
        let elapsed = start.elapsed();
        let amplitudes = array
            .get_snapshot()
            .iter()
            .map(|e| e.amplitude + rng.gen_range(-0.01..0.01))
            .collect::<Vec<_>>();
        let phase_diffs = (0..amplitudes.len()).map(|_| rng.gen_range(-0.05..0.05)).collect();
        let fade = elapsed.saturating_sub(fade_after).as_secs_f64();
        let coherence = 0.97 - 0.2 * fade + rng.gen_range(-0.005..0.005);
        Some(TelemetrySample::new(
            elapsed.as_micros() as u64,
            amplitudes,
            phase_diffs,
            coherence,
        ))
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = HarmonicConfig {
        initial_amplitude: 0.7,
        ..Preset::TriAxisInterlock.config()
    };
    let mut control = match ControlLoop::new(config) {
        Ok(control) => control,
        Err(err) => {
            eprintln!("configuration rejected: {err}");
            std::process::exit(1);
        }
    };

    let handle = control.handle();
    let mut source = mock_sensor(control.array(), Duration::from_secs(1));
    let mut sink = LoggingSink::default();

    // Hard stop in case the guard never trips.
    let watchdog = thread::spawn(move || {
        thread::sleep(Duration::from_secs(3));
        handle.stop();
    });

    let summary = control.run(&mut source, &mut sink);
    info!(
        cycles = summary.cycles,
        overruns = summary.overruns,
        reason = ?summary.reason,
        "run finished"
    );
    let _ = watchdog.join();
}
