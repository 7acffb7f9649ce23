// HPRO ADAPTIVE CONTROL LOOP
// FIXED-PERIOD, SINGLE-THREADED, STRICTLY TICK-ORDERED.
//
// COLLECTORS (ANY THREAD): PUSH RAW PRESSURE + LATENCY INTO InputBuffers.
// CONTROL LOOP (ONE THREAD): DRAIN BUFFERS ONCE PER TICK BOUNDARY, SAMPLE,
//   CLASSIFY, OBSERVE LATENCY, STEP THE THROTTLE, ACTUATE, EMIT TELEMETRY.
//
// THE LOOP NEVER WAITS FOR INPUT. LATE INPUTS SIMPLY LAND IN THE NEXT TICK.
// SHUTDOWN IS CHECKED BETWEEN TICKS ONLY: AN IN-FLIGHT TICK ALWAYS FINISHES
// AND ITS SETPOINT IS ALWAYS HANDED TO THE ENGINE.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::classifier::{RegimeClassifier, RegimeTransition};
use crate::error::{ControllerError, Result};
use crate::event::{TelemetryLog, TelemetryRecord, now_ns};
use crate::latency::{LatencyMonitor, LatencyObservation, LatencySample};
use crate::sampler::{PressureSample, PressureSampler, RawPressure};
use crate::throttle::{ThrottleController, ThrottleSetpoint};
use crate::tuning::{ControllerConfig, Regime};

// LONGEST UNINTERRUPTED SLEEP BETWEEN SHUTDOWN CHECKS
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

// --- ACTUATION SEAM ---

// EXTERNAL TRANSFER / REPLICATION ENGINE. RECEIVES THE NEW RATE ONCE PER TICK
// AND KEEPS APPLYING IT UNTIL THE NEXT CALL SUPERSEDES IT.
pub trait TransferEngine {
    fn apply_rate(&mut self, setpoint: &ThrottleSetpoint) -> Result<()>;
}

// --- PER-TICK INPUT BUFFERS ---

#[derive(Default, Debug)]
pub struct TickInputs {
    pub pressure: Vec<RawPressure>,
    pub latency: Vec<LatencyObservation>,
}

// APPEND-ONLY FROM THE COLLECTOR SIDE, SWAPPED OUT WHOLE BY THE LOOP
#[derive(Default)]
pub struct InputBuffers {
    pressure: Mutex<Vec<RawPressure>>,
    latency: Mutex<Vec<LatencyObservation>>,
}

impl InputBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_pressure(&self, raw: RawPressure) {
        self.pressure.lock().push(raw);
    }

    pub fn push_latency(&self, obs: LatencyObservation) {
        self.latency.lock().push(obs);
    }

    pub fn extend_latency(&self, obs: impl IntoIterator<Item = LatencyObservation>) {
        self.latency.lock().extend(obs);
    }

    pub fn drain(&self) -> TickInputs {
        TickInputs {
            pressure: std::mem::take(&mut *self.pressure.lock()),
            latency: std::mem::take(&mut *self.latency.lock()),
        }
    }
}

// --- CONTROLLER ---

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickOutcome {
    pub pressure: PressureSample,
    pub latency: Option<LatencySample>,
    pub transition: Option<RegimeTransition>,
    pub setpoint: ThrottleSetpoint,
    pub record: TelemetryRecord,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub ticks: u64,
    pub regime_ticks: [u64; 3],
    pub transitions: u64,
    pub degraded_ticks: u64,
    pub absent_latency_ticks: u64,
}

pub struct Controller {
    config: ControllerConfig,
    sampler: PressureSampler,
    classifier: RegimeClassifier,
    throttle: ThrottleController,
    monitor: LatencyMonitor,
    setpoint: ThrottleSetpoint,
    next_tick: u64,
    last_transition_tick: u64,
    stats: ControllerStats,
}

impl Controller {
    // REFUSES TO START ON AN INVALID CONFIG. EVERY INSTANCE BEGINS WITH
    // FRESH HYSTERESIS STATE; NOTHING CARRIES OVER FROM A PREVIOUS ONE.
    pub fn new(config: ControllerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sampler: PressureSampler::new(&config),
            classifier: RegimeClassifier::new(&config),
            throttle: ThrottleController::new(&config),
            monitor: LatencyMonitor::new(&config),
            setpoint: ThrottleSetpoint {
                tick_index: 0,
                rate_fraction: config.initial_rate_fraction,
                regime: Regime::Standard,
            },
            next_tick: 0,
            last_transition_tick: 0,
            stats: ControllerStats::default(),
            config,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn setpoint(&self) -> ThrottleSetpoint {
        self.setpoint
    }

    pub fn regime(&self) -> Regime {
        self.classifier.regime()
    }

    pub fn stats(&self) -> ControllerStats {
        self.stats
    }

    pub fn ticks_since_transition(&self) -> u64 {
        self.next_tick.saturating_sub(self.last_transition_tick)
    }

    // ONE CONTROL TICK. INFALLIBLE: EVERY ANOMALY DEGRADES TO LAST-KNOWN-GOOD.
    pub fn tick(
        &mut self,
        timestamp_ns: u64,
        pressure: &[RawPressure],
        latency: &[LatencyObservation],
    ) -> TickOutcome {
        let tick_index = self.next_tick;

        let sample = self.sampler.sample(tick_index, timestamp_ns, pressure);
        let transition = self.classifier.observe(tick_index, sample.spi);
        let regime = self.classifier.regime();
        let feedback = self.monitor.observe(tick_index, latency);
        let setpoint = self.throttle.step(tick_index, regime, feedback.as_ref(), &self.setpoint);

        self.setpoint = setpoint;
        self.next_tick += 1;

        self.stats.ticks += 1;
        self.stats.regime_ticks[regime as usize] += 1;
        if sample.degraded {
            self.stats.degraded_ticks += 1;
        }
        if feedback.is_none() {
            self.stats.absent_latency_ticks += 1;
        }
        if let Some(t) = transition {
            self.stats.transitions += 1;
            self.last_transition_tick = tick_index;
            log_info!("TICK {}: REGIME {} -> {} (SPI {:.3})", t.tick_index, t.from.label(), t.to.label(), sample.spi);
        }

        let record = TelemetryRecord {
            tick_index,
            timestamp_ns,
            spi: sample.spi,
            spi_degraded: sample.degraded,
            regime,
            rate_fraction: setpoint.rate_fraction,
            latency_ratio: feedback.map(|f| f.observed_latency_ratio),
        };

        TickOutcome { pressure: sample, latency: feedback, transition, setpoint, record }
    }
}

// --- LOOP ---

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoopSummary {
    pub stats: ControllerStats,
    pub overruns: u64,
    pub engine_errors: u64,
    pub telemetry_dropped: u64,
    pub final_setpoint: ThrottleSetpoint,
}

impl LoopSummary {
    pub fn line(&self) -> String {
        let s = &self.stats;
        format!(
            "[THROTTLE] regime={} rate={:.3} ticks={} regime_ticks=L:{}/S:{}/H:{} transitions={} degraded={} no_lat={} overruns={} engine_err={} telemetry_dropped={}",
            self.final_setpoint.regime.label(), self.final_setpoint.rate_fraction,
            s.ticks,
            s.regime_ticks[Regime::Low as usize],
            s.regime_ticks[Regime::Standard as usize],
            s.regime_ticks[Regime::High as usize],
            s.transitions, s.degraded_ticks, s.absent_latency_ticks,
            self.overruns, self.engine_errors, self.telemetry_dropped,
        )
    }

    pub fn print(&self) {
        println!("{}", self.line());
    }
}

// SLEEP UNTIL `deadline`, WAKING EARLY ON SHUTDOWN. RETURNS FALSE IF SHUT DOWN.
fn sleep_until(deadline: Instant, shutdown: &AtomicBool) -> bool {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}

fn apply<E: TransferEngine + ?Sized>(engine: &mut E, setpoint: &ThrottleSetpoint) -> bool {
    match engine.apply_rate(setpoint) {
        Ok(()) => true,
        Err(e) => {
            // PREVIOUS RATE STAYS IN FORCE ON THE ENGINE SIDE
            log_warn!("TICK {}: {}", setpoint.tick_index, e);
            false
        }
    }
}

// RUNS UNTIL `shutdown` IS SET OR `max_ticks` TICKS HAVE COMPLETED.
// OVERRUNS RE-ANCHOR THE SCHEDULE INSTEAD OF BURSTING CATCH-UP TICKS.
pub fn run_loop<E: TransferEngine + ?Sized>(
    controller: &mut Controller,
    inputs: &InputBuffers,
    engine: &mut E,
    telemetry: &TelemetryLog,
    shutdown: &AtomicBool,
    max_ticks: Option<u64>,
) -> LoopSummary {
    let period = controller.config().sampling_period();
    let mut overruns = 0u64;
    let mut engine_errors = 0u64;

    // APPLY INITIAL RATE BEFORE THE FIRST TICK
    if !apply(engine, &controller.setpoint()) {
        engine_errors += 1;
    }

    let mut deadline = Instant::now() + period;
    let mut completed = 0u64;

    while max_ticks.map_or(true, |max| completed < max) {
        if !sleep_until(deadline, shutdown) {
            break;
        }

        let batch = inputs.drain();
        let out = controller.tick(now_ns(), &batch.pressure, &batch.latency);
        if !apply(engine, &out.setpoint) {
            engine_errors += 1;
        }
        telemetry.record(out.record);
        completed += 1;

        deadline += period;
        let finished = Instant::now();
        if finished > deadline {
            overruns += 1;
            log_warn!("TICK {}: OVERRAN DEADLINE BY {:?}", out.setpoint.tick_index, finished - deadline);
            deadline = finished;
        }
    }

    log_debug!("CONTROL LOOP STOPPED AFTER {} TICKS", completed);

    LoopSummary {
        stats: controller.stats(),
        overruns,
        engine_errors,
        telemetry_dropped: telemetry.dropped(),
        final_setpoint: controller.setpoint(),
    }
}

// ENGINE THAT ONLY REMEMBERS THE LAST RATE. USED BY OFFLINE REPLAY.
#[derive(Default, Debug)]
pub struct NullEngine {
    pub last_rate: Option<f64>,
    pub updates: u64,
}

impl TransferEngine for NullEngine {
    fn apply_rate(&mut self, setpoint: &ThrottleSetpoint) -> Result<()> {
        self.last_rate = Some(setpoint.rate_fraction);
        self.updates += 1;
        Ok(())
    }
}

// REJECTS EVERYTHING. EXERCISES THE DEGRADE PATH.
#[derive(Default, Debug)]
pub struct FailingEngine;

impl TransferEngine for FailingEngine {
    fn apply_rate(&mut self, _setpoint: &ThrottleSetpoint) -> Result<()> {
        Err(ControllerError::Engine("engine offline".into()))
    }
}
