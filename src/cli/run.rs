// LIVE CONTROL LOOP
// THREE THREADS:
//   COLLECTOR: SYNTHESIZES RAW PRESSURE + FOREGROUND LATENCIES FROM THE SIM
//              SCENARIO AND A PLANT DRIVEN BY THE RATE CURRENTLY IN FORCE.
//   CONTROL:   MAIN THREAD. run_loop() ON A FIXED PERIOD.
//   REPORTER:  DRAINS TELEMETRY AND PRINTS IT. MAY FALL BEHIND; THE RING
//              DROPS THE OLDEST RECORDS RATHER THAN STALLING CONTROL.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Args;
use rand::rngs::StdRng;
use rand::SeedableRng;

use hpro::adaptive::{Controller, InputBuffers, TransferEngine, run_loop};
use hpro::error::ControllerError;
use hpro::event::{TelemetryLog, TelemetryRecord};
use hpro::latency::LatencyObservation;
use hpro::sampler::RawPressure;
use hpro::sim::{self, Plant, Scenario};
use hpro::throttle::ThrottleSetpoint;
use hpro::tuning::{self, Regime};
use hpro::{log_debug, log_info, log_warn};

use super::ConfigArgs;

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    // STOP AFTER THIS MANY SECONDS (DEFAULT: RUN UNTIL CTRL+C)
    #[arg(long)]
    pub duration_secs: Option<u64>,

    // PRINT TELEMETRY AS JSON LINES
    #[arg(long)]
    pub json: bool,

    // PRINT EVERY TICK (DEFAULT THINS OUTPUT WHILE THE REGIME IS SETTLED)
    #[arg(long)]
    pub all_ticks: bool,

    // NO LIVE STREAM: KEEP TELEMETRY IN THE RING AND DUMP IT ON EXIT
    #[arg(long)]
    pub dump: bool,

    // SEED FOR THE SYNTHETIC COLLECTOR
    #[arg(long, default_value_t = sim::DEFAULT_SEED)]
    pub seed: u64,
}

// RATE IN FORCE, SHARED WITH THE COLLECTOR'S PLANT. f64 BITS IN AN ATOMIC.
struct SharedRateEngine {
    rate_bits: Arc<AtomicU64>,
    last: Option<f64>,
}

impl TransferEngine for SharedRateEngine {
    fn apply_rate(&mut self, setpoint: &ThrottleSetpoint) -> Result<(), ControllerError> {
        if !(0.0..=1.0).contains(&setpoint.rate_fraction) {
            return Err(ControllerError::Engine(format!("rate {} out of range", setpoint.rate_fraction)));
        }
        if self.last != Some(setpoint.rate_fraction) {
            log_debug!("TICK {}: RATE -> {:.3}", setpoint.tick_index, setpoint.rate_fraction);
        }
        self.last = Some(setpoint.rate_fraction);
        self.rate_bits.store(setpoint.rate_fraction.to_bits(), Ordering::Relaxed);
        Ok(())
    }
}

fn collector_thread(
    inputs: Arc<InputBuffers>,
    rate_bits: Arc<AtomicU64>,
    scenario: Scenario,
    floor: Duration,
    shutdown: &'static AtomicBool,
) {
    let mut rng = StdRng::seed_from_u64(scenario.seed);
    let mut plant = Plant::default();
    let period = Duration::from_millis(scenario.period_ms);
    let start = Instant::now();
    let mut op_id = 0u64;

    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(period);

        // LOOP THE SCENARIO FOREVER
        let t = start.elapsed().as_secs_f64() % scenario.duration_s.max(1.0);
        let base = scenario.base_spi(t);
        let dirty = (base + sim::gaussian(&mut rng, scenario.spi_noise_std)).clamp(0.0, 1.0);
        let queue = (base + sim::gaussian(&mut rng, scenario.spi_noise_std)).clamp(0.0, 1.0);
        inputs.push_pressure(RawPressure::new("dirty_rate", dirty));
        inputs.push_pressure(RawPressure::new("queue_depth", queue));

        let rate = f64::from_bits(rate_bits.load(Ordering::Relaxed));
        let ratio = plant.advance(rate, base);
        let floor_ns = floor.as_nanos() as f64;
        inputs.extend_latency((0..scenario.ops_per_tick).map(|_| {
            let jitter = sim::gaussian(&mut rng, 0.05).abs();
            op_id += 1;
            LatencyObservation::new(op_id, Duration::from_nanos((floor_ns * ratio * (1.0 + jitter)) as u64))
        }));
    }
}

fn report(rec: &TelemetryRecord, json: bool) {
    if json {
        match serde_json::to_string(rec) {
            Ok(line) => println!("{}", line),
            Err(e) => log_debug!("TELEMETRY ENCODE FAILED: {}", e),
        }
    } else {
        println!("{}", rec.line());
    }
}

fn reporter_thread(
    telemetry: Arc<TelemetryLog>,
    period: Duration,
    dwell: u32,
    json: bool,
    all_ticks: bool,
    done: Arc<AtomicBool>,
) {
    let mut last_regime: Option<Regime> = None;
    let mut since_change = 0u64;

    loop {
        let finished = done.load(Ordering::Relaxed);
        for rec in telemetry.drain() {
            if last_regime != Some(rec.regime) {
                last_regime = Some(rec.regime);
                since_change = 0;
            } else {
                since_change += 1;
            }
            if all_ticks || tuning::should_print_telemetry(rec.tick_index, since_change, dwell) {
                report(&rec, json);
            }
        }
        if finished {
            break;
        }
        std::thread::sleep(period);
    }
}

// A PANICKED WORKER DOES NOT FAIL THE RUN, BUT IT IS NEVER SILENT
fn join_worker(name: &str, handle: std::thread::JoinHandle<()>) -> bool {
    match handle.join() {
        Ok(()) => true,
        Err(payload) => {
            let reason = payload.downcast_ref::<&str>().map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log_warn!("{} THREAD PANICKED: {}", name, reason);
            false
        }
    }
}

pub fn run_live(args: &RunArgs, shutdown: &'static AtomicBool) -> Result<()> {
    let cfg = args.config.resolve()?;
    super::print_config(&cfg);

    let mut controller = Controller::new(cfg.clone())?;
    let inputs = Arc::new(InputBuffers::new());
    let telemetry = Arc::new(TelemetryLog::new(cfg.telemetry_capacity));
    let rate_bits = Arc::new(AtomicU64::new(cfg.initial_rate_fraction.to_bits()));
    let reporter_done = Arc::new(AtomicBool::new(false));

    let scenario = Scenario {
        period_ms: cfg.sampling_period_ms,
        seed: args.seed,
        ..Scenario::default()
    };

    let collector = {
        let inputs = Arc::clone(&inputs);
        let rate_bits = Arc::clone(&rate_bits);
        let floor = cfg.latency_floor();
        std::thread::spawn(move || collector_thread(inputs, rate_bits, scenario, floor, shutdown))
    };

    let reporter = (!args.dump).then(|| {
        let telemetry = Arc::clone(&telemetry);
        let done = Arc::clone(&reporter_done);
        let (period, dwell, json, all) = (cfg.sampling_period(), cfg.hysteresis_dwell, args.json, args.all_ticks);
        std::thread::spawn(move || reporter_thread(telemetry, period, dwell, json, all, done))
    });

    let max_ticks = args.duration_secs.map(|s| s * 1000 / cfg.sampling_period_ms.max(1));

    log_info!("HPRO IS ACTIVE (CTRL+C TO EXIT)");
    let mut engine = SharedRateEngine { rate_bits, last: None };
    let summary = run_loop(&mut controller, &inputs, &mut engine, &telemetry, shutdown, max_ticks);
    log_info!("HPRO IS SHUTTING DOWN");

    shutdown.store(true, Ordering::Relaxed);
    reporter_done.store(true, Ordering::Relaxed);
    join_worker("COLLECTOR", collector);
    if let Some(reporter) = reporter {
        join_worker("REPORTER", reporter);
    }

    if args.dump {
        telemetry.dump();
    }
    summary.print();
    Ok(())
}
