// OFFLINE POLICY COMPARISON
// SAME SPI, SAME NOISE, THREE POLICIES. TIME SERIES AS CSV ON STDOUT,
// THEN A SUMMARY TABLE. DETERMINISTIC FOR A GIVEN SEED.

use anyhow::{Result, bail};
use clap::Args;

use hpro::sim::{self, Policy, Scenario, SimReport};

use super::ConfigArgs;

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[arg(long, default_value_t = sim::DEFAULT_SEED)]
    pub seed: u64,

    // SCENARIO LENGTH IN SECONDS (PHASES SCALE WITH IT)
    #[arg(long, default_value_t = 60.0)]
    pub duration_secs: f64,

    // SKIP THE PER-TICK SERIES, PRINT ONLY THE SUMMARY
    #[arg(long)]
    pub summary_only: bool,
}

// SCALE THE DEFAULT 20/20/20 PHASES TO AN ARBITRARY LENGTH
fn scaled_scenario(args: &SimulateArgs, period_ms: u64) -> Scenario {
    let base = Scenario::default();
    let scale = args.duration_secs / base.duration_s;
    let phases = base.phases.iter()
        .map(|p| sim::Phase { until_s: p.until_s * scale, ..*p })
        .collect();
    Scenario {
        duration_s: args.duration_secs,
        period_ms,
        phases,
        seed: args.seed,
        ..base
    }
}

pub fn print_series(report: &SimReport) {
    println!("time,spi,regime,rate_aggressive,latency_aggressive,rate_conservative,latency_conservative,rate_hpro,latency_hpro");
    for p in &report.points {
        println!(
            "{:.1},{:.4},{},{:.3},{:.4},{:.3},{:.4},{:.3},{:.4}",
            p.time_s, p.spi, p.regime.label(),
            p.aggressive.rate, p.aggressive.latency,
            p.conservative.rate, p.conservative.latency,
            p.hpro.rate, p.hpro.latency,
        );
    }
}

pub fn print_summary(report: &SimReport) {
    println!("\n{}", "=".repeat(64));
    println!("HPRO POLICY COMPARISON ({} TICKS, {} REGIME CHANGES)",
             report.points.len(), report.transitions);
    println!("{}", "=".repeat(64));
    println!("{:<14} {:<12} {:<12} {:<12} {:<12}",
             "POLICY", "MEAN RATE", "P99 LAT", "MAX LAT", "OVER BUDGET");
    for s in &report.summaries {
        println!("{:<14} {:<12.3} {:<12.3} {:<12.3} {:<12}",
                 s.policy.label(), s.mean_rate, s.p99_latency, s.max_latency, s.ticks_over_budget);
    }

    let find = |p: Policy| report.summaries.iter().find(|s| s.policy == p);
    if let (Some(agg), Some(hpro)) = (find(Policy::Aggressive), find(Policy::Hpro)) {
        if hpro.p99_latency > 0.0 {
            println!("\n  P99 REDUCTION VS AGGRESSIVE: {:.2}x", agg.p99_latency / hpro.p99_latency);
        }
    }
    if let (Some(con), Some(hpro)) = (find(Policy::Conservative), find(Policy::Hpro)) {
        if con.mean_rate > 0.0 {
            println!("  THROUGHPUT VS CONSERVATIVE:  {:.2}x", hpro.mean_rate / con.mean_rate);
        }
    }
}

// ONE DAY OF SIMULATED TIME IS ALREADY ~432K TICKS AT THE DEFAULT PERIOD
pub const MAX_DURATION_SECS: f64 = 86_400.0;

fn check_duration(secs: f64) -> Result<()> {
    if !secs.is_finite() || secs <= 0.0 {
        bail!("--duration-secs must be a positive finite number (got {})", secs);
    }
    if secs > MAX_DURATION_SECS {
        bail!("--duration-secs {} exceeds the {}s limit", secs, MAX_DURATION_SECS);
    }
    Ok(())
}

pub fn run_simulate(args: &SimulateArgs) -> Result<()> {
    check_duration(args.duration_secs)?;
    let cfg = args.config.resolve()?;
    let scenario = scaled_scenario(args, cfg.sampling_period_ms);
    let report = sim::simulate(&cfg, &scenario)?;

    if !args.summary_only {
        print_series(&report);
    }
    print_summary(&report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_scale_with_duration() {
        let args = SimulateArgs {
            config: ConfigArgs::default(),
            seed: 1,
            duration_secs: 30.0,
            summary_only: true,
        };
        let s = scaled_scenario(&args, 200);
        assert_eq!(s.phases[0].until_s, 10.0);
        assert_eq!(s.phases[1].until_s, 20.0);
        assert_eq!(s.ticks(), 151);
    }

    #[test]
    fn degenerate_durations_rejected() {
        for bad in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN, 0.0, -5.0, 1e18] {
            assert!(check_duration(bad).is_err(), "accepted {}", bad);
        }
        assert!(check_duration(60.0).is_ok());
        assert!(check_duration(MAX_DURATION_SECS).is_ok());
    }

    #[test]
    fn infinite_duration_never_reaches_simulator() {
        let args = SimulateArgs {
            config: ConfigArgs::default(),
            seed: 1,
            duration_secs: f64::INFINITY,
            summary_only: true,
        };
        assert!(run_simulate(&args).is_err());
    }
}
