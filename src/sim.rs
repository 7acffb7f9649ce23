// HPRO SCENARIO SIMULATOR
// DETERMINISTIC THREE-PHASE WORKLOAD + SYNTHETIC INTERFERENCE PLANT.
//
// PHASES (DEFAULT, 200MS TICKS OVER 60S):
//   0-20S   SPI ~0.20  IDLE, TRANSFER SHOULD RUN FLAT OUT
//   20-40S  SPI ~0.85  FOREGROUND SURGE, TRANSFER MUST GET OUT OF THE WAY
//   40-60S  SPI ~0.55  BACK TO STANDARD
//
// THREE POLICIES SEE THE SAME SPI AND THE SAME NOISE:
//   AGGRESSIVE   ALWAYS 1.0
//   CONSERVATIVE ALWAYS min_rate_fraction
//   HPRO         THE ADAPTIVE CONTROLLER, FED PER-OP LATENCIES FROM ITS OWN PLANT

use std::f64::consts::PI;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::adaptive::Controller;
use crate::error::Result;
use crate::latency::LatencyObservation;
use crate::sampler::RawPressure;
use crate::tuning::{ControllerConfig, Regime};

pub const DEFAULT_SEED: u64 = 42;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Phase {
    pub until_s: f64,
    pub base_spi: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Scenario {
    pub duration_s: f64,
    pub period_ms: u64,
    pub phases: Vec<Phase>,
    pub spi_noise_std: f64,
    pub latency_noise_std: f64,
    pub ops_per_tick: usize,
    pub seed: u64,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            duration_s: 60.0,
            period_ms: 200,
            phases: vec![
                Phase { until_s: 20.0, base_spi: 0.20 },
                Phase { until_s: 40.0, base_spi: 0.85 },
                Phase { until_s: f64::INFINITY, base_spi: 0.55 },
            ],
            spi_noise_std: 0.02,
            latency_noise_std: 0.01,
            ops_per_tick: 32,
            seed: DEFAULT_SEED,
        }
    }
}

impl Scenario {
    // INCLUSIVE OF BOTH ENDS: 0.0, 0.2, ..., 60.0
    pub fn ticks(&self) -> u64 {
        let period_s = self.period_ms.max(1) as f64 / 1000.0;
        ((self.duration_s / period_s).round() as u64).saturating_add(1)
    }

    pub fn time_of(&self, tick: u64) -> f64 {
        tick as f64 * self.period_ms as f64 / 1000.0
    }

    pub fn base_spi(&self, time_s: f64) -> f64 {
        self.phases.iter()
            .find(|p| time_s < p.until_s)
            .or(self.phases.last())
            .map_or(0.0, |p| p.base_spi)
    }
}

// BOX-MULLER. ONE DRAW PER CALL; THE SECOND VARIATE IS DISCARDED.
pub fn gaussian(rng: &mut StdRng, std: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    std * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

// --- PLANT ---

// FOREGROUND INTERFERENCE CAUSED BY BULK TRANSFER.
// STEADY STATE: sensitivity * rate * (EXCESS PRESSURE ABOVE knee)^2.
// FIRST-ORDER LAG: BACKLOG BUILDS AND DRAINS OVER ~1/response TICKS.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plant {
    pub knee: f64,
    pub sensitivity: f64,
    pub response: f64,
    interference: f64,
}

impl Default for Plant {
    fn default() -> Self {
        Self { knee: 0.3, sensitivity: 5.0, response: 0.02, interference: 0.0 }
    }
}

impl Plant {
    pub fn steady_interference(&self, rate: f64, spi: f64) -> f64 {
        let excess = ((spi - self.knee).max(0.0) / (1.0 - self.knee)).min(1.0);
        self.sensitivity * rate * excess * excess
    }

    // ADVANCE ONE TICK, RETURN THE NOISE-FREE LATENCY RATIO (>= 1.0)
    pub fn advance(&mut self, rate: f64, spi: f64) -> f64 {
        let target = self.steady_interference(rate, spi);
        self.interference += (target - self.interference) * self.response;
        1.0 + self.interference.max(0.0)
    }
}

// --- POLICIES ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    Aggressive,
    Conservative,
    Hpro,
}

impl Policy {
    pub const ALL: [Policy; 3] = [Policy::Aggressive, Policy::Conservative, Policy::Hpro];

    pub fn label(self) -> &'static str {
        match self {
            Self::Aggressive => "AGGRESSIVE",
            Self::Conservative => "CONSERVATIVE",
            Self::Hpro => "HPRO",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PolicyPoint {
    pub rate: f64,
    pub latency: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SimPoint {
    pub time_s: f64,
    pub spi: f64,
    pub regime: Regime,
    pub aggressive: PolicyPoint,
    pub conservative: PolicyPoint,
    pub hpro: PolicyPoint,
}

impl SimPoint {
    pub fn policy(&self, p: Policy) -> PolicyPoint {
        match p {
            Policy::Aggressive => self.aggressive,
            Policy::Conservative => self.conservative,
            Policy::Hpro => self.hpro,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PolicySummary {
    pub policy: Policy,
    pub mean_rate: f64,
    pub p99_latency: f64,
    pub max_latency: f64,
    pub ticks_over_budget: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SimReport {
    pub points: Vec<SimPoint>,
    pub summaries: Vec<PolicySummary>,
    pub transitions: u64,
}

fn percentile_f64(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = ((sorted.len() as f64 * pct / 100.0).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

fn summarize(policy: Policy, points: &[SimPoint], budget: f64) -> PolicySummary {
    let rates: Vec<f64> = points.iter().map(|p| p.policy(policy).rate).collect();
    let lats: Vec<f64> = points.iter().map(|p| p.policy(policy).latency).collect();
    PolicySummary {
        policy,
        mean_rate: if rates.is_empty() { 0.0 } else { rates.iter().sum::<f64>() / rates.len() as f64 },
        p99_latency: percentile_f64(&lats, 99.0),
        max_latency: lats.iter().copied().fold(0.0, f64::max),
        ticks_over_budget: lats.iter().filter(|&&l| l > budget).count() as u64,
    }
}

// PER-OP LATENCIES FOR ONE TICK AROUND A GIVEN RATIO
fn synth_ops(rng: &mut StdRng, ratio: f64, floor: Duration, n: usize, first_id: u64) -> Vec<LatencyObservation> {
    let floor_ns = floor.as_nanos() as f64;
    (0..n)
        .map(|i| {
            let jitter = gaussian(rng, 0.05).abs();
            let ns = (floor_ns * ratio * (1.0 + jitter)).max(0.0);
            LatencyObservation::new(first_id + i as u64, Duration::from_nanos(ns as u64))
        })
        .collect()
}

pub fn simulate(config: &ControllerConfig, scenario: &Scenario) -> Result<SimReport> {
    let mut controller = Controller::new(config.clone())?;

    // SHARED NOISE STREAM (IDENTICAL FOR ALL POLICIES) + PRIVATE OP STREAM
    let mut noise = StdRng::seed_from_u64(scenario.seed);
    let mut ops_rng = StdRng::seed_from_u64(scenario.seed.wrapping_add(1));

    let mut plants = [Plant::default(); 3];
    let fixed_rates = [1.0, config.min_rate_fraction];
    let floor = config.latency_floor();

    let ticks = scenario.ticks();
    let mut points = Vec::with_capacity(ticks as usize);
    let mut next_op = 0u64;

    for tick in 0..ticks {
        let time_s = scenario.time_of(tick);
        let spi = (scenario.base_spi(time_s) + gaussian(&mut noise, scenario.spi_noise_std)).clamp(0.0, 1.0);
        let lat_noise = gaussian(&mut noise, scenario.latency_noise_std);

        let mut pt = [PolicyPoint { rate: 0.0, latency: 0.0 }; 3];
        for (i, &rate) in fixed_rates.iter().enumerate() {
            let ratio = plants[i].advance(rate, spi);
            pt[i] = PolicyPoint { rate, latency: ratio + lat_noise };
        }

        // HPRO: THE RATE IN FORCE THIS TICK IS THE PREVIOUS SETPOINT
        let hpro_rate = controller.setpoint().rate_fraction;
        let hpro_ratio = plants[2].advance(hpro_rate, spi);
        pt[2] = PolicyPoint { rate: hpro_rate, latency: hpro_ratio + lat_noise };

        let ops = synth_ops(&mut ops_rng, hpro_ratio, floor, scenario.ops_per_tick, next_op);
        next_op += ops.len() as u64;
        let timestamp_ns = tick * scenario.period_ms * 1_000_000;
        let out = controller.tick(timestamp_ns, &[RawPressure::new("sim", spi)], &ops);

        points.push(SimPoint {
            time_s,
            spi,
            regime: out.record.regime,
            aggressive: pt[0],
            conservative: pt[1],
            hpro: pt[2],
        });
    }

    let summaries = Policy::ALL.iter()
        .map(|&p| summarize(p, &points, config.latency_budget_ratio))
        .collect();

    Ok(SimReport {
        points,
        summaries,
        transitions: controller.stats().transitions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scenario_has_301_ticks() {
        assert_eq!(Scenario::default().ticks(), 301);
    }

    #[test]
    fn phases_switch_at_boundaries() {
        let s = Scenario::default();
        assert_eq!(s.base_spi(0.0), 0.20);
        assert_eq!(s.base_spi(19.8), 0.20);
        assert_eq!(s.base_spi(20.0), 0.85);
        assert_eq!(s.base_spi(40.0), 0.55);
        assert_eq!(s.base_spi(60.0), 0.55);
    }

    #[test]
    fn plant_is_quiet_below_knee() {
        let mut p = Plant::default();
        for _ in 0..100 {
            assert_eq!(p.advance(1.0, 0.2), 1.0);
        }
    }

    #[test]
    fn plant_lags_toward_steady_state() {
        let mut p = Plant::default();
        let steady = 1.0 + p.steady_interference(1.0, 0.85);
        let first = p.advance(1.0, 0.85);
        assert!(first > 1.0 && first < steady);
        for _ in 0..2000 {
            p.advance(1.0, 0.85);
        }
        assert!((p.advance(1.0, 0.85) - steady).abs() < 1e-6);
    }

    #[test]
    fn gaussian_is_deterministic_per_seed() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        for _ in 0..16 {
            assert_eq!(gaussian(&mut a, 1.0), gaussian(&mut b, 1.0));
        }
    }

    #[test]
    fn percentile_f64_nearest_rank() {
        let v: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile_f64(&v, 99.0), 99.0);
        assert_eq!(percentile_f64(&[], 99.0), 0.0);
    }
}
