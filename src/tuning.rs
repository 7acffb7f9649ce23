// HPRO TUNING TYPES
// PURE-RUST MODULE: REGIMES, THRESHOLDS, TARGETS, CONTROLLER CONFIG
// SHARED BETWEEN THE BINARY (main.rs, cli/) AND THE INTEGRATION TESTS

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, Result};

// SPI THRESHOLDS
// BELOW LOW: SYSTEM IS IDLE, PUSH BULK DATA AT FULL SPEED.
// ABOVE HIGH: FOREGROUND IS CONTENDED, GET OUT OF THE WAY.
// BETWEEN: STANDARD, BALANCED TRANSFER.

pub const DEFAULT_LOW_THRESHOLD: f64  = 0.3;
pub const DEFAULT_HIGH_THRESHOLD: f64 = 0.8;
pub const DEFAULT_DWELL_TICKS: u32    = 3;     // 600MS AT THE DEFAULT PERIOD

// SAMPLING

pub const DEFAULT_PERIOD_MS: u64      = 200;
pub const DEFAULT_SPI_SMOOTHING: f64  = 0.6;   // EMA ALPHA, 1.0 = NO SMOOTHING
pub const DEFAULT_SOURCE_WEIGHT: f64  = 1.0;

// REGIME TARGET RATES (FRACTION OF MAX TRANSFER RATE)

pub const LOW_TARGET: f64             = 1.0;   // FULL SPEED
pub const STANDARD_TARGET: f64        = 0.6;
pub const HIGH_TARGET: f64            = 0.2;   // MINIMAL INTERFERENCE

// ACTUATION BOUNDS

pub const DEFAULT_MIN_RATE: f64       = 0.05;  // NEVER FULLY STALL THE TRANSFER
pub const DEFAULT_MAX_SLEW: f64       = 0.1;   // 10 TICKS FROM FULL TO ZERO

// LATENCY FEEDBACK

pub const DEFAULT_LATENCY_BUDGET: f64 = 1.2;   // P99 MAY RISE 20% OVER FLOOR
pub const DEFAULT_CORRECTION_GAIN: f64 = 0.5;
pub const DEFAULT_LATENCY_WINDOW: usize = 256;
pub const DEFAULT_LATENCY_MIN_SAMPLES: usize = 8;
pub const DEFAULT_LATENCY_FLOOR_US: u64 = 1_000;

pub const DEFAULT_TELEMETRY_CAPACITY: usize = 4096;

// REGIME

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Low = 0,
    Standard = 1,
    High = 2,
}

impl Regime {
    pub const ALL: [Regime; 3] = [Regime::Low, Regime::Standard, Regime::High];

    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Standard => "STANDARD",
            Self::High => "HIGH",
        }
    }
}

// CANDIDATE DETECTION
// MAGNITUDE ONLY. HYSTERESIS (DWELL) LIVES IN classifier.rs.
// A VALUE EXACTLY ON A THRESHOLD IS STANDARD.

pub fn detect_candidate(spi: f64, low_threshold: f64, high_threshold: f64) -> Regime {
    if spi < low_threshold {
        Regime::Low
    } else if spi > high_threshold {
        Regime::High
    } else {
        Regime::Standard
    }
}

// CONTROLLER CONFIG
// IMMUTABLE FOR THE LIFETIME OF A CONTROLLER. RECONFIGURE = NEW INSTANCE.

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub sampling_period_ms: u64,
    pub low_threshold: f64,
    pub high_threshold: f64,
    pub hysteresis_dwell: u32,
    pub low_target: f64,
    pub standard_target: f64,
    pub high_target: f64,
    pub min_rate_fraction: f64,
    pub max_slew_rate: f64,
    pub initial_rate_fraction: f64,
    pub latency_budget_ratio: f64,
    pub correction_gain: f64,
    pub latency_window: usize,
    pub latency_min_samples: usize,
    pub latency_floor_us: u64,
    pub spi_smoothing: f64,
    pub source_weights: BTreeMap<String, f64>,
    pub default_weight: f64,
    pub telemetry_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sampling_period_ms: DEFAULT_PERIOD_MS,
            low_threshold: DEFAULT_LOW_THRESHOLD,
            high_threshold: DEFAULT_HIGH_THRESHOLD,
            hysteresis_dwell: DEFAULT_DWELL_TICKS,
            low_target: LOW_TARGET,
            standard_target: STANDARD_TARGET,
            high_target: HIGH_TARGET,
            min_rate_fraction: DEFAULT_MIN_RATE,
            max_slew_rate: DEFAULT_MAX_SLEW,
            // START WHERE THE INITIAL STANDARD REGIME WANTS TO BE
            initial_rate_fraction: STANDARD_TARGET,
            latency_budget_ratio: DEFAULT_LATENCY_BUDGET,
            correction_gain: DEFAULT_CORRECTION_GAIN,
            latency_window: DEFAULT_LATENCY_WINDOW,
            latency_min_samples: DEFAULT_LATENCY_MIN_SAMPLES,
            latency_floor_us: DEFAULT_LATENCY_FLOOR_US,
            spi_smoothing: DEFAULT_SPI_SMOOTHING,
            source_weights: BTreeMap::new(),
            default_weight: DEFAULT_SOURCE_WEIGHT,
            telemetry_capacity: DEFAULT_TELEMETRY_CAPACITY,
        }
    }
}

fn invalid(msg: impl Into<String>) -> ControllerError {
    ControllerError::ConfigInvalid(msg.into())
}

fn is_unit(v: f64) -> bool {
    v.is_finite() && (0.0..=1.0).contains(&v)
}

impl ControllerConfig {
    pub fn sampling_period(&self) -> Duration {
        Duration::from_millis(self.sampling_period_ms)
    }

    pub fn latency_floor(&self) -> Duration {
        Duration::from_micros(self.latency_floor_us)
    }

    pub fn target_rate(&self, regime: Regime) -> f64 {
        match regime {
            Regime::Low => self.low_target,
            Regime::Standard => self.standard_target,
            Regime::High => self.high_target,
        }
    }

    pub fn weight_for(&self, source: &str) -> f64 {
        self.source_weights.get(source).copied().unwrap_or(self.default_weight)
    }

    // LAST-KNOWN SPI BEFORE ANY VALID READING: DEAD CENTER OF STANDARD
    pub fn neutral_spi(&self) -> f64 {
        (self.low_threshold + self.high_threshold) / 2.0
    }

    // REJECT ANYTHING THAT WOULD MAKE THE CLAMP OR SLEW INVARIANTS UNSATISFIABLE.
    // FIRST FAILING RULE WINS.
    pub fn validate(&self) -> Result<()> {
        if self.sampling_period_ms == 0 {
            return Err(invalid("sampling_period_ms must be > 0"));
        }
        if !is_unit(self.low_threshold) || !is_unit(self.high_threshold) {
            return Err(invalid(format!(
                "thresholds must lie in [0, 1] (low={}, high={})",
                self.low_threshold, self.high_threshold,
            )));
        }
        if self.low_threshold >= self.high_threshold {
            return Err(invalid(format!(
                "low_threshold ({}) must be < high_threshold ({})",
                self.low_threshold, self.high_threshold,
            )));
        }
        if self.hysteresis_dwell == 0 {
            return Err(invalid("hysteresis_dwell must be >= 1 tick"));
        }
        if !is_unit(self.min_rate_fraction) {
            return Err(invalid(format!(
                "min_rate_fraction must lie in [0, 1] (got {})",
                self.min_rate_fraction,
            )));
        }
        for regime in Regime::ALL {
            let target = self.target_rate(regime);
            if !target.is_finite() || target < self.min_rate_fraction || target > 1.0 {
                return Err(invalid(format!(
                    "{} target {} outside [min_rate_fraction={}, 1.0]",
                    regime.label(), target, self.min_rate_fraction,
                )));
            }
        }
        if !self.max_slew_rate.is_finite() || self.max_slew_rate <= 0.0 || self.max_slew_rate > 1.0 {
            return Err(invalid(format!(
                "max_slew_rate must lie in (0, 1] (got {})",
                self.max_slew_rate,
            )));
        }
        if !self.initial_rate_fraction.is_finite()
            || self.initial_rate_fraction < self.min_rate_fraction
            || self.initial_rate_fraction > 1.0
        {
            return Err(invalid(format!(
                "initial_rate_fraction {} outside [min_rate_fraction={}, 1.0]",
                self.initial_rate_fraction, self.min_rate_fraction,
            )));
        }
        if !self.latency_budget_ratio.is_finite() || self.latency_budget_ratio < 1.0 {
            return Err(invalid(format!(
                "latency_budget_ratio must be >= 1.0 (got {})",
                self.latency_budget_ratio,
            )));
        }
        if !self.correction_gain.is_finite() || self.correction_gain < 0.0 {
            return Err(invalid(format!(
                "correction_gain must be >= 0 (got {})",
                self.correction_gain,
            )));
        }
        if self.latency_window == 0 {
            return Err(invalid("latency_window must be > 0"));
        }
        if self.latency_min_samples == 0 || self.latency_min_samples > self.latency_window {
            return Err(invalid(format!(
                "latency_min_samples must lie in [1, latency_window={}] (got {})",
                self.latency_window, self.latency_min_samples,
            )));
        }
        if self.latency_floor_us == 0 {
            return Err(invalid("latency_floor_us must be > 0"));
        }
        if !self.spi_smoothing.is_finite() || self.spi_smoothing <= 0.0 || self.spi_smoothing > 1.0 {
            return Err(invalid(format!(
                "spi_smoothing must lie in (0, 1] (got {})",
                self.spi_smoothing,
            )));
        }
        if !self.default_weight.is_finite() || self.default_weight < 0.0 {
            return Err(invalid(format!(
                "default_weight must be >= 0 (got {})",
                self.default_weight,
            )));
        }
        if let Some((source, w)) = self.source_weights.iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(invalid(format!("weight for source {source} must be >= 0 (got {w})")));
        }
        if self.telemetry_capacity == 0 {
            return Err(invalid("telemetry_capacity must be > 0"));
        }
        Ok(())
    }
}

// SUMMARY GATING
// PRINT EVERY TICK WHILE THE REGIME IS MOVING, EVERY Nth TICK WHEN SETTLED

pub const SETTLED_PRINT_EVERY: u64 = 5;

pub fn should_print_telemetry(tick_index: u64, ticks_since_transition: u64, dwell: u32) -> bool {
    if ticks_since_transition > u64::from(dwell) * 2 {
        tick_index % SETTLED_PRINT_EVERY == 0
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ControllerConfig::default().validate().is_ok());
    }

    #[test]
    fn threshold_boundaries_map_to_standard() {
        assert_eq!(detect_candidate(0.3, 0.3, 0.8), Regime::Standard);
        assert_eq!(detect_candidate(0.8, 0.3, 0.8), Regime::Standard);
        assert_eq!(detect_candidate(0.2999, 0.3, 0.8), Regime::Low);
        assert_eq!(detect_candidate(0.8001, 0.3, 0.8), Regime::High);
    }

    #[test]
    fn neutral_spi_sits_between_thresholds() {
        let cfg = ControllerConfig::default();
        assert_eq!(
            detect_candidate(cfg.neutral_spi(), cfg.low_threshold, cfg.high_threshold),
            Regime::Standard,
        );
    }

    #[test]
    fn unknown_source_uses_default_weight() {
        let mut cfg = ControllerConfig::default();
        cfg.source_weights.insert("dirty_rate".into(), 3.0);
        assert_eq!(cfg.weight_for("dirty_rate"), 3.0);
        assert_eq!(cfg.weight_for("queue_depth"), DEFAULT_SOURCE_WEIGHT);
    }

    #[test]
    fn regime_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Regime::High).unwrap(), "\"high\"");
        assert_eq!(serde_json::from_str::<Regime>("\"low\"").unwrap(), Regime::Low);
    }

    #[test]
    fn telemetry_gating_thins_settled_output() {
        assert!(should_print_telemetry(3, 1, 3));
        assert!(should_print_telemetry(5, 100, 3));
        assert!(!should_print_telemetry(6, 100, 3));
    }
}
