// HPRO PRESSURE SAMPLER
// WEIGHTED MEAN OF NORMALIZED COLLECTOR SIGNALS -> EMA -> CLAMP [0,1]
//
// A BAD READING NEVER STALLS THE TICK: THE LAST VALID SPI IS RE-EMITTED
// AND THE SAMPLE IS FLAGGED DEGRADED. DEGRADED TICKS DO NOT ADVANCE THE EMA.

use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, Result};
use crate::tuning::ControllerConfig;

// ONE NORMALIZED SCALAR FROM ONE EXTERNAL COLLECTOR
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawPressure {
    pub source: String,
    pub value: f64,
}

impl RawPressure {
    pub fn new(source: impl Into<String>, value: f64) -> Self {
        Self { source: source.into(), value }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PressureSample {
    pub tick_index: u64,
    pub timestamp_ns: u64,
    pub spi: f64,
    pub degraded: bool,
}

pub struct PressureSampler {
    config: ControllerConfig,
    smoothed: Option<f64>,
    last_valid: f64,
    degraded_count: u64,
}

impl PressureSampler {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            last_valid: config.neutral_spi(),
            config: config.clone(),
            smoothed: None,
            degraded_count: 0,
        }
    }

    // WEIGHTED MEAN. ANY OUT-OF-RANGE INPUT POISONS THE WHOLE TICK.
    pub fn aggregate(&self, raw: &[RawPressure]) -> Result<f64> {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for input in raw {
            if !input.value.is_finite() || !(0.0..=1.0).contains(&input.value) {
                return Err(ControllerError::InputOutOfRange {
                    source_tag: input.source.clone(),
                    value: input.value,
                });
            }
            let w = self.config.weight_for(&input.source);
            weighted += w * input.value;
            total_weight += w;
        }
        if total_weight <= 0.0 {
            return Err(ControllerError::NoPressureInput);
        }
        Ok(weighted / total_weight)
    }

    // FALLIBLE PATH: AGGREGATE + SMOOTH, OR THE REASON THIS TICK IS UNUSABLE
    pub fn try_sample(&mut self, raw: &[RawPressure]) -> Result<f64> {
        let x = self.aggregate(raw)?;
        let alpha = self.config.spi_smoothing;
        let spi = match self.smoothed {
            None => x,
            Some(prev) => alpha * x + (1.0 - alpha) * prev,
        }
        .clamp(0.0, 1.0);
        self.smoothed = Some(spi);
        self.last_valid = spi;
        Ok(spi)
    }

    // INFALLIBLE PATH USED BY THE CONTROL LOOP
    pub fn sample(&mut self, tick_index: u64, timestamp_ns: u64, raw: &[RawPressure]) -> PressureSample {
        match self.try_sample(raw) {
            Ok(spi) => PressureSample { tick_index, timestamp_ns, spi, degraded: false },
            Err(e) => {
                self.degraded_count += 1;
                log_warn!("TICK {}: PRESSURE DEGRADED ({}), REUSING SPI {:.3}", tick_index, e, self.last_valid);
                PressureSample {
                    tick_index,
                    timestamp_ns,
                    spi: self.last_valid,
                    degraded: true,
                }
            }
        }
    }

    pub fn last_valid(&self) -> f64 {
        self.last_valid
    }

    pub fn degraded_count(&self) -> u64 {
        self.degraded_count
    }
}
