// HPRO THROTTLE CONTROLLER
// REGIME TARGET -> PROPORTIONAL LATENCY CORRECTION -> SLEW LIMIT -> CLAMP
//
// A REGIME FLIP NEVER JUMPS THE ACTUATOR. THE RATE RAMPS AT MOST
// max_slew_rate PER TICK IN EITHER DIRECTION, SO FOREGROUND TAIL LATENCY
// SEES A BOUNDED RAMP INSTEAD OF A STEP.

use serde::{Deserialize, Serialize};

use crate::latency::LatencySample;
use crate::tuning::{ControllerConfig, Regime};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThrottleSetpoint {
    pub tick_index: u64,
    pub rate_fraction: f64,
    pub regime: Regime,
}

pub struct ThrottleController {
    min_rate: f64,
    max_slew: f64,
    budget_ratio: f64,
    correction_gain: f64,
    targets: [f64; 3],
}

impl ThrottleController {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            min_rate: config.min_rate_fraction,
            max_slew: config.max_slew_rate,
            budget_ratio: config.latency_budget_ratio,
            correction_gain: config.correction_gain,
            targets: [
                config.target_rate(Regime::Low),
                config.target_rate(Regime::Standard),
                config.target_rate(Regime::High),
            ],
        }
    }

    pub fn target(&self, regime: Regime) -> f64 {
        self.targets[regime as usize]
    }

    // STEP 1: WHERE WE WANT TO BE THIS TICK, IGNORING SLEW.
    // ABSENT FEEDBACK = NO CORRECTION, NEVER A STALL.
    pub fn desired_rate(&self, regime: Regime, feedback: Option<&LatencySample>) -> f64 {
        let mut desired = self.target(regime);
        if let Some(lat) = feedback {
            let excess = lat.observed_latency_ratio - self.budget_ratio;
            if excess > 0.0 {
                desired -= self.correction_gain * excess;
            }
        }
        desired.clamp(self.min_rate, 1.0)
    }

    // STEP 2: RAMP FROM THE PREVIOUS SETPOINT
    // |next - previous| <= max_slew HOLDS EXACTLY IN f64, NOT JUST UP TO ROUNDING
    pub fn slew_limit(&self, previous: f64, desired: f64) -> f64 {
        let delta = (desired - previous).clamp(-self.max_slew, self.max_slew);
        let mut next = (previous + delta).clamp(self.min_rate, 1.0);
        while (next - previous).abs() > self.max_slew {
            next = ulp_toward(next, previous);
        }
        next
    }

    pub fn step(
        &self,
        tick_index: u64,
        regime: Regime,
        feedback: Option<&LatencySample>,
        previous: &ThrottleSetpoint,
    ) -> ThrottleSetpoint {
        let desired = self.desired_rate(regime, feedback);
        ThrottleSetpoint {
            tick_index,
            rate_fraction: self.slew_limit(previous.rate_fraction, desired),
            regime,
        }
    }
}

// ONE ULP FROM x IN THE DIRECTION OF target
fn ulp_toward(x: f64, target: f64) -> f64 {
    if x == target || x.is_nan() {
        return x;
    }
    if x == 0.0 {
        let tiny = f64::from_bits(1);
        return if target > 0.0 { tiny } else { -tiny };
    }
    let bits = x.to_bits();
    let away_from_zero = (target > x) == (x > 0.0);
    f64::from_bits(if away_from_zero { bits + 1 } else { bits - 1 })
}
