// HPRO LATENCY FEEDBACK MONITOR
// SLIDING WINDOW OF PER-OPERATION FOREGROUND LATENCIES -> P99 / NOMINAL FLOOR
//
// EVALUATES WHATEVER ARRIVED THIS TICK. NEVER WAITS FOR MORE. A TICK WITH
// TOO FEW OPERATIONS REPORTS ABSENT RATHER THAN A NOISY EXTREME PERCENTILE.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, Result};
use crate::tuning::ControllerConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyObservation {
    pub operation_id: u64,
    pub latency: Duration,
}

impl LatencyObservation {
    pub fn new(operation_id: u64, latency: Duration) -> Self {
        Self { operation_id, latency }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatencySample {
    pub tick_index: u64,
    pub observed_latency_ratio: f64,
}

// NEAREST-RANK PERCENTILE OVER AN UNSORTED SLICE. PURE FUNCTION.
// RANK = ceil(n * pct / 100), CLAMPED TO [1, n].
pub fn percentile_ns(values: &[u64], pct: u64) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let n = sorted.len() as u64;
    let rank = ((n * pct + 99) / 100).clamp(1, n);
    Some(sorted[(rank - 1) as usize])
}

pub struct LatencyMonitor {
    window: VecDeque<u64>,
    capacity: usize,
    min_samples: usize,
    floor_ns: u64,
}

impl LatencyMonitor {
    pub fn new(config: &ControllerConfig) -> Self {
        let capacity = config.latency_window.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            min_samples: config.latency_min_samples,
            floor_ns: (config.latency_floor().as_nanos() as u64).max(1),
        }
    }

    fn push(&mut self, lat_ns: u64) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(lat_ns);
    }

    pub fn try_observe(&mut self, tick_index: u64, raw: &[LatencyObservation]) -> Result<LatencySample> {
        for obs in raw {
            self.push(obs.latency.as_nanos().min(u128::from(u64::MAX)) as u64);
        }

        if raw.len() < self.min_samples {
            return Err(ControllerError::InsufficientLatencySamples {
                observed: raw.len(),
                required: self.min_samples,
            });
        }

        let (a, b) = self.window.as_slices();
        let mut all = Vec::with_capacity(a.len() + b.len());
        all.extend_from_slice(a);
        all.extend_from_slice(b);
        let p99 = percentile_ns(&all, 99).unwrap_or(self.floor_ns);

        Ok(LatencySample {
            tick_index,
            observed_latency_ratio: (p99 as f64 / self.floor_ns as f64).max(1.0),
        })
    }

    pub fn observe(&mut self, tick_index: u64, raw: &[LatencyObservation]) -> Option<LatencySample> {
        match self.try_observe(tick_index, raw) {
            Ok(s) => Some(s),
            Err(e) => {
                log_debug!("TICK {}: LATENCY ABSENT ({})", tick_index, e);
                None
            }
        }
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(lat_us: &[u64]) -> Vec<LatencyObservation> {
        lat_us.iter()
            .enumerate()
            .map(|(i, us)| LatencyObservation::new(i as u64, Duration::from_micros(*us)))
            .collect()
    }

    fn monitor(window: usize, min: usize) -> LatencyMonitor {
        LatencyMonitor::new(&ControllerConfig {
            latency_window: window,
            latency_min_samples: min,
            latency_floor_us: 1_000,
            ..ControllerConfig::default()
        })
    }

    #[test]
    fn percentile_nearest_rank() {
        let v: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile_ns(&v, 99), Some(99));
        assert_eq!(percentile_ns(&v, 50), Some(50));
        assert_eq!(percentile_ns(&[7], 99), Some(7));
        assert_eq!(percentile_ns(&[], 99), None);
    }

    #[test]
    fn small_window_p99_is_the_max() {
        assert_eq!(percentile_ns(&[3, 1, 9, 2], 99), Some(9));
    }

    #[test]
    fn too_few_samples_is_absent() {
        let mut m = monitor(64, 4);
        let err = m.try_observe(0, &obs(&[1_000, 1_000])).unwrap_err();
        assert_eq!(err, ControllerError::InsufficientLatencySamples { observed: 2, required: 4 });
        assert!(m.observe(1, &[]).is_none());
        // STILL RETAINED FOR LATER TICKS
        assert_eq!(m.window_len(), 2);
    }

    #[test]
    fn ratio_is_relative_to_floor() {
        let mut m = monitor(64, 4);
        let s = m.observe(0, &obs(&[1_000, 1_200, 1_500, 3_000])).unwrap();
        assert!((s.observed_latency_ratio - 3.0).abs() < 1e-9);
        assert_eq!(s.tick_index, 0);
    }

    #[test]
    fn ratio_never_below_one() {
        let mut m = monitor(64, 2);
        let s = m.observe(0, &obs(&[100, 200])).unwrap();
        assert_eq!(s.observed_latency_ratio, 1.0);
    }

    #[test]
    fn window_evicts_oldest() {
        let mut m = monitor(4, 2);
        m.observe(0, &obs(&[9_000, 9_000]));
        let s = m.observe(1, &obs(&[1_000, 1_000, 1_000, 1_000])).unwrap();
        assert_eq!(m.window_len(), 4);
        assert_eq!(s.observed_latency_ratio, 1.0);
    }
}
