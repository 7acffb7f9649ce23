// HPRO TELEMETRY LOG
// ONE RECORD PER TICK. PRE-ALLOCATED RING BUFFER, NO HEAP ALLOCATION ON RECORD.
// FIRE-AND-FORGET: WHEN NO ONE DRAINS, THE OLDEST UNSENT RECORD IS OVERWRITTEN.
// THE CONTROL LOOP NEVER WAITS ON A TELEMETRY CONSUMER.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::tuning::Regime;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub tick_index:    u64,
    pub timestamp_ns:  u64,
    pub spi:           f64,
    pub spi_degraded:  bool,
    pub regime:        Regime,
    pub rate_fraction: f64,
    pub latency_ratio: Option<f64>,
}

impl TelemetryRecord {
    const EMPTY: TelemetryRecord = TelemetryRecord {
        tick_index: 0,
        timestamp_ns: 0,
        spi: 0.0,
        spi_degraded: false,
        regime: Regime::Standard,
        rate_fraction: 0.0,
        latency_ratio: None,
    };

    // HUMAN-READABLE TELEMETRY LINE, ONE PER TICK
    pub fn line(&self) -> String {
        let lat = match self.latency_ratio {
            Some(r) => format!("{:.3}", r),
            None => "-".to_string(),
        };
        format!(
            "tick: {:<6} spi: {:.3}{} rate: {:.3} p99x: {:<6} [{}]",
            self.tick_index,
            self.spi,
            if self.spi_degraded { "*" } else { " " },
            self.rate_fraction,
            lat,
            self.regime.label(),
        )
    }
}

struct Ring {
    slots: Vec<TelemetryRecord>,
    head:  usize,
    len:   usize,
}

impl Ring {
    fn oldest(&self) -> usize {
        (self.head + self.slots.len() - self.len) % self.slots.len()
    }

    // ITERATE UNSENT RECORDS IN CHRONOLOGICAL ORDER
    fn iter_chronological(&self) -> impl Iterator<Item = &TelemetryRecord> {
        let start = self.oldest();
        let cap = self.slots.len();
        (0..self.len).map(move |i| &self.slots[(start + i) % cap])
    }
}

pub struct TelemetryLog {
    ring:     Mutex<Ring>,
    recorded: AtomicU64,
    dropped:  AtomicU64,
}

impl TelemetryLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                slots: vec![TelemetryRecord::EMPTY; capacity],
                head: 0,
                len: 0,
            }),
            recorded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    // RECORD ONE TICK. OVERWRITES THE OLDEST UNSENT ENTRY WHEN FULL.
    pub fn record(&self, rec: TelemetryRecord) {
        let mut ring = self.ring.lock();
        let cap = ring.slots.len();
        let head = ring.head;
        ring.slots[head] = rec;
        ring.head = (head + 1) % cap;
        if ring.len < cap {
            ring.len += 1;
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.recorded.fetch_add(1, Ordering::Relaxed);
    }

    // TAKE EVERY UNSENT RECORD, OLDEST FIRST
    pub fn drain(&self) -> Vec<TelemetryRecord> {
        let mut ring = self.ring.lock();
        let out: Vec<TelemetryRecord> = ring.iter_chronological().copied().collect();
        ring.len = 0;
        out
    }

    pub fn pending(&self) -> usize {
        self.ring.lock().len
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().slots.len()
    }

    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    // DUMP UNSENT RECORDS WITHOUT CONSUMING THEM
    pub fn dump(&self) {
        let ring = self.ring.lock();
        if ring.len == 0 {
            return;
        }

        let mut iter = ring.iter_chronological();
        let Some(first) = iter.next() else { return };
        let base_ts = first.timestamp_ns;

        println!("\n{:<10} {:<8} {:<8} {:<8} {:<10} {:<10}",
            "TIME_S", "TICK", "SPI", "RATE", "P99X", "REGIME");
        println!("{}", "-".repeat(58));

        for r in std::iter::once(first).chain(iter) {
            let elapsed_s = r.timestamp_ns.saturating_sub(base_ts) as f64 / 1_000_000_000.0;
            let lat = r.latency_ratio.map(|v| format!("{:.3}", v)).unwrap_or_else(|| "-".into());
            println!("{:<10.1} {:<8} {:<8.3} {:<8.3} {:<10} {:<10}",
                elapsed_s, r.tick_index, r.spi, r.rate_fraction, lat, r.regime.label());
        }

        let dropped = self.dropped();
        if dropped > 0 {
            println!("\n(RING BUFFER WRAPPED -- {} OLDEST RECORDS DROPPED)", dropped);
        }
        println!("PENDING RECORDS: {}", ring.len);
    }
}

// MONOTONIC CLOCK IN NANOSECONDS
pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(tick: u64) -> TelemetryRecord {
        TelemetryRecord {
            tick_index: tick,
            timestamp_ns: tick * 200_000_000,
            spi: 0.5,
            spi_degraded: false,
            regime: Regime::Standard,
            rate_fraction: 0.6,
            latency_ratio: Some(1.0),
        }
    }

    #[test]
    fn record_then_drain() {
        let log = TelemetryLog::new(8);
        log.record(rec(0));
        log.record(rec(1));
        assert_eq!(log.pending(), 2);

        let out = log.drain();
        assert_eq!(out.iter().map(|r| r.tick_index).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(log.pending(), 0);
        assert_eq!(log.recorded(), 2);
        assert_eq!(log.dropped(), 0);
    }

    #[test]
    fn full_ring_drops_oldest() {
        let log = TelemetryLog::new(4);
        for t in 0..6 {
            log.record(rec(t));
        }
        assert_eq!(log.pending(), 4);
        assert_eq!(log.dropped(), 2);

        let ticks: Vec<u64> = log.drain().iter().map(|r| r.tick_index).collect();
        assert_eq!(ticks, vec![2, 3, 4, 5]);
    }

    #[test]
    fn drain_after_wrap_continues_in_order() {
        let log = TelemetryLog::new(3);
        for t in 0..5 {
            log.record(rec(t));
        }
        log.drain();
        log.record(rec(5));
        log.record(rec(6));
        let ticks: Vec<u64> = log.drain().iter().map(|r| r.tick_index).collect();
        assert_eq!(ticks, vec![5, 6]);
    }

    #[test]
    fn zero_capacity_is_bumped_to_one() {
        let log = TelemetryLog::new(0);
        assert_eq!(log.capacity(), 1);
        log.record(rec(0));
        log.record(rec(1));
        assert_eq!(log.drain()[0].tick_index, 1);
    }

    #[test]
    fn line_marks_degraded_and_absent() {
        let mut r = rec(7);
        r.spi_degraded = true;
        r.latency_ratio = None;
        let line = r.line();
        assert!(line.contains("0.500*"));
        assert!(line.contains("p99x: -"));
        assert!(line.contains("[STANDARD]"));
    }

    #[test]
    fn dump_no_panic() {
        let log = TelemetryLog::new(4);
        log.dump();
        log.record(rec(0));
        log.record(rec(1));
        log.dump();
    }

    #[test]
    fn monotonic_clock_advances() {
        let a = now_ns();
        let b = now_ns();
        assert!(a > 0);
        assert!(b >= a);
    }
}
