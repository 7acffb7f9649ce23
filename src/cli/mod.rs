// HPRO CLI PLUMBING
// CONFIG RESOLUTION (FILE + FLAG OVERRIDES) AND LOGGING SETUP SHARED BY
// EVERY SUBCOMMAND.

pub mod check;
pub mod replay;
pub mod run;
pub mod simulate;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use hpro::ControllerConfig;

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    // JSON CONFIG FILE. MISSING FIELDS TAKE THEIR DEFAULTS.
    #[arg(long)]
    pub config: Option<PathBuf>,

    // SAMPLING PERIOD IN MILLISECONDS (200MS DEFAULT)
    #[arg(long)]
    pub period_ms: Option<u64>,

    // SPI BELOW THIS IS LOW PRESSURE
    #[arg(long)]
    pub low_threshold: Option<f64>,

    // SPI ABOVE THIS IS HIGH PRESSURE
    #[arg(long)]
    pub high_threshold: Option<f64>,

    // CONSECUTIVE TICKS BEFORE A REGIME CHANGE COMMITS
    #[arg(long)]
    pub dwell: Option<u32>,

    // MAX RATE CHANGE PER TICK
    #[arg(long)]
    pub max_slew: Option<f64>,

    // RATE FLOOR
    #[arg(long)]
    pub min_rate: Option<f64>,
}

impl ConfigArgs {
    pub fn resolve(&self) -> Result<ControllerConfig> {
        let mut cfg = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str::<ControllerConfig>(&text)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => ControllerConfig::default(),
        };

        if let Some(v) = self.period_ms { cfg.sampling_period_ms = v; }
        if let Some(v) = self.low_threshold { cfg.low_threshold = v; }
        if let Some(v) = self.high_threshold { cfg.high_threshold = v; }
        if let Some(v) = self.dwell { cfg.hysteresis_dwell = v; }
        if let Some(v) = self.max_slew { cfg.max_slew_rate = v; }
        if let Some(v) = self.min_rate { cfg.min_rate_fraction = v; }

        cfg.validate()?;
        Ok(cfg)
    }
}

pub fn print_config(cfg: &ControllerConfig) {
    println!("PERIOD:          {} ms", cfg.sampling_period_ms);
    println!("THRESHOLDS:      low={} high={} (dwell {} ticks)",
             cfg.low_threshold, cfg.high_threshold, cfg.hysteresis_dwell);
    println!("TARGETS:         L={} S={} H={} (min={})",
             cfg.low_target, cfg.standard_target, cfg.high_target, cfg.min_rate_fraction);
    println!("SLEW:            {} / tick", cfg.max_slew_rate);
    println!("LATENCY BUDGET:  {}x floor={}us gain={} window={} min={}",
             cfg.latency_budget_ratio, cfg.latency_floor_us, cfg.correction_gain,
             cfg.latency_window, cfg.latency_min_samples);
    println!("SPI SMOOTHING:   {}", cfg.spi_smoothing);
    println!();
}

// HPRO_LOG > RUST_LOG > --verbose. LOGS GO TO STDERR SO TELEMETRY ON
// STDOUT STAYS MACHINE-READABLE.
pub fn init_logging(verbose: bool) {
    let filter = std::env::var("HPRO_LOG")
        .ok()
        .and_then(|d| EnvFilter::try_new(d).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(if verbose { "warn,hpro=debug" } else { "warn,hpro=info" }));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    if verbose {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.with_timer(fmt::time::uptime()))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.without_time().compact())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let args = ConfigArgs {
            dwell: Some(5),
            max_slew: Some(0.05),
            ..ConfigArgs::default()
        };
        let cfg = args.resolve().unwrap();
        assert_eq!(cfg.hysteresis_dwell, 5);
        assert_eq!(cfg.max_slew_rate, 0.05);
        assert_eq!(cfg.low_threshold, ControllerConfig::default().low_threshold);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let args = ConfigArgs {
            low_threshold: Some(0.9),
            high_threshold: Some(0.2),
            ..ConfigArgs::default()
        };
        assert!(args.resolve().is_err());
    }

    #[test]
    fn partial_json_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hpro.json");
        std::fs::write(&path, r#"{ "high_threshold": 0.7, "source_weights": { "dirty_rate": 2.0 } }"#).unwrap();
        let args = ConfigArgs { config: Some(path), ..ConfigArgs::default() };
        let cfg = args.resolve().unwrap();
        assert_eq!(cfg.high_threshold, 0.7);
        assert_eq!(cfg.weight_for("dirty_rate"), 2.0);
        assert_eq!(cfg.sampling_period_ms, 200);
    }
}
