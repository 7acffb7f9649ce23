// TRACE REPLAY
// FEEDS A RECORDED SPI TRACE (CSV WITH AN "spi" COLUMN, OPTIONALLY GZIPPED)
// THROUGH THE CONTROLLER OFFLINE, ONE ROW PER TICK. NO LATENCY FEED:
// EVERY TICK RUNS UNCORRECTED ON THE REGIME TARGET.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;

use hpro::adaptive::{Controller, NullEngine, TransferEngine};
use hpro::sampler::RawPressure;
use hpro::log_warn;

use super::ConfigArgs;

#[derive(Args, Debug)]
pub struct ReplayArgs {
    pub trace: PathBuf,

    #[command(flatten)]
    pub config: ConfigArgs,

    // PRINT TELEMETRY AS JSON LINES
    #[arg(long)]
    pub json: bool,
}

fn open_trace(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| format!("opening trace {}", path.display()))?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(flate2::read::GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(reader)))
}

// PARSE THE spi COLUMN. UNPARSEABLE CELLS BECOME NaN SO THE SAMPLER
// DEGRADES ON THEM EXACTLY AS IT WOULD ON A BAD LIVE READING.
pub fn read_spi_column(reader: impl BufRead) -> Result<Vec<f64>> {
    let mut lines = reader.lines();
    let header = match lines.next() {
        Some(h) => h?,
        None => bail!("trace is empty"),
    };
    let col = header.split(',')
        .position(|h| h.trim().eq_ignore_ascii_case("spi"))
        .context("trace header has no spi column")?;

    let mut out = Vec::new();
    for (i, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value = line.split(',')
            .nth(col)
            .and_then(|cell| cell.trim().parse::<f64>().ok())
            .unwrap_or_else(|| {
                log_warn!("TRACE LINE {}: NO NUMERIC spi VALUE", i + 2);
                f64::NAN
            });
        out.push(value);
    }
    Ok(out)
}

pub fn run_replay(args: &ReplayArgs) -> Result<()> {
    let cfg = args.config.resolve()?;
    let spi = read_spi_column(open_trace(&args.trace)?)?;

    let mut controller = Controller::new(cfg.clone())?;
    let mut engine = NullEngine::default();
    let period_ns = cfg.sampling_period_ms * 1_000_000;

    for (tick, value) in spi.iter().enumerate() {
        let out = controller.tick(tick as u64 * period_ns, &[RawPressure::new("replay", *value)], &[]);
        engine.apply_rate(&out.setpoint)?;
        if args.json {
            println!("{}", serde_json::to_string(&out.record)?);
        } else {
            println!("{}", out.record.line());
        }
    }

    let s = controller.stats();
    println!(
        "[REPLAY] rows={} final_rate={:.3} final_regime={} transitions={} degraded={}",
        spi.len(),
        engine.last_rate.unwrap_or(cfg.initial_rate_fraction),
        controller.regime().label(),
        s.transitions,
        s.degraded_ticks,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    #[test]
    fn reads_spi_column_by_name() {
        let csv = "time,spi,latency_hpro\n0.0,0.21,1.0\n0.2,0.19,1.0\n";
        let v = read_spi_column(Cursor::new(csv)).unwrap();
        assert_eq!(v, vec![0.21, 0.19]);
    }

    #[test]
    fn bad_cell_becomes_nan() {
        let csv = "spi\n0.5\noops\n";
        let v = read_spi_column(Cursor::new(csv)).unwrap();
        assert_eq!(v.len(), 2);
        assert!(v[1].is_nan());
    }

    #[test]
    fn missing_column_is_an_error() {
        assert!(read_spi_column(Cursor::new("time,latency\n0,1\n")).is_err());
        assert!(read_spi_column(Cursor::new("")).is_err());
    }

    #[test]
    fn gzipped_trace_is_transparent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.csv.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(b"time,spi\n0.0,0.9\n0.2,0.9\n").unwrap();
        enc.finish().unwrap();

        let v = read_spi_column(open_trace(&path).unwrap()).unwrap();
        assert_eq!(v, vec![0.9, 0.9]);
    }
}
