// HPRO v0.3 -- PRESSURE-ADAPTIVE TRANSFER THROTTLE
// KEEPS BULK TRANSFER (MIGRATION, REPLICATION, SNAPSHOTS) FROM BLOWING UP
// FOREGROUND TAIL LATENCY.
//
// CONTROL DECISIONS HAPPEN IN THE LIBRARY (ONE TICK PER SAMPLING PERIOD)
// THIS BINARY HANDLES: CONFIGURATION, COLLECTORS, REPORTING, SIGNALS

mod cli;

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{Parser, Subcommand};

use cli::ConfigArgs;
use cli::replay::ReplayArgs;
use cli::run::RunArgs;
use cli::simulate::SimulateArgs;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "hpro")]
#[command(about = "HPRO -- PRESSURE-ADAPTIVE TRANSFER THROTTLE")]
struct Cli {
    // DEBUG-LEVEL LOGGING WITH UPTIME TIMESTAMPS
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    // RUN THE LIVE CONTROL LOOP AGAINST THE SYNTHETIC COLLECTOR
    Run(RunArgs),
    // COMPARE AGGRESSIVE / CONSERVATIVE / HPRO ON THE THREE-PHASE SCENARIO
    Simulate(SimulateArgs),
    // FEED A RECORDED SPI TRACE THROUGH THE CONTROLLER
    Replay(ReplayArgs),
    // VALIDATE AND PRINT THE RESOLVED CONFIG
    Check(ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli::init_logging(cli.verbose);

    match &cli.command {
        Command::Run(args) => {
            ctrlc::set_handler(move || {
                SHUTDOWN.store(true, Ordering::Relaxed);
            })?;

            println!("HPRO v0.3");
            cli::run::run_live(args, &SHUTDOWN)?;
            println!("HPRO OUT.");
        }
        Command::Simulate(args) => cli::simulate::run_simulate(args)?,
        Command::Replay(args) => cli::replay::run_replay(args)?,
        Command::Check(args) => cli::check::run_check(args)?,
    }

    Ok(())
}
