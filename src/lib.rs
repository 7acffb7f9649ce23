// HPRO LIBRARY CRATE
// PRESSURE-ADAPTIVE THROTTLE CONTROLLER FOR BULK TRANSFER / REPLICATION.
// EVERYTHING HERE IS PURE RUST AND RUNS OFFLINE; THE BINARY ADDS THE CLI,
// THE COLLECTOR THREADS AND SIGNAL HANDLING.

#[macro_use]
mod log;

pub mod adaptive;
pub mod classifier;
pub mod error;
pub mod event;
pub mod latency;
pub mod sampler;
pub mod sim;
pub mod throttle;
pub mod tuning;

pub use adaptive::{Controller, InputBuffers, LoopSummary, TransferEngine, run_loop};
pub use error::ControllerError;
pub use tuning::{ControllerConfig, Regime};
