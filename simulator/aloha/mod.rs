//! ALOHA channel simulator module
//!
//! A pure (or slotted) ALOHA network driven by the sigsweep kernel, and the
//! sweep that finds the packet inter-arrival mean maximizing channel
//! utilization for each host count:
//! - Hosts transmit frames after exponential idle times
//! - The server detects overlapping frames and emits reception signals
//! - Channel utilization = time average of the server's `receive` signal

pub mod config;
pub mod model;
pub mod runner;
pub mod stats;

pub use config::{pure_aloha_ini, AlohaConfig, AlohaSweepConfig};
pub use model::{AlohaEvent, AlohaModel};
pub use runner::{channel_utilization_probe, compute_utilization, AlohaEngine, AlohaSweepRunner};
pub use stats::{EvaluationRow, OptimumRow, SweepResult};
