//! # sigsweep - signal statistics and parameter sweeps
//!
//! Observe a simulated network through its signals and tune one of its
//! parameters across many configurations.
//!
//! ## Core Components
//!
//! - **SignalBus**: routes (component, signal) emissions to subscribed listeners
//! - **Result filters**: time average, sum and count transforms between a signal and a recorder
//! - **ResultRecorder**: reduces a stream to one scalar per run (`last`, `mean`, `max`, ...)
//! - **RunExecutor**: builds one isolated run, installs probes, runs it and returns the scalars
//! - **SweepOptimizer**: Nelder-Mead search per configuration, configurations in parallel
//!
//! ## Usage
//!
//! Implement [`kernel::Model`] for the network and [`run_executor::Engine`]
//! to create it from a [`RunConfig`], then:
//!
//! ```no_run
//! # use sigsweep::{RunConfig, RunExecutor, ProbeSpec, Engine};
//! # fn demo<E: Engine>(engine: E) -> Result<(), sigsweep::RunError> {
//! let executor = RunExecutor::new(engine).with_probe(ProbeSpec::from_statistic(
//!     "channelUtilization",
//!     "server",
//!     "timeavg(receive)",
//!     "last",
//! )?);
//!
//! let config = RunConfig::from_ini_text("sim-time-limit = 1000s\n", "General")?;
//! let handle = executor.run(&config)?;
//! let utilization = handle.value_or("channelUtilization", 0.0);
//! # let _ = utilization;
//! # Ok(())
//! # }
//! ```
//!
//! ## Simulation
//!
//! The pure-ALOHA model and the sweep/run binaries live in `simulator/`.

// Signal pipeline
pub mod interface;
pub mod result_filter;
pub mod result_recorder;
pub mod signal_bus;

// Runs
pub mod inifile;
pub mod kernel;
pub mod run_executor;

// Optimization
pub mod nelder_mead;
pub mod sweep;

// Analysis artifacts
pub mod chart_templates;

// Re-export commonly used types
pub use interface::{ComponentId, ListenerRef, ResultListener, SignalValue, SimTime};
pub use result_filter::{CountFilter, FilterKind, SumFilter, TimeAverageFilter};
pub use result_recorder::{RecordingMode, ResultRecorder};
pub use signal_bus::{SignalBus, SignalError};
pub use inifile::{ConfigError, Distribution, InifileContents, ParamOverlay, ParamValue};
pub use kernel::{Model, RunSummary, SimContext, Simulation};
pub use run_executor::{Engine, ProbeSpec, RunConfig, RunError, RunExecutor, RunHandle};
pub use nelder_mead::{Bound, NelderMeadConfig, SearchResult};
pub use sweep::{ConfigOutcome, Goal, Optimum, SearchSpace, SweepError, SweepOptimizer, WorkerPool};
pub use chart_templates::{Analysis, Chart, ChartTemplate, ChartTemplateRegistry, TemplateError};
