//! Run Executor
//!
//! Runs one parameterized model instance to completion with statistics probes
//! installed, and hands back the final recorder values. Each call builds a
//! fresh kernel, bus, filters and recorders, so concurrent calls on different
//! threads share no mutable state.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use log::debug;

use crate::inifile::{ConfigError, Dimension, InifileContents, ParamOverlay, ParamValue};
use crate::interface::SimTime;
use crate::kernel::{Model, RunSummary, Simulation};
use crate::result_filter::FilterKind;
use crate::result_recorder::{RecordingMode, ResultRecorder};
use crate::signal_bus::SignalError;

/// Errors of a single run
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunError {
    /// Bad or missing component path, signal, or parameter
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The model failed while running
    #[error("run failed: {0}")]
    RunFailure(String),

    /// Listener wiring error
    #[error(transparent)]
    Subscription(#[from] SignalError),
}

impl From<ConfigError> for RunError {
    fn from(e: ConfigError) -> Self {
        RunError::Configuration(e.to_string())
    }
}

// ============================================================================
// Run configuration
// ============================================================================

/// Parameters of one run. Cloned into each worker; never mutated while the
/// run executes.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Parameter overlay (first match wins)
    pub params: ParamOverlay,

    /// Stop time; `None` runs until no events remain
    pub sim_time_limit: Option<SimTime>,

    /// Seed for the run's random number generator
    pub seed: u64,

    /// Network name from the `network` key, if any
    pub network: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            params: ParamOverlay::new(),
            sim_time_limit: None,
            seed: 0,
            network: None,
        }
    }
}

impl RunConfig {
    pub fn new(params: ParamOverlay) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    /// Read ini text and take `sim-time-limit`, `seed-set` and `network`
    /// from the given section
    pub fn from_ini_text(text: &str, section: &str) -> Result<Self, ConfigError> {
        let params = InifileContents::read_text(text)?.extract_config(section)?;

        let sim_time_limit = match params.lookup("sim-time-limit") {
            Some(_) => Some(params.number("sim-time-limit", Dimension::Time)?),
            None => None,
        };
        let seed = params.number_or("seed-set", Dimension::Dimensionless, 0.0)?;
        if seed < 0.0 || seed.fract() != 0.0 {
            return Err(ConfigError::InvalidValue {
                path: "seed-set".to_string(),
                message: format!("seed must be a non-negative integer, got {}", seed),
            });
        }
        let network = params.text("network").map(str::to_string);

        Ok(Self {
            params,
            sim_time_limit,
            seed: seed as u64,
            network,
        })
    }

    /// Override a parameter ahead of every existing line
    pub fn with_param(mut self, pattern: &str, value: ParamValue) -> Self {
        self.params.set(pattern, value);
        self
    }

    pub fn with_time_limit(mut self, limit: SimTime) -> Self {
        self.sim_time_limit = Some(limit);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

// ============================================================================
// Probes
// ============================================================================

/// Statistic to record: `signal` on `component`, passed through `filter`,
/// reduced by `record`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProbeSpec {
    pub name: String,
    pub component: String,
    pub signal: String,
    #[serde(default = "default_filter")]
    pub filter: FilterKind,
    pub record: RecordingMode,
}

fn default_filter() -> FilterKind {
    FilterKind::None
}

impl ProbeSpec {
    pub fn new(
        name: &str,
        component: &str,
        signal: &str,
        filter: FilterKind,
        record: RecordingMode,
    ) -> Self {
        Self {
            name: name.to_string(),
            component: component.to_string(),
            signal: signal.to_string(),
            filter,
            record,
        }
    }

    /// Parse a statistic declaration such as
    /// `source = "timeavg(receive)"`, `record = "last"`
    pub fn from_statistic(
        name: &str,
        component: &str,
        source: &str,
        record: &str,
    ) -> Result<Self, RunError> {
        let source = source.trim();
        let (filter, signal) = match source.find('(') {
            Some(open) if source.ends_with(')') => {
                let filter = source[..open]
                    .trim()
                    .parse::<FilterKind>()
                    .map_err(RunError::Configuration)?;
                (filter, source[open + 1..source.len() - 1].trim())
            }
            Some(_) => {
                return Err(RunError::Configuration(format!(
                    "malformed statistic source `{}`",
                    source
                )))
            }
            None => (FilterKind::None, source),
        };
        if signal.is_empty() || signal.contains(['(', ')', ',']) {
            return Err(RunError::Configuration(format!(
                "malformed statistic source `{}`",
                source
            )));
        }

        let record = record
            .trim()
            .parse::<RecordingMode>()
            .map_err(RunError::Configuration)?;

        Ok(Self::new(name, component, signal, filter, record))
    }
}

// ============================================================================
// Results
// ============================================================================

/// Final value of one recorder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedScalar {
    /// Raw recorder value, NaN when no data arrived
    pub value: f64,
    /// Number of values the recorder received
    pub count: u64,
}

/// Outcome of a completed run. Only exists once the run has finished, so
/// every value in it is final.
#[derive(Debug, Clone)]
pub struct RunHandle {
    scalars: BTreeMap<String, RecordedScalar>,
    summary: RunSummary,
}

impl RunHandle {
    /// Raw value of statistic `name` (may be NaN)
    pub fn value(&self, name: &str) -> Option<f64> {
        self.scalars.get(name).map(|s| s.value)
    }

    /// Value of statistic `name` with the "no data" sentinel replaced
    pub fn value_or(&self, name: &str, default: f64) -> Option<f64> {
        self.value(name)
            .map(|v| if v.is_nan() { default } else { v })
    }

    pub fn scalar(&self, name: &str) -> Option<&RecordedScalar> {
        self.scalars.get(name)
    }

    pub fn scalars(&self) -> impl Iterator<Item = (&str, &RecordedScalar)> {
        self.scalars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Creates a model instance for a run configuration.
///
/// Shared by all workers of a sweep, hence `Sync`; the model it returns lives
/// on the calling thread only.
pub trait Engine: Sync {
    type Model: Model;

    fn create(&self, config: &RunConfig) -> Result<Self::Model, RunError>;
}

/// Runs configurations of one engine with a fixed set of probes
pub struct RunExecutor<E: Engine> {
    engine: E,
    probes: Vec<ProbeSpec>,
}

impl<E: Engine> RunExecutor<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            probes: Vec::new(),
        }
    }

    pub fn with_probe(mut self, probe: ProbeSpec) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn probes(&self) -> &[ProbeSpec] {
        &self.probes
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Execute one run to completion. A panic inside the model is reported
    /// as `RunFailure` instead of unwinding into the caller.
    pub fn run(&self, config: &RunConfig) -> Result<RunHandle, RunError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_isolated(config))) {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(RunError::RunFailure(format!("model panicked: {}", message)))
            }
        }
    }

    fn run_isolated(&self, config: &RunConfig) -> Result<RunHandle, RunError> {
        let model = self.engine.create(config)?;
        let mut simulation = Simulation::new(model, config.seed);
        simulation.build()?;

        let mut recorders: Vec<(String, Rc<RefCell<ResultRecorder>>)> = Vec::new();
        for probe in &self.probes {
            if recorders.iter().any(|(name, _)| *name == probe.name) {
                return Err(RunError::Configuration(format!(
                    "statistic `{}` requested twice",
                    probe.name
                )));
            }

            let ctx = simulation.context_mut();
            let component = ctx.component_by_path(&probe.component).ok_or_else(|| {
                RunError::Configuration(format!("no component at path `{}`", probe.component))
            })?;
            if !ctx.has_signal(component, &probe.signal) {
                return Err(RunError::Configuration(format!(
                    "component `{}` has no signal `{}`",
                    probe.component, probe.signal
                )));
            }

            let recorder = Rc::new(RefCell::new(ResultRecorder::new(probe.record)));
            let head = probe.filter.build_with(recorder.clone())?;
            ctx.bus_mut().subscribe(component, &probe.signal, head)?;
            recorders.push((probe.name.clone(), recorder));
        }

        simulation.run(config.sim_time_limit)?;
        let summary = simulation.finish()?;

        let scalars = recorders
            .into_iter()
            .map(|(name, recorder)| {
                let recorder = recorder.borrow();
                (
                    name,
                    RecordedScalar {
                        value: recorder.value(),
                        count: recorder.count(),
                    },
                )
            })
            .collect();

        debug!(
            "run finished at t={} after {} events",
            summary.end_time, summary.events_processed
        );

        Ok(RunHandle { scalars, summary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::ComponentId;
    use crate::kernel::SimContext;

    /// Toggles a `busy` signal between 1 and 0 with a fixed duty cycle
    struct Blinker {
        on: SimTime,
        off: SimTime,
        fail_at: Option<SimTime>,
        panic_at: Option<SimTime>,
        id: Option<ComponentId>,
        busy: bool,
    }

    impl Model for Blinker {
        type Event = ();

        fn build(&mut self, ctx: &mut SimContext<()>) -> Result<(), RunError> {
            let id = ctx.add_component("node")?;
            ctx.declare_signal(id, "busy");
            self.id = Some(id);
            Ok(())
        }

        fn initialize(&mut self, ctx: &mut SimContext<()>) -> Result<(), RunError> {
            if let Some(id) = self.id {
                ctx.emit(id, "busy", 0i64);
            }
            ctx.schedule_in(self.off, ())
        }

        fn handle(&mut self, _event: (), ctx: &mut SimContext<()>) -> Result<(), RunError> {
            if self.fail_at.map_or(false, |t| ctx.now() >= t) {
                return Err(RunError::RunFailure("link down".to_string()));
            }
            if self.panic_at.map_or(false, |t| ctx.now() >= t) {
                panic!("blinker exploded");
            }
            self.busy = !self.busy;
            if let Some(id) = self.id {
                ctx.emit(id, "busy", self.busy);
            }
            let delay = if self.busy { self.on } else { self.off };
            ctx.schedule_in(delay, ())
        }
    }

    struct BlinkerEngine;

    impl Engine for BlinkerEngine {
        type Model = Blinker;

        fn create(&self, config: &RunConfig) -> Result<Blinker, RunError> {
            let on = config.params.number("node.on", Dimension::Time)?;
            let off = config.params.number("node.off", Dimension::Time)?;
            let fail_at = match config.params.lookup("node.failAt") {
                Some(_) => Some(config.params.number("node.failAt", Dimension::Time)?),
                None => None,
            };
            let panic_at = match config.params.lookup("node.panicAt") {
                Some(_) => Some(config.params.number("node.panicAt", Dimension::Time)?),
                None => None,
            };
            Ok(Blinker {
                on,
                off,
                fail_at,
                panic_at,
                id: None,
                busy: false,
            })
        }
    }

    fn utilization_executor() -> RunExecutor<BlinkerEngine> {
        RunExecutor::new(BlinkerEngine)
            .with_probe(
                ProbeSpec::from_statistic("utilization", "node", "timeavg(busy)", "last").unwrap(),
            )
            .with_probe(ProbeSpec::new(
                "toggles",
                "node",
                "busy",
                FilterKind::Count,
                RecordingMode::Last,
            ))
    }

    #[test]
    fn test_time_average_of_duty_cycle() {
        let config = RunConfig::from_ini_text("node.on = 1s\nnode.off = 3s\nsim-time-limit = 100s\n", "General")
            .unwrap();
        assert_eq!(config.sim_time_limit, Some(100.0));

        let handle = utilization_executor().run(&config).unwrap();

        // on for 1s out of every 4s, 100s is a whole number of periods
        let utilization = handle.value("utilization").unwrap();
        assert!((utilization - 0.25).abs() < 1e-9, "got {}", utilization);
        assert_eq!(handle.summary().end_time, 100.0);
        // initial 0 plus 50 toggles
        assert_eq!(handle.value("toggles"), Some(51.0));
    }

    #[test]
    fn test_missing_component_or_signal() {
        let config = RunConfig::from_ini_text("node.on = 1s\nnode.off = 1s\n", "General")
            .unwrap()
            .with_time_limit(10.0);

        let executor = RunExecutor::new(BlinkerEngine).with_probe(ProbeSpec::new(
            "u",
            "server",
            "busy",
            FilterKind::TimeAvg,
            RecordingMode::Last,
        ));
        assert!(matches!(
            executor.run(&config),
            Err(RunError::Configuration(_))
        ));

        let executor = RunExecutor::new(BlinkerEngine).with_probe(ProbeSpec::new(
            "u",
            "node",
            "receive",
            FilterKind::TimeAvg,
            RecordingMode::Last,
        ));
        assert!(matches!(
            executor.run(&config),
            Err(RunError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_parameter_is_configuration_error() {
        let config = RunConfig::from_ini_text("node.on = 1s\n", "General").unwrap();
        assert!(matches!(
            utilization_executor().run(&config),
            Err(RunError::Configuration(_))
        ));
    }

    #[test]
    fn test_model_failure_propagates() {
        let config = RunConfig::from_ini_text(
            "node.on = 1s\nnode.off = 1s\nnode.failAt = 5s\nsim-time-limit = 10s\n",
            "General",
        )
        .unwrap();
        match utilization_executor().run(&config) {
            Err(RunError::RunFailure(msg)) => assert!(msg.contains("link down")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_model_panic_becomes_run_failure() {
        let config = RunConfig::from_ini_text(
            "node.on = 1s\nnode.off = 1s\nnode.panicAt = 2s\nsim-time-limit = 10s\n",
            "General",
        )
        .unwrap();
        match utilization_executor().run(&config) {
            Err(RunError::RunFailure(msg)) => assert!(msg.contains("blinker exploded")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_statistic_name() {
        let probe = ProbeSpec::new("u", "node", "busy", FilterKind::None, RecordingMode::Last);
        let executor = RunExecutor::new(BlinkerEngine)
            .with_probe(probe.clone())
            .with_probe(probe);
        let config = RunConfig::from_ini_text("node.on = 1s\nnode.off = 1s\n", "General")
            .unwrap()
            .with_time_limit(3.0);
        assert!(matches!(
            executor.run(&config),
            Err(RunError::Configuration(_))
        ));
    }

    #[test]
    fn test_statistic_source_parsing() {
        let probe = ProbeSpec::from_statistic("channelUtilization", "server", "timeavg(receive)", "last")
            .unwrap();
        assert_eq!(probe.filter, FilterKind::TimeAvg);
        assert_eq!(probe.signal, "receive");
        assert_eq!(probe.record, RecordingMode::Last);

        let probe = ProbeSpec::from_statistic("collisions", "server", "collision", "count").unwrap();
        assert_eq!(probe.filter, FilterKind::None);

        assert!(ProbeSpec::from_statistic("x", "server", "timeavg(receive", "last").is_err());
        assert!(ProbeSpec::from_statistic("x", "server", "median(receive)", "last").is_err());
        assert!(ProbeSpec::from_statistic("x", "server", "receive", "vector").is_err());
    }

    #[test]
    fn test_config_overrides() {
        let config = RunConfig::from_ini_text(
            "network = Blink\nseed-set = 42\nnode.on = 1s\n",
            "General",
        )
        .unwrap()
        .with_param("node.on", ParamValue::parse("2s").unwrap());
        assert_eq!(config.seed, 42);
        assert_eq!(config.network.as_deref(), Some("Blink"));
        assert_eq!(config.params.number("node.on", Dimension::Time).unwrap(), 2.0);
        assert!(config.sim_time_limit.is_none());

        assert!(RunConfig::from_ini_text("seed-set = -1\n", "General").is_err());
    }
}
