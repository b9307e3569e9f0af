//! ALOHA engine and optimal inter-arrival sweep

use super::config::{pure_aloha_ini, AlohaConfig, AlohaSweepConfig};
use super::model::AlohaModel;
use super::stats::{EvaluationRow, OptimumRow, SweepResult};
use log::info;
use sigsweep::{
    Engine, FilterKind, Goal, ProbeSpec, RecordingMode, RunConfig, RunError, RunExecutor,
    SearchSpace, SweepError, SweepOptimizer,
};
use std::time::Instant;

/// Name of the utilization statistic on the server
pub const CHANNEL_UTILIZATION: &str = "channelUtilization";

/// Creates ALOHA networks from run configurations
pub struct AlohaEngine;

impl Engine for AlohaEngine {
    type Model = AlohaModel;

    fn create(&self, config: &RunConfig) -> Result<AlohaModel, RunError> {
        Ok(AlohaModel::new(AlohaConfig::from_run_config(config)?))
    }
}

/// `channelUtilization`: time average of the server's `receive` signal,
/// last value recorded
pub fn channel_utilization_probe() -> ProbeSpec {
    ProbeSpec::new(
        CHANNEL_UTILIZATION,
        "server",
        "receive",
        FilterKind::TimeAvg,
        RecordingMode::Last,
    )
}

/// Utilization of one pure-ALOHA run; a run that saw no data counts as 0
pub fn compute_utilization(
    executor: &RunExecutor<AlohaEngine>,
    num_hosts: usize,
    ia_mean: f64,
    sim_time_limit: f64,
    seed: u64,
) -> Result<f64, RunError> {
    let text = pure_aloha_ini(num_hosts, ia_mean, sim_time_limit);
    let config = RunConfig::from_ini_text(&text, "General")?.with_seed(seed);
    let handle = executor.run(&config)?;
    let utilization = handle.value_or(CHANNEL_UTILIZATION, 0.0).ok_or_else(|| {
        RunError::Configuration(format!("statistic {} not recorded", CHANNEL_UTILIZATION))
    })?;
    log::debug!(
        "PureAloha numHosts={}, iaMean={}s --> channelUtilization = {}",
        num_hosts,
        ia_mean,
        utilization
    );
    Ok(utilization)
}

/// Host count, displayed as `numHosts=<n>`
#[derive(Debug, Clone, Copy)]
struct HostCount(usize);

impl std::fmt::Display for HostCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "numHosts={}", self.0)
    }
}

/// Per host count, maximize channel utilization over `iaMean`
pub struct AlohaSweepRunner {
    config: AlohaSweepConfig,
    seed: u64,
    executor: RunExecutor<AlohaEngine>,
}

impl AlohaSweepRunner {
    pub fn new(config: AlohaSweepConfig) -> Self {
        let seed = config.resolve_seed();
        let executor = RunExecutor::new(AlohaEngine).with_probe(channel_utilization_probe());
        Self {
            config,
            seed,
            executor,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Run every search. A failing host count is reported in the result and
    /// does not stop the others.
    pub fn run(&self) -> Result<SweepResult, SweepError> {
        let started = Instant::now();
        let optimizer = SweepOptimizer::new(
            Goal::Maximize,
            SearchSpace {
                initial: self.config.ia_mean_start,
                lower_bound: Some(self.config.ia_mean_lower_bound),
                upper_bound: None,
            },
        )
        .with_workers(self.config.workers);

        let host_counts: Vec<HostCount> =
            self.config.num_hosts.iter().copied().map(HostCount).collect();
        info!(
            "Searching optimal iaMean for {} host counts (seed {})",
            host_counts.len(),
            self.seed
        );

        // same seed for every evaluation keeps each objective deterministic
        let outcomes = optimizer.optimize(&host_counts, |hosts, ia_mean| {
            compute_utilization(
                &self.executor,
                hosts.0,
                ia_mean,
                self.config.sim_time_limit,
                self.seed,
            )
        })?;

        let mut result = SweepResult {
            seed_used: self.seed,
            sim_time_limit: self.config.sim_time_limit,
            evaluations: Vec::new(),
            optima: Vec::new(),
            failures: Vec::new(),
            elapsed: started.elapsed(),
        };

        for outcome in outcomes {
            let num_hosts = outcome.config.0;
            result
                .evaluations
                .extend(outcome.trace.iter().map(|e| EvaluationRow {
                    num_hosts,
                    ia_mean: e.parameter,
                    utilization: e.value,
                }));

            match &outcome.optimum {
                Ok(optimum) => result.optima.push(OptimumRow {
                    num_hosts,
                    ia_mean: optimum.parameter,
                    utilization: optimum.value,
                    converged: optimum.converged,
                    evaluations: optimum.evaluations,
                }),
                Err(e) => result.failures.push(format!("{}: {}", outcome.config, e)),
            }
        }

        Ok(result)
    }
}
