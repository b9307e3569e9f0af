//! Sweep Optimizer
//!
//! For each configuration of a discrete set (e.g. host counts), search the
//! value of one scalar parameter that maximizes or minimizes an objective.
//! Searches are independent: each configuration is one task on a fixed-size
//! worker pool, and results come back in input order.

use std::fmt::Display;

use log::{info, warn};
use rayon::prelude::*;

use crate::nelder_mead::{self, Bound, NelderMeadConfig, SearchResult};
use crate::run_executor::{Engine, RunConfig, RunError, RunExecutor, RunHandle};

/// Errors surfaced by a sweep
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    /// The search hit its iteration or evaluation cap before the tolerance
    /// test passed
    #[error(
        "search for {config} did not converge ({iterations} iterations, {evaluations} evaluations)"
    )]
    OptimizationDidNotConverge {
        config: String,
        iterations: usize,
        evaluations: usize,
    },

    /// An objective evaluation failed, ending this configuration's search
    #[error("run failed for {config}: {source}")]
    Run {
        config: String,
        #[source]
        source: RunError,
    },

    #[error("cannot build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

// ============================================================================
// Worker pool
// ============================================================================

/// Fixed-size pool running one task per item
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// `workers = 0` uses the available parallelism
    pub fn new(workers: usize) -> Result<Self, SweepError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("sweep-worker-{}", i))
            .build()?;
        Ok(Self { pool })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Apply `f` to every item in parallel; output order matches input order
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        self.pool.install(|| items.par_iter().map(|item| f(item)).collect())
    }

    /// Like [`WorkerPool::map`], stopping at the first error
    pub fn try_map<T, R, E, F>(&self, items: &[T], f: F) -> Result<Vec<R>, E>
    where
        T: Sync,
        R: Send,
        E: Send,
        F: Fn(&T) -> Result<R, E> + Sync,
    {
        self.pool.install(|| items.par_iter().map(|item| f(item)).collect())
    }
}

/// Run one configuration per task; a failing run only affects its own slot
pub fn run_batch<E: Engine>(
    pool: &WorkerPool,
    executor: &RunExecutor<E>,
    configs: &[RunConfig],
) -> Vec<Result<RunHandle, RunError>> {
    pool.map(configs, |config| executor.run(config))
}

// ============================================================================
// Optimizer
// ============================================================================

/// Direction of the search
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Goal {
    Maximize,
    Minimize,
}

/// The scalar parameter being tuned
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SearchSpace {
    pub initial: f64,
    pub lower_bound: Option<f64>,
    #[serde(default)]
    pub upper_bound: Option<f64>,
}

/// One objective evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub parameter: f64,
    pub value: f64,
}

/// Best parameter found for one configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Optimum {
    pub parameter: f64,
    /// Objective value at `parameter`, in the caller's sign
    pub value: f64,
    pub converged: bool,
    pub iterations: usize,
    pub evaluations: usize,
}

/// Result of one configuration's search
#[derive(Debug)]
pub struct ConfigOutcome<C> {
    pub config: C,
    /// `Err` when an evaluation failed and ended this search
    pub optimum: Result<Optimum, RunError>,
    /// Every evaluation in call order, kept even when the search failed
    pub trace: Vec<Evaluation>,
}

impl<C: Display> ConfigOutcome<C> {
    /// The optimum, or `OptimizationDidNotConverge` if the search ran out of
    /// budget
    pub fn converged_optimum(&self) -> Result<&Optimum, SweepError> {
        match &self.optimum {
            Ok(optimum) if optimum.converged => Ok(optimum),
            Ok(optimum) => Err(SweepError::OptimizationDidNotConverge {
                config: self.config.to_string(),
                iterations: optimum.iterations,
                evaluations: optimum.evaluations,
            }),
            Err(source) => Err(SweepError::Run {
                config: self.config.to_string(),
                source: source.clone(),
            }),
        }
    }

    fn into_result(self) -> Result<Self, SweepError> {
        match self.optimum {
            Ok(optimum) => Ok(Self {
                config: self.config,
                optimum: Ok(optimum),
                trace: self.trace,
            }),
            Err(source) => Err(SweepError::Run {
                config: self.config.to_string(),
                source,
            }),
        }
    }
}

/// Per-configuration scalar optimizer
#[derive(Debug, Clone)]
pub struct SweepOptimizer {
    /// Pool size, 0 = available parallelism
    pub workers: usize,

    pub goal: Goal,

    pub space: SearchSpace,

    pub search: NelderMeadConfig,

    /// Stop the whole sweep at the first failing configuration
    pub fail_fast: bool,
}

impl SweepOptimizer {
    pub fn new(goal: Goal, space: SearchSpace) -> Self {
        Self {
            workers: 0,
            goal,
            space,
            search: NelderMeadConfig::default(),
            fail_fast: false,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_search(mut self, search: NelderMeadConfig) -> Self {
        self.search = search;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Search every configuration; one outcome per configuration, in input
    /// order. Without `fail_fast` a failing configuration is reported in its
    /// own outcome while the others complete; with it, the first failure is
    /// returned instead.
    pub fn optimize<C, F>(
        &self,
        configs: &[C],
        objective: F,
    ) -> Result<Vec<ConfigOutcome<C>>, SweepError>
    where
        C: Clone + Display + Send + Sync,
        F: Fn(&C, f64) -> Result<f64, RunError> + Sync,
    {
        let pool = WorkerPool::new(self.workers)?;
        info!(
            "optimizing {} configurations on {} workers",
            configs.len(),
            pool.workers()
        );

        if self.fail_fast {
            pool.try_map(configs, |config| {
                self.search_one(config, &objective).into_result()
            })
        } else {
            Ok(pool.map(configs, |config| self.search_one(config, &objective)))
        }
    }

    fn search_one<C, F>(&self, config: &C, objective: &F) -> ConfigOutcome<C>
    where
        C: Clone + Display,
        F: Fn(&C, f64) -> Result<f64, RunError>,
    {
        let sign = match self.goal {
            Goal::Maximize => -1.0,
            Goal::Minimize => 1.0,
        };
        let bound = Bound {
            lower: self.space.lower_bound,
            upper: self.space.upper_bound,
        };

        let mut trace = Vec::new();
        let result: Result<SearchResult, RunError> = nelder_mead::minimize(
            |x: &[f64]| {
                let value = objective(config, x[0])?;
                trace.push(Evaluation {
                    parameter: x[0],
                    value,
                });
                Ok(sign * value)
            },
            &[self.space.initial],
            &[bound],
            &self.search,
        );

        let optimum = match result {
            Ok(found) => {
                let optimum = Optimum {
                    parameter: found.x[0],
                    value: sign * found.value,
                    converged: found.converged,
                    iterations: found.iterations,
                    evaluations: found.evaluations,
                };
                if optimum.converged {
                    info!(
                        "{}: optimum at {} -> {} ({} evaluations)",
                        config, optimum.parameter, optimum.value, optimum.evaluations
                    );
                } else {
                    warn!(
                        "{}: search stopped without converging after {} iterations (best {} -> {})",
                        config, optimum.iterations, optimum.parameter, optimum.value
                    );
                }
                Ok(optimum)
            }
            Err(source) => {
                warn!("{}: search aborted: {}", config, source);
                Err(source)
            }
        };

        ConfigOutcome {
            config: config.clone(),
            optimum,
            trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concave(peak: f64) -> impl Fn(&u32, f64) -> Result<f64, RunError> + Sync {
        // maximum 10 * peak_config at parameter = peak * config
        move |c: &u32, x: f64| {
            let c = *c as f64;
            Ok(10.0 * c - (x - peak * c).powi(2))
        }
    }

    fn optimizer(workers: usize) -> SweepOptimizer {
        SweepOptimizer::new(
            Goal::Maximize,
            SearchSpace {
                initial: 1.0,
                lower_bound: Some(0.5),
                upper_bound: None,
            },
        )
        .with_workers(workers)
    }

    #[test]
    fn test_concave_objective_converges() {
        let outcomes = optimizer(2).optimize(&[1u32, 4], concave(2.5)).unwrap();

        for outcome in &outcomes {
            let optimum = outcome.converged_optimum().unwrap();
            let expected = 2.5 * outcome.config as f64;
            assert!(
                (optimum.parameter - expected).abs() < 1e-3,
                "config {}: {} vs {}",
                outcome.config,
                optimum.parameter,
                expected
            );
            assert!((optimum.value - 10.0 * outcome.config as f64).abs() < 1e-6);
            assert_eq!(outcome.trace.len(), optimum.evaluations);
        }
    }

    #[test]
    fn test_order_independent_of_pool_size() {
        let configs: Vec<u32> = (1..=8).collect();

        let serial = optimizer(1).optimize(&configs, concave(1.5)).unwrap();
        let parallel = optimizer(configs.len())
            .optimize(&configs, concave(1.5))
            .unwrap();

        assert_eq!(serial.len(), configs.len());
        assert_eq!(parallel.len(), configs.len());
        for ((s, p), c) in serial.iter().zip(&parallel).zip(&configs) {
            assert_eq!(s.config, *c);
            assert_eq!(p.config, *c);
            assert_eq!(s.optimum.as_ref().unwrap(), p.optimum.as_ref().unwrap());
        }
    }

    #[test]
    fn test_lower_bound_respected() {
        // unconstrained optimum at 0.1, below the bound
        let outcomes = optimizer(1)
            .optimize(&[1u32], concave(0.1))
            .unwrap();
        let optimum = outcomes[0].converged_optimum().unwrap();
        assert_eq!(optimum.parameter, 0.5);
        assert!(outcomes[0].trace.iter().all(|e| e.parameter >= 0.5));
    }

    #[test]
    fn test_failure_isolated_to_its_configuration() {
        let configs: Vec<u32> = (1..=5).collect();
        let objective = |c: &u32, x: f64| {
            if *c == 3 {
                Err(RunError::RunFailure("engine crashed".to_string()))
            } else {
                Ok(-(x - 2.0).powi(2))
            }
        };

        let outcomes = optimizer(3).optimize(&configs, objective).unwrap();
        assert_eq!(outcomes.len(), 5);
        for outcome in &outcomes {
            if outcome.config == 3 {
                assert!(matches!(outcome.optimum, Err(RunError::RunFailure(_))));
                assert!(matches!(
                    outcome.converged_optimum(),
                    Err(SweepError::Run { .. })
                ));
                assert!(outcome.trace.is_empty());
            } else {
                assert!(outcome.converged_optimum().is_ok());
            }
        }
    }

    #[test]
    fn test_fail_fast_returns_error() {
        let objective = |c: &u32, _x: f64| {
            if *c == 2 {
                Err(RunError::RunFailure("engine crashed".to_string()))
            } else {
                Ok(1.0)
            }
        };
        let result = optimizer(2)
            .with_fail_fast(true)
            .optimize(&[1u32, 2, 3], objective);
        assert!(matches!(result, Err(SweepError::Run { .. })));
    }

    #[test]
    fn test_not_converged_is_flagged() {
        let search = NelderMeadConfig {
            max_iterations: Some(2),
            ..Default::default()
        };
        let outcomes = optimizer(1)
            .with_search(search)
            .optimize(&[7u32], concave(50.0))
            .unwrap();

        let optimum = outcomes[0].optimum.as_ref().unwrap();
        assert!(!optimum.converged);
        assert!(matches!(
            outcomes[0].converged_optimum(),
            Err(SweepError::OptimizationDidNotConverge { .. })
        ));
    }

    #[test]
    fn test_minimize_goal() {
        let outcomes = SweepOptimizer::new(
            Goal::Minimize,
            SearchSpace {
                initial: 5.0,
                lower_bound: None,
                upper_bound: None,
            },
        )
        .with_workers(1)
        .optimize(&[1u32], |_c: &u32, x: f64| Ok((x + 1.0).powi(2) + 3.0))
        .unwrap();

        let optimum = outcomes[0].converged_optimum().unwrap();
        assert!((optimum.parameter + 1.0).abs() < 1e-3);
        assert!((optimum.value - 3.0).abs() < 1e-6);
    }

    /// Emits `level` once at t=0 and once at t=1; fails when `level` < 0
    struct Level {
        level: f64,
        id: Option<crate::interface::ComponentId>,
    }

    impl crate::kernel::Model for Level {
        type Event = ();

        fn build(&mut self, ctx: &mut crate::kernel::SimContext<()>) -> Result<(), RunError> {
            let id = ctx.add_component("source")?;
            ctx.declare_signal(id, "level");
            self.id = Some(id);
            Ok(())
        }

        fn initialize(&mut self, ctx: &mut crate::kernel::SimContext<()>) -> Result<(), RunError> {
            ctx.schedule_in(1.0, ())
        }

        fn handle(&mut self, _event: (), ctx: &mut crate::kernel::SimContext<()>) -> Result<(), RunError> {
            if self.level < 0.0 {
                return Err(RunError::RunFailure("negative level".to_string()));
            }
            if let Some(id) = self.id {
                ctx.emit(id, "level", self.level);
            }
            Ok(())
        }
    }

    struct LevelEngine;

    impl Engine for LevelEngine {
        type Model = Level;

        fn create(&self, config: &RunConfig) -> Result<Level, RunError> {
            let level = config
                .params
                .number("source.level", crate::inifile::Dimension::Dimensionless)?;
            Ok(Level { level, id: None })
        }
    }

    #[test]
    fn test_run_batch_isolates_failing_run() {
        use crate::inifile::{ParamValue, Quantity};
        use crate::result_filter::FilterKind;
        use crate::result_recorder::RecordingMode;
        use crate::run_executor::ProbeSpec;

        let executor = RunExecutor::new(LevelEngine).with_probe(ProbeSpec::new(
            "level",
            "source",
            "level",
            FilterKind::None,
            RecordingMode::Last,
        ));
        let configs: Vec<RunConfig> = [1.0, 2.0, -1.0, 4.0]
            .iter()
            .map(|&level| {
                RunConfig::default()
                    .with_param("source.level", ParamValue::Number(Quantity::plain(level)))
            })
            .collect();

        let pool = WorkerPool::new(2).unwrap();
        let results = run_batch(&pool, &executor, &configs);

        assert_eq!(results.len(), 4);
        assert!(matches!(results[2], Err(RunError::RunFailure(_))));
        for (i, expected) in [(0, 1.0), (1, 2.0), (3, 4.0)] {
            let handle = results[i].as_ref().unwrap();
            assert_eq!(handle.value("level"), Some(expected));
        }
    }
}
