//! Run kernel
//!
//! Minimal event-driven core a model plugs into: a time-ordered event queue,
//! a table of components addressable by path, and the per-run signal bus.
//! One `Simulation` is one run; nothing in it is shared with other runs.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use hashbrown::HashMap;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::interface::{ComponentId, SignalValue, SimTime};
use crate::run_executor::RunError;
use crate::signal_bus::SignalBus;

/// A network model driven by the kernel.
///
/// `build` registers components and their signals; listeners are installed
/// after it returns. `initialize` schedules the first events and may already
/// emit. `handle` processes one event at the current simulation time.
pub trait Model {
    type Event;

    fn build(&mut self, ctx: &mut SimContext<Self::Event>) -> Result<(), RunError>;

    fn initialize(&mut self, ctx: &mut SimContext<Self::Event>) -> Result<(), RunError>;

    fn handle(
        &mut self,
        event: Self::Event,
        ctx: &mut SimContext<Self::Event>,
    ) -> Result<(), RunError>;

    /// Called once at the end of the run, before listeners are finalized
    fn finish(&mut self, _ctx: &mut SimContext<Self::Event>) {}
}

// ============================================================================
// Event queue
// ============================================================================

struct Scheduled<E> {
    time: SimTime,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    // reversed: BinaryHeap is a max-heap, we pop the earliest (time, seq)
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

// ============================================================================
// Components
// ============================================================================

struct ComponentInfo {
    path: String,
    signals: Vec<String>,
}

#[derive(Default)]
struct ComponentTable {
    components: Vec<ComponentInfo>,
    by_path: HashMap<String, ComponentId>,
}

// ============================================================================
// Context
// ============================================================================

/// Everything a model touches while running
pub struct SimContext<E> {
    now: SimTime,
    queue: BinaryHeap<Scheduled<E>>,
    next_seq: u64,
    components: ComponentTable,
    bus: SignalBus,
    rng: StdRng,
}

impl<E> SimContext<E> {
    fn new(seed: u64) -> Self {
        Self {
            now: 0.0,
            queue: BinaryHeap::new(),
            next_seq: 0,
            components: ComponentTable::default(),
            bus: SignalBus::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn bus(&self) -> &SignalBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut SignalBus {
        &mut self.bus
    }

    /// Schedule `event` at absolute time `time` (not in the past)
    pub fn schedule_at(&mut self, time: SimTime, event: E) -> Result<(), RunError> {
        if time.is_nan() || time < self.now {
            return Err(RunError::RunFailure(format!(
                "cannot schedule event at t={} (now {})",
                time, self.now
            )));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Scheduled { time, seq, event });
        Ok(())
    }

    /// Schedule `event` after `delay` seconds
    pub fn schedule_in(&mut self, delay: SimTime, event: E) -> Result<(), RunError> {
        self.schedule_at(self.now + delay, event)
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Register a component under a unique hierarchical path
    pub fn add_component(&mut self, path: &str) -> Result<ComponentId, RunError> {
        if self.components.by_path.contains_key(path) {
            return Err(RunError::Configuration(format!(
                "duplicate component path `{}`",
                path
            )));
        }
        let id = ComponentId(self.components.components.len());
        self.components.components.push(ComponentInfo {
            path: path.to_string(),
            signals: Vec::new(),
        });
        self.components.by_path.insert(path.to_string(), id);
        Ok(id)
    }

    /// Declare a signal `component` may emit
    pub fn declare_signal(&mut self, component: ComponentId, signal: &str) {
        if let Some(info) = self.components.components.get_mut(component.0) {
            if !info.signals.iter().any(|s| s == signal) {
                info.signals.push(signal.to_string());
            }
        }
    }

    pub fn component_by_path(&self, path: &str) -> Option<ComponentId> {
        self.components.by_path.get(path).copied()
    }

    pub fn component_path(&self, component: ComponentId) -> Option<&str> {
        self.components
            .components
            .get(component.0)
            .map(|c| c.path.as_str())
    }

    pub fn has_signal(&self, component: ComponentId, signal: &str) -> bool {
        self.components
            .components
            .get(component.0)
            .map(|c| c.signals.iter().any(|s| s == signal))
            .unwrap_or(false)
    }

    pub fn num_components(&self) -> usize {
        self.components.components.len()
    }

    /// Emit at the current time
    pub fn emit(&mut self, component: ComponentId, signal: &str, value: impl Into<SignalValue>) {
        let now = self.now;
        self.bus.emit(component, signal, value, now);
    }

    /// Emit with an earlier timestamp, for values that only become known
    /// after the fact (e.g. a reception that turned out collision-free)
    pub fn emit_at(
        &mut self,
        component: ComponentId,
        signal: &str,
        value: impl Into<SignalValue>,
        time: SimTime,
    ) {
        debug_assert!(time <= self.now);
        self.bus.emit(component, signal, value, time);
    }
}

// ============================================================================
// Simulation
// ============================================================================

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub end_time: SimTime,
    pub events_processed: u64,
    /// True if the time limit cut the run, false if the queue ran dry
    pub hit_time_limit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Built,
    Ran,
    Finished,
}

/// One isolated run of a model
pub struct Simulation<M: Model> {
    model: M,
    ctx: SimContext<M::Event>,
    phase: Phase,
    summary: Option<RunSummary>,
}

impl<M: Model> Simulation<M> {
    pub fn new(model: M, seed: u64) -> Self {
        Self {
            model,
            ctx: SimContext::new(seed),
            phase: Phase::Created,
            summary: None,
        }
    }

    /// Let the model register its components
    pub fn build(&mut self) -> Result<(), RunError> {
        if self.phase != Phase::Created {
            return Err(RunError::RunFailure("network already built".to_string()));
        }
        self.model.build(&mut self.ctx)?;
        self.phase = Phase::Built;
        debug!(
            "network built: {} components",
            self.ctx.num_components()
        );
        Ok(())
    }

    pub fn context(&self) -> &SimContext<M::Event> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut SimContext<M::Event> {
        &mut self.ctx
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Initialize the model and process events until `time_limit` or until
    /// no events remain
    pub fn run(&mut self, time_limit: Option<SimTime>) -> Result<RunSummary, RunError> {
        if self.phase != Phase::Built {
            return Err(RunError::RunFailure(
                "run requires a built, not yet run network".to_string(),
            ));
        }
        self.phase = Phase::Ran;

        self.model.initialize(&mut self.ctx)?;

        let mut events_processed = 0u64;
        let mut hit_time_limit = false;

        while let Some(next) = self.ctx.queue.pop() {
            if let Some(limit) = time_limit {
                if next.time > limit {
                    self.ctx.now = limit;
                    hit_time_limit = true;
                    break;
                }
            }
            self.ctx.now = next.time;
            self.model.handle(next.event, &mut self.ctx)?;
            events_processed += 1;
        }

        if !hit_time_limit {
            debug!("event queue empty at t={}", self.ctx.now);
        }

        let summary = RunSummary {
            end_time: self.ctx.now,
            events_processed,
            hit_time_limit,
        };
        self.summary = Some(summary);
        Ok(summary)
    }

    /// Finalize the model and every listener at the run's end time
    pub fn finish(&mut self) -> Result<RunSummary, RunError> {
        let summary = match (self.phase, self.summary) {
            (Phase::Ran, Some(summary)) => summary,
            _ => {
                return Err(RunError::RunFailure(
                    "finish called before the run completed".to_string(),
                ))
            }
        };
        self.model.finish(&mut self.ctx);
        self.ctx.bus.finish(summary.end_time);
        self.phase = Phase::Finished;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::result_recorder::{RecordingMode, ResultRecorder};

    /// Ticks every `period` seconds, emitting the tick number
    struct Ticker {
        period: SimTime,
        id: Option<ComponentId>,
        ticks: i64,
        order: Vec<SimTime>,
    }

    impl Model for Ticker {
        type Event = ();

        fn build(&mut self, ctx: &mut SimContext<()>) -> Result<(), RunError> {
            let id = ctx.add_component("ticker")?;
            ctx.declare_signal(id, "tick");
            self.id = Some(id);
            Ok(())
        }

        fn initialize(&mut self, ctx: &mut SimContext<()>) -> Result<(), RunError> {
            ctx.schedule_in(self.period, ())
        }

        fn handle(&mut self, _event: (), ctx: &mut SimContext<()>) -> Result<(), RunError> {
            self.ticks += 1;
            self.order.push(ctx.now());
            if let Some(id) = self.id {
                ctx.emit(id, "tick", self.ticks);
            }
            ctx.schedule_in(self.period, ())
        }
    }

    fn ticker(period: SimTime) -> Ticker {
        Ticker {
            period,
            id: None,
            ticks: 0,
            order: Vec::new(),
        }
    }

    #[test]
    fn test_run_stops_at_time_limit() {
        let mut sim = Simulation::new(ticker(1.0), 0);
        sim.build().unwrap();

        let id = sim.context().component_by_path("ticker").unwrap();
        assert!(sim.context().has_signal(id, "tick"));
        assert!(!sim.context().has_signal(id, "tock"));

        let recorder = Rc::new(RefCell::new(ResultRecorder::new(RecordingMode::Max)));
        sim.context_mut()
            .bus_mut()
            .subscribe(id, "tick", recorder.clone())
            .unwrap();

        let summary = sim.run(Some(10.5)).unwrap();
        assert_eq!(summary.events_processed, 10);
        assert_eq!(summary.end_time, 10.5);
        assert!(summary.hit_time_limit);

        sim.finish().unwrap();
        assert_eq!(recorder.borrow().value(), 10.0);
    }

    #[test]
    fn test_events_in_time_then_fifo_order() {
        struct Burst {
            seen: Vec<u32>,
        }
        impl Model for Burst {
            type Event = u32;
            fn build(&mut self, _ctx: &mut SimContext<u32>) -> Result<(), RunError> {
                Ok(())
            }
            fn initialize(&mut self, ctx: &mut SimContext<u32>) -> Result<(), RunError> {
                ctx.schedule_at(2.0, 3)?;
                ctx.schedule_at(1.0, 1)?;
                ctx.schedule_at(2.0, 4)?;
                ctx.schedule_at(1.0, 2)
            }
            fn handle(&mut self, event: u32, _ctx: &mut SimContext<u32>) -> Result<(), RunError> {
                self.seen.push(event);
                Ok(())
            }
        }

        let mut sim = Simulation::new(Burst { seen: Vec::new() }, 0);
        sim.build().unwrap();
        let summary = sim.run(None).unwrap();
        assert_eq!(sim.model().seen, vec![1, 2, 3, 4]);
        assert_eq!(summary.end_time, 2.0);
        assert!(!summary.hit_time_limit);
    }

    #[test]
    fn test_scheduling_in_the_past_fails() {
        let mut ctx: SimContext<()> = SimContext::new(0);
        ctx.now = 5.0;
        assert!(matches!(
            ctx.schedule_at(4.0, ()),
            Err(RunError::RunFailure(_))
        ));
        assert!(ctx.schedule_at(5.0, ()).is_ok());
        assert_eq!(ctx.pending_events(), 1);
    }

    #[test]
    fn test_duplicate_component_path() {
        let mut ctx: SimContext<()> = SimContext::new(0);
        ctx.add_component("server").unwrap();
        assert!(matches!(
            ctx.add_component("server"),
            Err(RunError::Configuration(_))
        ));
    }

    #[test]
    fn test_phase_order_enforced() {
        let mut sim = Simulation::new(ticker(1.0), 0);
        assert!(sim.run(Some(1.0)).is_err());
        sim.build().unwrap();
        assert!(sim.finish().is_err());
        sim.run(Some(3.0)).unwrap();
        assert_eq!(sim.model().order, vec![1.0, 2.0, 3.0]);
        assert!(sim.run(Some(3.0)).is_err());
        sim.finish().unwrap();
    }
}
