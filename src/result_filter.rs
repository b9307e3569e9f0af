//! Result Filters
//!
//! Stateful transforms sitting between a signal and its recorders. A filter
//! consumes one value at a time and forwards zero or one derived values to its
//! own delegates.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use crate::interface::{same_listener, ListenerRef, ResultListener, SignalValue, SimTime};
use crate::signal_bus::SignalError;

/// Ordered delegate list shared by all filters
#[derive(Default)]
pub struct Delegates {
    list: Vec<ListenerRef>,
}

impl Delegates {
    pub fn add(&mut self, delegate: ListenerRef) -> Result<(), SignalError> {
        if self.list.iter().any(|d| same_listener(d, &delegate)) {
            return Err(SignalError::DuplicateDelegate);
        }
        self.list.push(delegate);
        Ok(())
    }

    pub fn forward(&self, time: SimTime, value: SignalValue) {
        for delegate in &self.list {
            delegate.borrow_mut().receive(time, value);
        }
    }

    pub fn finish(&self, end_time: SimTime) {
        for delegate in &self.list {
            delegate.borrow_mut().finish(end_time);
        }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

// ============================================================================
// Time Average
// ============================================================================

/// Time-weighted running average of a numeric signal, treating the input as
/// a step function that holds each value until the next sample.
///
/// The first sample only opens the window. Every later sample forwards
/// `area / (t - start)`. `finish` closes the window at the run's end time and
/// forwards one last value, so a run ending on its last event still has a
/// defined average. Without any sample nothing is forwarded.
#[derive(Default)]
pub struct TimeAverageFilter {
    accumulated_area: f64,
    start_time: Option<SimTime>,
    last_time: SimTime,
    last_value: f64,
    finished: bool,
    delegates: Delegates,
}

impl TimeAverageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_delegate(&mut self, delegate: ListenerRef) -> Result<(), SignalError> {
        self.delegates.add(delegate)
    }

    /// Current average at `t`, if a sample was seen
    fn advance(&mut self, t: SimTime) -> Option<f64> {
        let start = self.start_time?;
        self.accumulated_area += self.last_value * (t - self.last_time);
        self.last_time = t;

        let window = t - start;
        if window == 0.0 {
            Some(0.0)
        } else {
            Some(self.accumulated_area / window)
        }
    }
}

impl ResultListener for TimeAverageFilter {
    fn receive(&mut self, time: SimTime, value: SignalValue) {
        let v = value.as_f64();

        if self.start_time.is_none() {
            self.start_time = Some(time);
            self.last_time = time;
            self.last_value = v;
            return;
        }

        if let Some(avg) = self.advance(time) {
            self.last_value = v;
            self.delegates.forward(time, SignalValue::Double(avg));
        }
    }

    fn finish(&mut self, end_time: SimTime) {
        if self.finished {
            return;
        }
        self.finished = true;

        if let Some(avg) = self.advance(end_time) {
            self.delegates.forward(end_time, SignalValue::Double(avg));
        }
        self.delegates.finish(end_time);
    }
}

// ============================================================================
// Sum / Count
// ============================================================================

/// Running sum of the input values
#[derive(Default)]
pub struct SumFilter {
    sum: f64,
    delegates: Delegates,
}

impl SumFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_delegate(&mut self, delegate: ListenerRef) -> Result<(), SignalError> {
        self.delegates.add(delegate)
    }
}

impl ResultListener for SumFilter {
    fn receive(&mut self, time: SimTime, value: SignalValue) {
        self.sum += value.as_f64();
        self.delegates.forward(time, SignalValue::Double(self.sum));
    }

    fn finish(&mut self, end_time: SimTime) {
        self.delegates.finish(end_time);
    }
}

/// Running count of the input values
#[derive(Default)]
pub struct CountFilter {
    count: i64,
    delegates: Delegates,
}

impl CountFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_delegate(&mut self, delegate: ListenerRef) -> Result<(), SignalError> {
        self.delegates.add(delegate)
    }
}

impl ResultListener for CountFilter {
    fn receive(&mut self, time: SimTime, _value: SignalValue) {
        self.count += 1;
        self.delegates.forward(time, SignalValue::Long(self.count));
    }

    fn finish(&mut self, end_time: SimTime) {
        self.delegates.finish(end_time);
    }
}

// ============================================================================
// Filter selection
// ============================================================================

/// Filter applied to a signal before recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// Signal goes straight to the recorder
    None,
    TimeAvg,
    Sum,
    Count,
}

impl FilterKind {
    /// Build the filter with `delegate` attached and return the head of the
    /// chain to subscribe on the bus
    pub fn build_with(self, delegate: ListenerRef) -> Result<ListenerRef, SignalError> {
        let head: ListenerRef = match self {
            FilterKind::None => delegate,
            FilterKind::TimeAvg => {
                let mut filter = TimeAverageFilter::new();
                filter.add_delegate(delegate)?;
                Rc::new(RefCell::new(filter))
            }
            FilterKind::Sum => {
                let mut filter = SumFilter::new();
                filter.add_delegate(delegate)?;
                Rc::new(RefCell::new(filter))
            }
            FilterKind::Count => {
                let mut filter = CountFilter::new();
                filter.add_delegate(delegate)?;
                Rc::new(RefCell::new(filter))
            }
        };
        Ok(head)
    }
}

impl FromStr for FilterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeavg" => Ok(FilterKind::TimeAvg),
            "sum" => Ok(FilterKind::Sum),
            "count" => Ok(FilterKind::Count),
            other => Err(format!("unknown result filter `{}`", other)),
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterKind::None => "none",
            FilterKind::TimeAvg => "timeavg",
            FilterKind::Sum => "sum",
            FilterKind::Count => "count",
        };
        f.write_str(name)
    }
}
