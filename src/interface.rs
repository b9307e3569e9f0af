//! Shared types for the statistics pipeline and the run kernel.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Simulation time in seconds
pub type SimTime = f64;

/// Index of a component inside one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub usize);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Payload attached to an emitted signal
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalValue {
    Long(i64),
    Double(f64),
    Bool(bool),
}

impl SignalValue {
    /// Numeric view of the payload (bools map to 0/1)
    pub fn as_f64(&self) -> f64 {
        match *self {
            SignalValue::Long(v) => v as f64,
            SignalValue::Double(v) => v,
            SignalValue::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

impl From<i64> for SignalValue {
    fn from(v: i64) -> Self {
        SignalValue::Long(v)
    }
}

impl From<f64> for SignalValue {
    fn from(v: f64) -> Self {
        SignalValue::Double(v)
    }
}

impl From<bool> for SignalValue {
    fn from(v: bool) -> Self {
        SignalValue::Bool(v)
    }
}

/// Anything that can sit in a filter/recorder chain.
///
/// Listeners are driven by exactly one run thread. `receive` is called for
/// every value in non-decreasing time order, `finish` exactly once when the
/// run ends.
pub trait ResultListener {
    fn receive(&mut self, time: SimTime, value: SignalValue);

    fn finish(&mut self, end_time: SimTime);
}

/// Shared handle to a listener. The bus and filters hold these; the run
/// context that created them keeps the other clone to read results back.
pub type ListenerRef = Rc<RefCell<dyn ResultListener>>;

/// Identity comparison for listener handles (data pointer only, vtables of the
/// same type may differ across codegen units)
pub fn same_listener(a: &ListenerRef, b: &ListenerRef) -> bool {
    std::ptr::eq(
        Rc::as_ptr(a) as *const u8,
        Rc::as_ptr(b) as *const u8,
    )
}
