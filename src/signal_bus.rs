//! Signal Bus
//!
//! Routes signals emitted by components to the listeners subscribed on the
//! (component, signal name) pair. Delivery is synchronous and happens on the
//! thread that drives the run, in subscription order.

use hashbrown::HashMap;

use crate::interface::{same_listener, ComponentId, ListenerRef, SignalValue, SimTime};

/// Errors raised while wiring listeners
#[derive(Debug, Clone, thiserror::Error)]
pub enum SignalError {
    /// The listener is already subscribed on this (component, signal) pair
    #[error("listener already subscribed to signal `{signal}` on component {component}")]
    DuplicateSubscription {
        component: ComponentId,
        signal: String,
    },

    /// The listener is already a delegate of this filter
    #[error("listener already added as delegate of this filter")]
    DuplicateDelegate,
}

/// Delegates registered on one (component, signal) pair
struct Subscription {
    delegates: Vec<ListenerRef>,
    last_time: SimTime,
}

/// Per-run signal router. Owns every listener subscribed on it for the
/// lifetime of the run.
#[derive(Default)]
pub struct SignalBus {
    subscriptions: HashMap<ComponentId, HashMap<String, Subscription>>,

    /// Subscription order, used when finalizing
    order: Vec<(ComponentId, String)>,

    emitted: u64,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `delegate` for `signal` emitted by `component`
    pub fn subscribe(
        &mut self,
        component: ComponentId,
        signal: &str,
        delegate: ListenerRef,
    ) -> Result<(), SignalError> {
        let order = &mut self.order;
        let subscription = self
            .subscriptions
            .entry(component)
            .or_default()
            .entry(signal.to_string())
            .or_insert_with(|| {
                order.push((component, signal.to_string()));
                Subscription {
                    delegates: Vec::new(),
                    last_time: SimTime::NEG_INFINITY,
                }
            });

        if subscription
            .delegates
            .iter()
            .any(|d| same_listener(d, &delegate))
        {
            return Err(SignalError::DuplicateSubscription {
                component,
                signal: signal.to_string(),
            });
        }

        subscription.delegates.push(delegate);
        Ok(())
    }

    /// True if anything listens on (component, signal)
    pub fn has_subscribers(&self, component: ComponentId, signal: &str) -> bool {
        self.subscriptions
            .get(&component)
            .and_then(|m| m.get(signal))
            .map(|s| !s.delegates.is_empty())
            .unwrap_or(false)
    }

    /// Deliver `value` stamped with `time` to every delegate of the pair.
    /// No subscribers means no-op.
    pub fn emit(
        &mut self,
        component: ComponentId,
        signal: &str,
        value: impl Into<SignalValue>,
        time: SimTime,
    ) {
        let Some(subscription) = self
            .subscriptions
            .get_mut(&component)
            .and_then(|m| m.get_mut(signal))
        else {
            return;
        };

        debug_assert!(
            time >= subscription.last_time,
            "signal `{}` emitted out of order: {} < {}",
            signal,
            time,
            subscription.last_time
        );
        subscription.last_time = time;

        let value = value.into();
        for delegate in &subscription.delegates {
            delegate.borrow_mut().receive(time, value);
        }
        self.emitted += 1;
    }

    /// Finalize every directly subscribed delegate once, at `end_time`
    pub fn finish(&mut self, end_time: SimTime) {
        let mut finished: Vec<ListenerRef> = Vec::new();

        for (component, signal) in &self.order {
            let Some(subscription) = self
                .subscriptions
                .get(component)
                .and_then(|m| m.get(signal))
            else {
                continue;
            };

            for delegate in &subscription.delegates {
                if finished.iter().any(|f| same_listener(f, delegate)) {
                    continue;
                }
                delegate.borrow_mut().finish(end_time);
                finished.push(delegate.clone());
            }
        }
    }

    /// Number of emissions that reached at least one delegate
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Number of (component, signal) pairs with subscriptions
    pub fn num_subscriptions(&self) -> usize {
        self.order.len()
    }
}
