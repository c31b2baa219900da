//! In-process configuration change bus.
//!
//! Publishing is synchronous: every subscriber registered for the event's
//! kind has been invoked by the time [`ConfigurationBus::publish`] returns.
//! No ordering is promised between events of different kinds, and a
//! subscriber may see the same value more than once.

use std::sync::{Arc, Mutex as StdMutex, Weak};

use serde::{Deserialize, Serialize};

use crate::tracking::AccuracyTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    IntervalChanged,
    DispatchIntervalChanged,
    AccuracyChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::IntervalChanged,
        EventKind::DispatchIntervalChanged,
        EventKind::AccuracyChanged,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigEvent {
    IntervalChanged { seconds: u64 },
    DispatchIntervalChanged { seconds: u64 },
    AccuracyChanged { tier: AccuracyTier },
}

impl ConfigEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConfigEvent::IntervalChanged { .. } => EventKind::IntervalChanged,
            ConfigEvent::DispatchIntervalChanged { .. } => EventKind::DispatchIntervalChanged,
            ConfigEvent::AccuracyChanged { .. } => EventKind::AccuracyChanged,
        }
    }
}

type Handler = Arc<dyn Fn(&ConfigEvent) + Send + Sync>;

struct Entry {
    id: u64,
    kinds: Vec<EventKind>,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Entry>,
}

#[derive(Clone, Default)]
pub struct ConfigurationBus {
    registry: Arc<StdMutex<Registry>>,
}

impl ConfigurationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for the given kinds. The handler stays registered
    /// until the returned [`Subscription`] is dropped or cancelled.
    pub fn subscribe<F>(&self, kinds: &[EventKind], handler: F) -> Subscription
    where
        F: Fn(&ConfigEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push(Entry {
            id,
            kinds: kinds.to_vec(),
            handler: Arc::new(handler),
        });
        log::debug!("bus subscriber {} registered for {:?}", id, kinds);

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Delivers `event` to every current subscriber of its kind and returns
    /// how many were invoked.
    pub fn publish(&self, event: ConfigEvent) -> usize {
        let kind = event.kind();
        // Handlers run outside the lock so they may publish or subscribe.
        let handlers: Vec<Handler> = {
            let registry = self.registry.lock().unwrap();
            registry
                .entries
                .iter()
                .filter(|e| e.kinds.contains(&kind))
                .map(|e| e.handler.clone())
                .collect()
        };

        for handler in &handlers {
            handler(&event);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.registry
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|e| e.kinds.contains(&kind))
            .count()
    }
}

/// Handle for a bus registration. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    registry: Weak<StdMutex<Registry>>,
}

impl Subscription {
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut locked = registry.lock().unwrap();
            locked.entries.retain(|e| e.id != self.id);
            log::debug!("bus subscriber {} removed", self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn publish_reaches_only_matching_kinds() {
        let bus = ConfigurationBus::new();
        let intervals = Arc::new(AtomicUsize::new(0));
        let accuracy = Arc::new(AtomicUsize::new(0));

        let seen = intervals.clone();
        let _a = bus.subscribe(&[EventKind::IntervalChanged], move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let seen = accuracy.clone();
        let _b = bus.subscribe(&[EventKind::AccuracyChanged], move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.publish(ConfigEvent::IntervalChanged { seconds: 10 }), 1);
        assert_eq!(intervals.load(Ordering::SeqCst), 1);
        assert_eq!(accuracy.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let bus = ConfigurationBus::new();
        let sub = bus.subscribe(&EventKind::ALL, |_| {});
        assert_eq!(bus.subscriber_count(EventKind::AccuracyChanged), 1);

        drop(sub);
        assert_eq!(bus.subscriber_count(EventKind::AccuracyChanged), 0);
        assert_eq!(
            bus.publish(ConfigEvent::AccuracyChanged {
                tier: AccuracyTier::Low
            }),
            0
        );
    }

    #[test]
    fn handler_may_publish_reentrantly() {
        let bus = ConfigurationBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let inner_bus = bus.clone();
        let _forward = bus.subscribe(&[EventKind::IntervalChanged], move |event| {
            if let ConfigEvent::IntervalChanged { seconds } = event {
                inner_bus.publish(ConfigEvent::DispatchIntervalChanged { seconds: *seconds });
            }
        });
        let seen = count.clone();
        let _sink = bus.subscribe(&[EventKind::DispatchIntervalChanged], move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(ConfigEvent::IntervalChanged { seconds: 5 });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
