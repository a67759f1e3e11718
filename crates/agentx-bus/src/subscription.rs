//! Subscription records and the handles returned to subscribers.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::bus::BusInner;
use crate::event::BusEvent;

/// Handler invoked for each matching event. Errors are logged, never propagated.
pub type EventHandler = Arc<dyn Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync>;

/// Extra predicate evaluated after the topic matched.
pub type EventFilter = Arc<dyn Fn(&BusEvent) -> bool + Send + Sync>;

/// Which event types a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    Exact(String),
    Set(Vec<String>),
    Any,
}

impl Topic {
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Self::Exact(t) => t == event_type,
            Self::Set(types) => types.iter().any(|t| t == event_type),
            Self::Any => true,
        }
    }
}

impl From<&str> for Topic {
    fn from(event_type: &str) -> Self {
        Self::Exact(event_type.to_string())
    }
}

impl From<String> for Topic {
    fn from(event_type: String) -> Self {
        Self::Exact(event_type)
    }
}

/// Options for [`EventBus::subscribe`](crate::EventBus::subscribe).
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Higher runs first; ties keep registration order.
    pub priority: i32,
    pub filter: Option<EventFilter>,
    /// Remove the subscription after its first dispatch.
    pub once: bool,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn filter(mut self, filter: impl Fn(&BusEvent) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

pub(crate) struct Subscription {
    pub(crate) id: u64,
    pub(crate) topic: Topic,
    pub(crate) handler: EventHandler,
    pub(crate) filter: Option<EventFilter>,
    pub(crate) priority: i32,
    pub(crate) once: bool,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(id: u64, topic: Topic, handler: EventHandler, options: SubscribeOptions) -> Self {
        Self {
            id,
            topic,
            handler,
            filter: options.filter,
            priority: options.priority,
            once: options.once,
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }

    /// Topic check plus filter. A panicking filter counts as no match.
    pub(crate) fn matches(&self, event: &BusEvent) -> bool {
        if !self.topic.matches(&event.event_type) {
            return false;
        }
        match &self.filter {
            None => true,
            Some(filter) => catch_unwind(AssertUnwindSafe(|| filter(event))).unwrap_or(false),
        }
    }
}

/// Handle that removes a subscription. Calling it more than once is a no-op.
///
/// Dropping the handle does not unsubscribe.
pub struct Unsubscribe {
    id: u64,
    bus: Weak<BusInner>,
    done: AtomicBool,
}

impl Unsubscribe {
    pub(crate) fn new(id: u64, bus: Weak<BusInner>) -> Self {
        Self {
            id,
            bus,
            done: AtomicBool::new(false),
        }
    }

    /// A handle for a subscription that was never registered (destroyed bus).
    pub(crate) fn inert() -> Self {
        Self {
            id: 0,
            bus: Weak::new(),
            done: AtomicBool::new(true),
        }
    }

    pub fn unsubscribe(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("id", &self.id)
            .field("done", &self.done.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_matching() {
        assert!(Topic::from("a").matches("a"));
        assert!(!Topic::from("a").matches("b"));
        assert!(Topic::Set(vec!["a".into(), "b".into()]).matches("b"));
        assert!(!Topic::Set(vec!["a".into()]).matches("c"));
        assert!(Topic::Any.matches("anything"));
    }

    #[test]
    fn test_panicking_filter_does_not_match() {
        let sub = Subscription::new(
            1,
            Topic::Any,
            Arc::new(|_| Ok(())),
            SubscribeOptions::new().filter(|_| panic!("bad filter")),
        );
        assert!(!sub.matches(&BusEvent::new("x", json!({}))));
    }
}
