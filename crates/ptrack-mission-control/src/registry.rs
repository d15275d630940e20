//! Per-topic handler lists for classified push events.

use ptrack_core::wire::{PushEvent, Topic};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::warn;

pub type Handler = Box<dyn FnMut(&PushEvent) -> anyhow::Result<()> + Send>;

type SharedHandler = Arc<Mutex<Handler>>;

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    handlers: BTreeMap<Topic, Vec<(u64, SharedHandler)>>,
}

#[derive(Clone, Default)]
pub struct TopicRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Handle returned by [`TopicRegistry::subscribe`]. Dropping it keeps the
/// handler registered; call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    registry: Weak<Mutex<RegistryInner>>,
    topic: Topic,
    id: u64,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn unsubscribe(self) {
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        let mut inner = lock(&inner);
        if let Some(list) = inner.handlers.get_mut(&self.topic) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                inner.handlers.remove(&self.topic);
            }
        }
    }
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: FnMut(&PushEvent) -> anyhow::Result<()> + Send + 'static,
    {
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = inner.next_id;
        let handler: Handler = Box::new(handler);
        inner
            .handlers
            .entry(topic)
            .or_default()
            .push((id, Arc::new(Mutex::new(handler))));
        Subscription {
            registry: Arc::downgrade(&self.inner),
            topic,
            id,
        }
    }

    pub fn handler_count(&self, topic: Topic) -> usize {
        lock(&self.inner)
            .handlers
            .get(&topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        lock(&self.inner).handlers.clear();
    }

    /// Invoke every handler of the event's topic in registration order. The
    /// registry lock is released first so handlers may subscribe or
    /// unsubscribe while running.
    pub fn dispatch(&self, event: &PushEvent) -> DeliveryReport {
        let topic = event.topic();
        let handlers: Vec<SharedHandler> = lock(&self.inner)
            .handlers
            .get(&topic)
            .map(|list| list.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default();

        let mut report = DeliveryReport::default();
        for handler in handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let mut handler = lock(&handler);
                (*handler)(event)
            }));
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    warn!(event = "handler_error", topic = topic.as_str(), error = %err);
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(event = "handler_panic", topic = topic.as_str());
                }
            }
        }
        report
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
