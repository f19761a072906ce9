//! Fan-out: the single-producer, multi-observer delivery surface between
//! the consumer loop and the aggregator (and any other observer).
//!
//! Modeled after the teacher's `EventHandler`/`EventDispatcher` pair in
//! `db::events::dispatcher` — an `async_trait` capability interface plus
//! a registry guarded by a short-held lock that is never held across an
//! observer callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::UserEvent;
use crate::error::AggregatorError;

/// A sink exposing the three fan-out callbacks. Errors returned from
/// `on_next`/`on_error` are caught and logged by the fan-out; they never
/// propagate to the publisher and never stop delivery to other
/// observers. An observer that needs to contain its own panics should do
/// so internally — the fan-out only contains `Err` returns.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn on_next(&self, event: &UserEvent) -> Result<(), AggregatorError>;
    async fn on_error(&self, err: &AggregatorError);
    async fn on_completed(&self);
}

struct Registered {
    id: u64,
    observer: Arc<dyn Observer>,
}

/// A release-able handle binding one observer to the fan-out. Releasing
/// twice, or after the fan-out has completed, is a no-op.
pub struct Subscription {
    id: u64,
    registry: Arc<RwLock<Vec<Registered>>>,
}

impl Subscription {
    pub async fn release(&self) {
        let mut guard = self.registry.write().await;
        guard.retain(|r| r.id != self.id);
    }
}

/// Multicast producer: one `publish` call notifies every observer
/// subscribed at the moment the registry snapshot was taken, in
/// subscription order.
pub struct EventBus {
    registry: Arc<RwLock<Vec<Registered>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe `observer`. Re-subscribing the same `Arc` (by pointer
    /// identity) is a no-op that returns a fresh handle to the existing
    /// registration.
    pub async fn subscribe(&self, observer: Arc<dyn Observer>) -> Subscription {
        let mut guard = self.registry.write().await;
        if let Some(existing) = guard
            .iter()
            .find(|r| Arc::ptr_eq(&r.observer, &observer))
        {
            return Subscription {
                id: existing.id,
                registry: self.registry.clone(),
            };
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        guard.push(Registered { id, observer });
        Subscription {
            id,
            registry: self.registry.clone(),
        }
    }

    /// Deliver `event` to a snapshot of the current observer set, outside
    /// the registry lock. An observer that errors is logged and skipped;
    /// the rest still receive the event.
    pub async fn publish(&self, event: &UserEvent) {
        let snapshot = self.snapshot().await;
        for observer in snapshot {
            if let Err(e) = observer.on_next(event).await {
                warn!(error = %e, "observer callback error swallowed by fan-out");
            }
        }
    }

    /// Deliver `err` to every currently-subscribed observer. Does not
    /// clear the registry.
    pub async fn publish_error(&self, err: &AggregatorError) {
        let snapshot = self.snapshot().await;
        for observer in snapshot {
            observer.on_error(err).await;
        }
    }

    /// Deliver completion to every observer, then clear the registry.
    /// Subsequent `publish`/`publish_error` calls become legal no-ops.
    pub async fn complete(&self) {
        let snapshot = self.snapshot().await;
        for observer in snapshot {
            observer.on_completed().await;
        }
        self.registry.write().await.clear();
    }

    async fn snapshot(&self) -> Vec<Arc<dyn Observer>> {
        self.registry
            .read()
            .await
            .iter()
            .map(|r| r.observer.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use chrono::Utc;
    use std::collections::HashMap;

    struct Recorder {
        events: StdMutex<Vec<String>>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                events: StdMutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Observer for Recorder {
        async fn on_next(&self, event: &UserEvent) -> Result<(), AggregatorError> {
            self.events.lock().unwrap().push(event.event_type.clone());
            Ok(())
        }
        async fn on_error(&self, _err: &AggregatorError) {}
        async fn on_completed(&self) {}
    }

    struct Throws;

    #[async_trait]
    impl Observer for Throws {
        async fn on_next(&self, _event: &UserEvent) -> Result<(), AggregatorError> {
            Err(AggregatorError::ObserverCallbackError("boom".to_string()))
        }
        async fn on_error(&self, _err: &AggregatorError) {}
        async fn on_completed(&self) {}
    }

    fn event(event_type: &str) -> UserEvent {
        UserEvent::new(1, event_type, Utc::now(), HashMap::new()).unwrap()
    }

    #[tokio::test]
    async fn subscribe_release_stops_delivery() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder::new());
        let sub = bus.subscribe(recorder.clone()).await;
        bus.publish(&event("e1")).await;
        sub.release().await;
        bus.publish(&event("e2")).await;
        assert_eq!(recorder.seen(), vec!["e1"]);
    }

    #[tokio::test]
    async fn unsubscribe_then_resubscribe_new_observer() {
        let bus = EventBus::new();
        let a = Arc::new(Recorder::new());
        let b = Arc::new(Recorder::new());

        let sub_a = bus.subscribe(a.clone()).await;
        bus.publish(&event("e1")).await;
        sub_a.release().await;

        bus.subscribe(b.clone()).await;
        bus.publish(&event("e2")).await;

        assert_eq!(a.seen(), vec!["e1"]);
        assert_eq!(b.seen(), vec!["e2"]);
    }

    #[tokio::test]
    async fn one_faulty_observer_does_not_starve_others() {
        let bus = EventBus::new();
        let faulty = Arc::new(Throws);
        let good = Arc::new(Recorder::new());
        bus.subscribe(faulty).await;
        bus.subscribe(good.clone()).await;
        bus.publish(&event("e1")).await;
        assert_eq!(good.seen(), vec!["e1"]);
    }

    #[tokio::test]
    async fn resubscribing_same_observer_is_a_no_op() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder::new());
        bus.subscribe(recorder.clone()).await;
        bus.subscribe(recorder.clone()).await;
        bus.publish(&event("e1")).await;
        // Delivered once, not twice, despite two subscribe calls.
        assert_eq!(recorder.seen(), vec!["e1"]);
    }

    #[tokio::test]
    async fn complete_clears_registry() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder::new());
        bus.subscribe(recorder.clone()).await;
        bus.complete().await;
        bus.publish(&event("e1")).await;
        assert!(recorder.seen().is_empty());
    }
}
