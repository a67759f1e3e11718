//! The event bus itself.
//!
//! Subscriptions live in a copy-on-write list kept sorted by
//! `(priority desc, registration asc)`. Mutation swaps in a new list; `emit`
//! clones the current `Arc` and dispatches over that snapshot, so handlers may
//! subscribe or unsubscribe while an emit is in progress.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock};
use std::time::Duration;

use agentx_core::config::BusConfig;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{BusError, Result};
use crate::event::{BusEvent, EventSource, response_type_for, with_request_id};
use crate::subscription::{EventHandler, SubscribeOptions, Subscription, Topic, Unsubscribe};
use crate::view::{EventConsumer, EventProducer};

type SubscriptionList = Arc<Vec<Arc<Subscription>>>;

struct PendingRequest {
    request_type: String,
    responder: oneshot::Sender<BusEvent>,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingRequest>>>;

fn lock_pending(pending: &PendingMap) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// Removes a request's pending entry and response subscription when the
/// request future completes or is dropped.
struct PendingGuard {
    pending: PendingMap,
    request_id: String,
    subscription: Unsubscribe,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
        lock_pending(&self.pending).remove(&self.request_id);
    }
}

pub(crate) struct BusInner {
    subscriptions: RwLock<SubscriptionList>,
    next_id: AtomicU64,
    pending: PendingMap,
    destroyed: AtomicBool,
    default_timeout: Duration,
}

impl BusInner {
    fn new(default_timeout: Duration) -> Self {
        Self {
            subscriptions: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            destroyed: AtomicBool::new(false),
            default_timeout,
        }
    }

    fn snapshot(&self) -> SubscriptionList {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn subscribe(
        self: &Arc<Self>,
        topic: Topic,
        handler: EventHandler,
        options: SubscribeOptions,
    ) -> Unsubscribe {
        if self.is_destroyed() {
            warn!(?topic, "Subscribe on destroyed event bus ignored");
            return Unsubscribe::inert();
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscription = Arc::new(Subscription::new(id, topic, handler, options));

        let mut guard = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<Arc<Subscription>> = guard.as_ref().clone();
        // Equal priorities stay in registration order: insert after them.
        let position = list.partition_point(|s| s.priority >= subscription.priority);
        list.insert(position, subscription);
        *guard = Arc::new(list);

        Unsubscribe::new(id, Arc::downgrade(self))
    }

    pub(crate) fn remove(&self, id: u64) {
        let mut guard = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        let Some(index) = guard.iter().position(|s| s.id == id) else {
            return;
        };
        let mut list: Vec<Arc<Subscription>> = guard.as_ref().clone();
        let removed = list.remove(index);
        removed.deactivate();
        *guard = Arc::new(list);
    }

    pub(crate) fn emit(&self, event: &BusEvent) {
        if self.is_destroyed() {
            return;
        }
        let snapshot = self.snapshot();
        let mut delivered = 0usize;
        for subscription in snapshot.iter() {
            if self.is_destroyed() {
                break;
            }
            if !subscription.is_active() || !subscription.matches(event) {
                continue;
            }
            if subscription.once {
                // A concurrent emit may have claimed it first.
                if !subscription.deactivate() {
                    continue;
                }
                self.remove(subscription.id);
            }
            delivered += 1;
            match catch_unwind(AssertUnwindSafe(|| (subscription.handler)(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        event_type = %event.event_type,
                        subscription = subscription.id,
                        error = %e,
                        "Event handler error, continuing"
                    );
                }
                Err(_) => {
                    error!(
                        event_type = %event.event_type,
                        subscription = subscription.id,
                        "Event handler panicked, continuing"
                    );
                }
            }
        }
        debug!(event_type = %event.event_type, delivered, "Dispatched event");
    }

    pub(crate) async fn request(
        self: &Arc<Self>,
        request_type: &str,
        data: Value,
        timeout: Duration,
    ) -> Result<BusEvent> {
        if self.is_destroyed() {
            return Err(BusError::Destroyed);
        }
        let response_type = response_type_for(request_type)
            .ok_or_else(|| BusError::InvalidRequestType(request_type.to_string()))?;
        let request_id = Uuid::new_v4().to_string();

        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(
            request_id.clone(),
            PendingRequest {
                request_type: request_type.to_string(),
                responder: tx,
            },
        );

        let pending = self.pending.clone();
        let expected_id = request_id.clone();
        let handler: EventHandler = Arc::new(move |event: &BusEvent| {
            if event.correlation_id() != Some(expected_id.as_str()) {
                return Ok(());
            }
            if let Some(waiter) = lock_pending(&pending).remove(&expected_id) {
                // The waiter may already be gone after a timeout race; nothing to do then.
                let _ = waiter.responder.send(event.clone());
            }
            Ok(())
        });
        let _cleanup = PendingGuard {
            pending: self.pending.clone(),
            request_id: request_id.clone(),
            subscription: self.subscribe(
                Topic::Exact(response_type),
                handler,
                SubscribeOptions::new(),
            ),
        };

        let event = BusEvent::new(request_type, with_request_id(data, &request_id))
            .with_source(EventSource::Bus);
        self.emit(&event);

        let outcome = tokio::time::timeout(timeout, rx).await;

        match outcome {
            Ok(Ok(response)) => match response.data.get("error").and_then(Value::as_str) {
                Some(message) => Err(BusError::Responder {
                    request_type: request_type.to_string(),
                    message: message.to_string(),
                }),
                None => Ok(response),
            },
            Ok(Err(_)) => Err(BusError::Destroyed),
            Err(_) => {
                warn!(request_type, %request_id, timeout_ms = timeout.as_millis() as u64, "Bus request timed out");
                Err(BusError::Timeout {
                    request_type: request_type.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let old = {
            let mut guard = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *guard, Arc::new(Vec::new()))
        };
        for subscription in old.iter() {
            subscription.deactivate();
        }
        let dropped: Vec<String> = lock_pending(&self.pending)
            .drain()
            .map(|(_, p)| p.request_type)
            .collect();
        debug!(
            subscriptions = old.len(),
            pending = dropped.len(),
            "Event bus destroyed"
        );
    }

    pub(crate) fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

/// In-process publish/subscribe bus.
///
/// Dispatch is synchronous: every matching handler has run by the time
/// [`emit`](Self::emit) returns. Share it as `Arc<EventBus>`; the restricted
/// [`producer`](Self::producer) and [`consumer`](Self::consumer) views are
/// created once per bus.
pub struct EventBus {
    inner: Arc<BusInner>,
    producer: OnceLock<EventProducer>,
    consumer: OnceLock<EventConsumer>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_config(&BusConfig::default())
    }

    pub fn with_config(config: &BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner::new(config.request_timeout())),
            producer: OnceLock::new(),
            consumer: OnceLock::new(),
        }
    }

    pub fn emit(&self, event: BusEvent) {
        self.inner.emit(&event);
    }

    pub fn emit_batch(&self, events: impl IntoIterator<Item = BusEvent>) {
        for event in events {
            self.inner.emit(&event);
        }
    }

    pub fn on(
        &self,
        event_type: impl Into<String>,
        handler: impl Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.subscribe(Topic::Exact(event_type.into()), handler, SubscribeOptions::new())
    }

    pub fn on_many(
        &self,
        event_types: &[&str],
        handler: impl Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Unsubscribe {
        let topic = Topic::Set(event_types.iter().map(|t| t.to_string()).collect());
        self.subscribe(topic, handler, SubscribeOptions::new())
    }

    pub fn on_any(
        &self,
        handler: impl Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.subscribe(Topic::Any, handler, SubscribeOptions::new())
    }

    pub fn once(
        &self,
        event_type: impl Into<String>,
        handler: impl Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.subscribe(
            Topic::Exact(event_type.into()),
            handler,
            SubscribeOptions::new().once(),
        )
    }

    pub fn subscribe(
        &self,
        topic: Topic,
        handler: impl Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
        options: SubscribeOptions,
    ) -> Unsubscribe {
        self.inner.subscribe(topic, Arc::new(handler), options)
    }

    /// Correlated request using the configured default timeout.
    pub async fn request(&self, request_type: &str, data: Value) -> Result<BusEvent> {
        self.inner
            .request(request_type, data, self.inner.default_timeout())
            .await
    }

    pub async fn request_with_timeout(
        &self,
        request_type: &str,
        data: Value,
        timeout: Duration,
    ) -> Result<BusEvent> {
        self.inner.request(request_type, data, timeout).await
    }

    /// Stop dispatch, drop every subscription and fail pending requests.
    pub fn destroy(&self) {
        self.inner.destroy();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.snapshot().len()
    }

    pub fn pending_request_count(&self) -> usize {
        lock_pending(&self.inner.pending).len()
    }

    /// Publish-only view.
    pub fn producer(&self) -> &EventProducer {
        self.producer
            .get_or_init(|| EventProducer::new(self.inner.clone()))
    }

    /// Subscribe-only view.
    pub fn consumer(&self) -> &EventConsumer {
        self.consumer
            .get_or_init(|| EventConsumer::new(self.inner.clone()))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
