//! Capability-restricted views over one [`EventBus`](crate::EventBus).
//!
//! Hand a component the [`EventProducer`] when it should only publish, or the
//! [`EventConsumer`] when it should only observe and issue requests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::bus::BusInner;
use crate::error::Result;
use crate::event::BusEvent;
use crate::subscription::{SubscribeOptions, Topic, Unsubscribe};

/// Publish-only view.
#[derive(Clone)]
pub struct EventProducer {
    inner: Arc<BusInner>,
}

impl EventProducer {
    pub(crate) fn new(inner: Arc<BusInner>) -> Self {
        Self { inner }
    }

    pub fn emit(&self, event: BusEvent) {
        self.inner.emit(&event);
    }

    pub fn emit_batch(&self, events: impl IntoIterator<Item = BusEvent>) {
        for event in events {
            self.inner.emit(&event);
        }
    }
}

/// Subscribe-only view.
#[derive(Clone)]
pub struct EventConsumer {
    inner: Arc<BusInner>,
}

impl EventConsumer {
    pub(crate) fn new(inner: Arc<BusInner>) -> Self {
        Self { inner }
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
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::EventBus;
    use serde_json::json;

    #[test]
    fn test_views_share_one_bus() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_clone = seen.clone();
        bus.consumer().on("ping", move |_e| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.producer().emit(BusEvent::new("ping", json!({})));
        bus.producer()
            .emit_batch(vec![BusEvent::new("ping", json!({})), BusEvent::new("pong", json!({}))]);

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(bus.subscription_count(), 1);
    }

    #[tokio::test]
    async fn test_consumer_can_request() {
        let bus = Arc::new(EventBus::new());
        let producer = bus.producer().clone();
        bus.consumer().on("sum_request", move |req| {
            let a = req.data["a"].as_i64().unwrap_or(0);
            let b = req.data["b"].as_i64().unwrap_or(0);
            if let Some(response) = BusEvent::response_to(req, json!({"sum": a + b})) {
                producer.emit(response);
            }
            Ok(())
        });

        let response = bus
            .consumer()
            .request_with_timeout("sum_request", json!({"a": 2, "b": 3}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.data["sum"], 5);
    }
}
