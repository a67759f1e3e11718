//! Publishes engine outputs on the bus and persists finished messages.

use std::sync::Arc;

use agentx_bus::{BusEvent, EventCategory, EventContext, EventIntent, EventProducer, EventSource};
use agentx_core::message::Message;
use agentx_core::output::{AgentOutput, OutputLayer};
use agentx_core::stream::StreamEvent;
use agentx_core::SessionRepository;
use agentx_engine::Presenter;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, warn};

pub struct BusPresenter {
    producer: EventProducer,
    sessions: Arc<dyn SessionRepository>,
    context: EventContext,
    session_id: String,
    persist: bool,
}

impl BusPresenter {
    pub fn new(
        producer: EventProducer,
        sessions: Arc<dyn SessionRepository>,
        context: EventContext,
        session_id: impl Into<String>,
        persist: bool,
    ) -> Self {
        Self {
            producer,
            sessions,
            context,
            session_id: session_id.into(),
            persist,
        }
    }

    async fn persist(&self, agent_id: &str, message: &Message) {
        if !self.persist || matches!(message, Message::User(_)) {
            return;
        }
        if let Err(e) = self.sessions.add_message(&self.session_id, message).await {
            error!(%agent_id, session_id = %self.session_id, message_id = message.id(), %e, "Failed to persist message");
        }
    }
}

#[async_trait]
impl Presenter for BusPresenter {
    async fn present(&self, agent_id: &str, output: &AgentOutput) {
        // The runtime forwards raw stream events itself.
        if output.layer() == OutputLayer::Stream {
            return;
        }
        if let AgentOutput::Message(message) = output {
            self.persist(agent_id, message).await;
        }
        if let Some(event) = output_event(output, &self.context) {
            self.producer.emit(event);
        }
    }
}

pub(crate) fn category_for(layer: OutputLayer) -> EventCategory {
    match layer {
        OutputLayer::Stream => EventCategory::Stream,
        OutputLayer::State => EventCategory::State,
        OutputLayer::Message => EventCategory::Message,
        OutputLayer::Turn => EventCategory::Turn,
    }
}

/// Bus form of an engine output, or `None` if it cannot be serialized.
pub fn output_event(output: &AgentOutput, context: &EventContext) -> Option<BusEvent> {
    let data = match output.to_data() {
        Ok(data) => data,
        Err(e) => {
            warn!(output_type = output.output_type(), %e, "Failed to serialize output");
            return None;
        }
    };
    let source = match output.layer() {
        OutputLayer::Stream => EventSource::Driver,
        _ => EventSource::Agent,
    };
    Some(
        BusEvent::new(output.output_type(), data)
            .with_source(source)
            .with_category(category_for(output.layer()))
            .with_intent(EventIntent::Notification)
            .with_context(context.clone()),
    )
}

/// Bus form of a raw driver event, stamped with the driver's timestamp.
pub fn stream_event(event: &StreamEvent, context: &EventContext) -> Option<BusEvent> {
    let timestamp = event.timestamp();
    output_event(&AgentOutput::Stream(event.clone()), context).map(|e| e.with_timestamp(timestamp))
}

/// A runtime-originated notification (`agent_created`, `user_message`, ...).
pub fn runtime_event(
    event_type: &str,
    category: EventCategory,
    data: Value,
    context: &EventContext,
) -> BusEvent {
    BusEvent::new(event_type, data)
        .with_source(EventSource::Runtime)
        .with_category(category)
        .with_intent(EventIntent::Notification)
        .with_context(context.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentx_bus::EventBus;
    use agentx_core::message::{AssistantMessage, ContentPart};
    use agentx_core::output::StateEvent;
    use agentx_core::InMemorySessionRepository;
    use std::sync::Mutex;

    fn context() -> EventContext {
        EventContext {
            agent_id: Some("agent-1".into()),
            image_id: Some("img".into()),
            container_id: Some("ctr".into()),
            session_id: Some("sess".into()),
        }
    }

    fn assistant() -> AgentOutput {
        AgentOutput::Message(Message::Assistant(AssistantMessage {
            id: "m1".into(),
            content: vec![ContentPart::text("hi")],
            stop_reason: None,
            usage: None,
            timestamp: 1,
        }))
    }

    #[tokio::test]
    async fn test_presents_and_persists() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        bus.on_any(move |e| {
            seen_clone.lock().unwrap().push(e.clone());
            Ok(())
        });

        let sessions = Arc::new(InMemorySessionRepository::new());
        let presenter =
            BusPresenter::new(bus.producer().clone(), sessions.clone(), context(), "sess", true);

        presenter
            .present("agent-1", &AgentOutput::Stream(StreamEvent::text_delta("x")))
            .await;
        presenter
            .present(
                "agent-1",
                &AgentOutput::State(StateEvent::ConversationResponding { timestamp: 1 }),
            )
            .await;
        presenter.present("agent-1", &assistant()).await;

        let seen = seen.lock().unwrap();
        let types: Vec<_> = seen.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["conversation_responding", "assistant_message"]);
        assert_eq!(seen[1].category, EventCategory::Message);
        assert_eq!(seen[1].source, EventSource::Agent);
        assert_eq!(seen[1].agent_id(), Some("agent-1"));
        assert_eq!(seen[1].data["content"][0]["text"], "hi");

        let stored = sessions.get_messages("sess").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id(), "m1");
    }

    #[tokio::test]
    async fn test_persistence_can_be_disabled() {
        let bus = EventBus::new();
        let sessions = Arc::new(InMemorySessionRepository::new());
        let presenter =
            BusPresenter::new(bus.producer().clone(), sessions.clone(), context(), "sess", false);
        presenter.present("agent-1", &assistant()).await;
        assert!(sessions.get_messages("sess").await.unwrap().is_empty());
    }

    #[test]
    fn test_stream_event_keeps_driver_timestamp() {
        let event = StreamEvent::TextDelta {
            text: "x".into(),
            timestamp: 42,
        };
        let bus_event = stream_event(&event, &context()).unwrap();
        assert_eq!(bus_event.event_type, "text_delta");
        assert_eq!(bus_event.timestamp, 42);
        assert_eq!(bus_event.category, EventCategory::Stream);
        assert_eq!(bus_event.source, EventSource::Driver);
    }
}
