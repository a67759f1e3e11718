//! Agent registry and the per-agent stream pump.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use agentx_bus::{EventBus, EventCategory, EventContext};
use agentx_core::config::RuntimeConfig;
use agentx_core::message::{Message, UserMessage};
use agentx_core::output::AgentOutput;
use agentx_core::stream::StreamEvent;
use agentx_core::{DriverFactory, SessionRepository};
use agentx_engine::{AgentEngine, NoopSource};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::RuntimeAgent;
use crate::conversation::ConversationRepository;
use crate::error::{Result, RuntimeError};
use crate::lifecycle::AgentLifecycle;
use crate::presenter::{BusPresenter, runtime_event, stream_event};

/// Error code of the synthetic error fed when an interrupted stream leaves a
/// message half assembled.
pub const INTERRUPTED_ERROR_CODE: &str = "interrupted";

/// Error code attached to driver failures published on the bus.
pub const DRIVER_ERROR_CODE: &str = "driver_error";

pub struct AgentRuntime {
    bus: Arc<EventBus>,
    sessions: Arc<dyn SessionRepository>,
    conversations: Arc<dyn ConversationRepository>,
    driver_factory: Arc<dyn DriverFactory>,
    config: RuntimeConfig,
    agents: RwLock<HashMap<String, Arc<RuntimeAgent>>>,
}

impl AgentRuntime {
    pub fn new(
        bus: Arc<EventBus>,
        sessions: Arc<dyn SessionRepository>,
        conversations: Arc<dyn ConversationRepository>,
        driver_factory: Arc<dyn DriverFactory>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            bus,
            sessions,
            conversations,
            driver_factory,
            config,
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Build and register an agent for the conversation stored under `image_id`.
    pub async fn create_agent(&self, image_id: &str) -> Result<String> {
        let record = self
            .conversations
            .load(image_id)
            .await?
            .ok_or_else(|| RuntimeError::ConversationNotFound(image_id.to_string()))?;

        let agent_id = format!("agent_{}", Uuid::new_v4().simple());
        let driver = self
            .driver_factory
            .create(&record.driver_config(&agent_id))
            .await
            .map_err(RuntimeError::Driver)?;
        driver.initialize().await.map_err(RuntimeError::Driver)?;

        let context = EventContext {
            agent_id: Some(agent_id.clone()),
            image_id: Some(record.image_id.clone()),
            container_id: Some(record.container_id.clone()),
            session_id: Some(record.session_id.clone()),
        };
        let presenter = Arc::new(BusPresenter::new(
            self.bus.producer().clone(),
            self.sessions.clone(),
            context.clone(),
            record.session_id.clone(),
            self.config.persist_messages,
        ));
        let engine = AgentEngine::new(agent_id.clone(), Arc::new(NoopSource), presenter);
        let driver_name = driver.name().to_string();
        let agent = Arc::new(RuntimeAgent::new(
            agent_id.clone(),
            record,
            context,
            driver,
            engine,
        ));

        self.agents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(agent_id.clone(), agent.clone());

        info!(%agent_id, %image_id, driver = %driver_name, "Agent created");
        self.emit_lifecycle(&agent, "agent_created", json!({ "driver": driver_name }));
        Ok(agent_id)
    }

    pub fn agent(&self, agent_id: &str) -> Result<Arc<RuntimeAgent>> {
        self.agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent_id)
            .cloned()
            .ok_or_else(|| RuntimeError::AgentNotFound(agent_id.to_string()))
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn lifecycle(&self, agent_id: &str) -> Result<AgentLifecycle> {
        Ok(self.agent(agent_id)?.lifecycle())
    }

    /// Send user text to an agent and pump the driver's answer to completion.
    ///
    /// Returns the messages assembled during this receive. A message vetoed by
    /// middleware returns an empty list without reaching the driver.
    pub async fn receive(&self, agent_id: &str, content: impl Into<String>) -> Result<Vec<Message>> {
        let agent = self.agent(agent_id)?;
        let guard = agent.begin_receive()?;

        let Some(message) = agent.engine().receive(UserMessage::new(content))? else {
            return Ok(Vec::new());
        };
        debug!(%agent_id, message_id = %message.id, "User message accepted");
        self.record_user_message(&agent, &message).await;

        let mut stream = match agent.driver().receive(&message, guard.token().clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(%agent_id, %e, "Driver failed to start");
                self.publish_driver_error(&agent, &e).await;
                return Err(RuntimeError::Driver(e));
            }
        };

        let mut messages = Vec::new();
        let mut failure = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => messages.extend(self.forward(&agent, &event).await),
                Err(e) => {
                    error!(%agent_id, %e, "Driver stream error");
                    messages.extend(self.publish_driver_error(&agent, &e).await);
                    failure = Some(e);
                    break;
                }
            }
        }

        if guard.token().is_cancelled() && agent.engine().has_pending_message() {
            info!(%agent_id, "Stream ended mid-message after interrupt");
            let event = StreamEvent::error_received(
                "Response interrupted",
                Some(INTERRUPTED_ERROR_CODE.to_string()),
            );
            messages.extend(self.forward(&agent, &event).await);
            agent.engine().state_machine().reset();
        }

        drop(guard);
        match failure {
            Some(e) => Err(RuntimeError::Driver(e)),
            None => Ok(messages),
        }
    }

    /// Interrupt the agent's current response. Returns whether anything was
    /// in flight.
    pub async fn interrupt(&self, agent_id: &str) -> Result<bool> {
        let agent = self.agent(agent_id)?;
        let cancelled = agent.cancel_receive();
        if cancelled {
            agent.driver().interrupt();
        }
        let interrupted = agent.engine().interrupt().await;
        if cancelled || interrupted {
            info!(%agent_id, "Agent interrupted");
            self.emit_lifecycle(&agent, "agent_interrupted", json!({}));
        }
        Ok(cancelled || interrupted)
    }

    pub async fn stop_agent(&self, agent_id: &str) -> Result<()> {
        let agent = self.agent(agent_id)?;
        if !agent.transition(AgentLifecycle::Stopped)? {
            return Ok(());
        }
        if agent.cancel_receive() {
            agent.driver().interrupt();
            agent.engine().interrupt().await;
        }
        info!(%agent_id, "Agent stopped");
        self.emit_lifecycle(&agent, "agent_stopped", json!({}));
        Ok(())
    }

    pub fn resume_agent(&self, agent_id: &str) -> Result<()> {
        let agent = self.agent(agent_id)?;
        if agent.transition(AgentLifecycle::Running)? {
            info!(%agent_id, "Agent resumed");
            self.emit_lifecycle(&agent, "agent_resumed", json!({}));
        }
        Ok(())
    }

    /// Dispose the driver, destroy the engine and forget the agent.
    pub async fn destroy_agent(&self, agent_id: &str) -> Result<()> {
        let agent = self
            .agents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(agent_id)
            .ok_or_else(|| RuntimeError::AgentNotFound(agent_id.to_string()))?;

        agent.transition(AgentLifecycle::Destroyed)?;
        if agent.cancel_receive() {
            agent.driver().interrupt();
        }
        agent.engine().destroy();
        if let Err(e) = agent.driver().dispose().await {
            warn!(%agent_id, %e, "Driver dispose failed");
        }
        info!(%agent_id, "Agent destroyed");
        self.emit_lifecycle(&agent, "agent_destroyed", json!({}));
        Ok(())
    }

    /// Destroy every registered agent.
    pub async fn shutdown(&self) {
        for agent_id in self.agent_ids() {
            if let Err(e) = self.destroy_agent(&agent_id).await {
                warn!(%agent_id, %e, "Failed to destroy agent during shutdown");
            }
        }
    }

    /// The agent's conversation history as persisted in its session.
    pub async fn get_messages(&self, agent_id: &str) -> Result<Vec<Message>> {
        let agent = self.agent(agent_id)?;
        Ok(self
            .sessions
            .get_messages(&agent.record().session_id)
            .await?)
    }

    async fn record_user_message(&self, agent: &RuntimeAgent, message: &UserMessage) {
        let message = Message::User(message.clone());
        if self.config.persist_messages {
            if let Err(e) = self
                .sessions
                .add_message(&agent.record().session_id, &message)
                .await
            {
                error!(agent_id = agent.id(), %e, "Failed to persist user message");
            }
        }
        match AgentOutput::Message(message).to_data() {
            Ok(data) => self.bus.emit(runtime_event(
                "user_message",
                EventCategory::Message,
                data,
                agent.context(),
            )),
            Err(e) => warn!(agent_id = agent.id(), %e, "Failed to serialize user message"),
        }
    }

    /// Publish one raw event and run it through the engine.
    async fn forward(&self, agent: &RuntimeAgent, event: &StreamEvent) -> Vec<Message> {
        if self.config.forward_stream_events {
            if let Some(bus_event) = stream_event(event, agent.context()) {
                self.bus.emit(bus_event);
            }
        }
        agent
            .engine()
            .handle_stream_event(event)
            .await
            .into_iter()
            .filter_map(|output| match output {
                AgentOutput::Message(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    async fn publish_driver_error(&self, agent: &RuntimeAgent, e: &anyhow::Error) -> Vec<Message> {
        let event = StreamEvent::error_received(e.to_string(), Some(DRIVER_ERROR_CODE.to_string()));
        self.forward(agent, &event).await
    }

    fn emit_lifecycle(&self, agent: &RuntimeAgent, event_type: &str, mut data: serde_json::Value) {
        if let Some(fields) = data.as_object_mut() {
            fields.insert("agentId".into(), json!(agent.id()));
            fields.insert("lifecycle".into(), json!(agent.lifecycle()));
        }
        self.bus.emit(runtime_event(
            event_type,
            EventCategory::Lifecycle,
            data,
            agent.context(),
        ));
    }
}
