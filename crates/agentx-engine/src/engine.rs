//! The per-agent engine: source in, processors in the middle, presenter out.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use agentx_core::message::{Message, UserMessage};
use agentx_core::output::{AgentOutput, StateEvent, TurnEvent};
use agentx_core::stream::{StreamEvent, now_millis};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::chain::{Chain, ChainStep};
use crate::error::{EngineError, Result};
use crate::mealy::MealyMachine;
use crate::processors::{
    MessageAssemblerState, StateEventState, TurnTrackerState, message_assembler, state_events,
    turn_tracker,
};
use crate::state_machine::{AgentState, AgentStateMachine};

/// Where accepted user messages go.
pub trait Source: Send + Sync {
    fn send(&self, message: &UserMessage);
    fn interrupt(&self);
    fn disconnect(&self);
}

/// A source that drops everything. Used when the caller drives the stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSource;

impl Source for NoopSource {
    fn send(&self, _message: &UserMessage) {}
    fn interrupt(&self) {}
    fn disconnect(&self) {}
}

/// Receives every output that survives the interceptor chain.
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn present(&self, agent_id: &str, output: &AgentOutput);
}

pub type OutputHandler = Arc<dyn Fn(&AgentOutput) + Send + Sync>;

struct HandlerEntry {
    id: u64,
    output_type: Option<String>,
    handler: OutputHandler,
}

struct Pipeline {
    assembler: MealyMachine<MessageAssemblerState, StreamEvent, Message>,
    turns: MealyMachine<TurnTrackerState, StreamEvent, TurnEvent>,
    states: MealyMachine<StateEventState, StreamEvent, StateEvent>,
}

impl Pipeline {
    fn new() -> Self {
        Self {
            assembler: MealyMachine::new(message_assembler::definition()),
            turns: MealyMachine::new(turn_tracker::definition()),
            states: MealyMachine::new(state_events::definition()),
        }
    }

    fn clear(&mut self) {
        self.assembler.clear();
        self.turns.clear();
        self.states.clear();
    }
}

pub struct AgentEngine {
    agent_id: String,
    source: Arc<dyn Source>,
    presenter: Arc<dyn Presenter>,
    middleware: Chain<UserMessage>,
    interceptors: Chain<AgentOutput>,
    pipeline: Mutex<Pipeline>,
    state_machine: AgentStateMachine,
    handlers: RwLock<Vec<HandlerEntry>>,
    next_handler_id: AtomicU64,
    destroyed: AtomicBool,
}

impl AgentEngine {
    pub fn new(
        agent_id: impl Into<String>,
        source: Arc<dyn Source>,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            source,
            presenter,
            middleware: Chain::new("middleware"),
            interceptors: Chain::new("interceptor"),
            pipeline: Mutex::new(Pipeline::new()),
            state_machine: AgentStateMachine::new(),
            handlers: RwLock::new(Vec::new()),
            next_handler_id: AtomicU64::new(1),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn state(&self) -> AgentState {
        self.state_machine.state()
    }

    pub fn state_machine(&self) -> &AgentStateMachine {
        &self.state_machine
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn use_middleware(
        &self,
        name: impl Into<String>,
        middleware: impl Fn(UserMessage) -> ChainStep<UserMessage> + Send + Sync + 'static,
    ) {
        self.middleware.push(name, middleware);
    }

    pub fn intercept(
        &self,
        name: impl Into<String>,
        interceptor: impl Fn(AgentOutput) -> ChainStep<AgentOutput> + Send + Sync + 'static,
    ) {
        self.interceptors.push(name, interceptor);
    }

    /// Run the middleware chain only. `None` means a middleware vetoed it.
    pub fn admit(&self, message: UserMessage) -> Result<Option<UserMessage>> {
        if self.is_destroyed() {
            return Err(EngineError::Destroyed(self.agent_id.clone()));
        }
        let admitted = self.middleware.run(message);
        if admitted.is_none() {
            debug!(agent_id = %self.agent_id, "User message stopped by middleware");
        }
        Ok(admitted)
    }

    /// Run middleware, then hand the surviving message to the source.
    pub fn receive(&self, message: UserMessage) -> Result<Option<UserMessage>> {
        let Some(message) = self.admit(message)? else {
            return Ok(None);
        };
        self.source.send(&message);
        Ok(Some(message))
    }

    /// Feed one stream event through the processors and deliver what survives
    /// the interceptors. Returns the delivered outputs in order.
    pub async fn handle_stream_event(&self, event: &StreamEvent) -> Vec<AgentOutput> {
        if self.is_destroyed() {
            debug!(agent_id = %self.agent_id, event_type = event.event_type(), "Ignoring stream event after destroy");
            return Vec::new();
        }

        let produced = {
            let mut pipeline = self.pipeline.lock().unwrap_or_else(|e| e.into_inner());
            self.log_recoveries(&pipeline, event);

            let mut outputs = vec![AgentOutput::Stream(event.clone())];
            outputs.extend(
                pipeline
                    .assembler
                    .process(&self.agent_id, event)
                    .into_iter()
                    .map(AgentOutput::Message),
            );
            outputs.extend(
                pipeline
                    .turns
                    .process(&self.agent_id, event)
                    .into_iter()
                    .map(AgentOutput::Turn),
            );
            outputs.extend(
                pipeline
                    .states
                    .process(&self.agent_id, event)
                    .into_iter()
                    .map(AgentOutput::State),
            );
            outputs
        };

        self.deliver(produced).await
    }

    /// Stop the current response. Does nothing while idle.
    pub async fn interrupt(&self) -> bool {
        if self.is_destroyed() || self.state() == AgentState::Idle {
            return false;
        }
        info!(agent_id = %self.agent_id, state = %self.state(), "Interrupting agent");
        self.source.interrupt();
        let interrupted = AgentOutput::State(StateEvent::ConversationInterrupted {
            timestamp: now_millis(),
        });
        self.deliver(vec![interrupted]).await;
        true
    }

    /// Whether a message has started or content is buffered but not emitted.
    pub fn has_pending_message(&self) -> bool {
        let pipeline = self.pipeline.lock().unwrap_or_else(|e| e.into_inner());
        pipeline
            .assembler
            .state(&self.agent_id)
            .is_some_and(MessageAssemblerState::has_pending_message)
    }

    /// Listen for one output type (`text_delta`, `assistant_message`, ...).
    pub fn on(
        &self,
        output_type: impl Into<String>,
        handler: impl Fn(&AgentOutput) + Send + Sync + 'static,
    ) -> u64 {
        self.add_handler(Some(output_type.into()), Arc::new(handler))
    }

    pub fn on_any(&self, handler: impl Fn(&AgentOutput) + Send + Sync + 'static) -> u64 {
        self.add_handler(None, Arc::new(handler))
    }

    pub fn off(&self, id: u64) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        let before = handlers.len();
        handlers.retain(|entry| entry.id != id);
        handlers.len() != before
    }

    /// Tear the engine down. Safe to call more than once.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.source.disconnect();
        self.pipeline
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.middleware.clear();
        self.interceptors.clear();
        self.state_machine.reset();
        self.state_machine.clear_listeners();
        info!(agent_id = %self.agent_id, "Engine destroyed");
    }

    fn add_handler(&self, output_type: Option<String>, handler: OutputHandler) -> u64 {
        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        if self.is_destroyed() {
            return id;
        }
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(HandlerEntry {
                id,
                output_type,
                handler,
            });
        id
    }

    async fn deliver(&self, outputs: Vec<AgentOutput>) -> Vec<AgentOutput> {
        let mut delivered = Vec::with_capacity(outputs.len());
        for output in outputs {
            self.state_machine.process(&output);
            let Some(output) = self.interceptors.run(output) else {
                continue;
            };
            self.presenter.present(&self.agent_id, &output).await;
            self.notify_handlers(&output);
            delivered.push(output);
        }
        delivered
    }

    fn notify_handlers(&self, output: &AgentOutput) {
        let output_type = output.output_type();
        let matching: Vec<OutputHandler> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|entry| entry.output_type.as_deref().is_none_or(|t| t == output_type))
            .map(|entry| entry.handler.clone())
            .collect();
        for handler in matching {
            handler(output);
        }
    }

    fn log_recoveries(&self, pipeline: &Pipeline, event: &StreamEvent) {
        match event {
            StreamEvent::ToolUseStop { tool_call_id, .. } => {
                let malformed = pipeline.assembler.state(&self.agent_id).and_then(|state| {
                    message_assembler::malformed_tool_input(state, tool_call_id.as_deref())
                });
                if let Some(tool_call_id) = malformed {
                    warn!(agent_id = %self.agent_id, %tool_call_id, "Tool input is not valid JSON, using empty object");
                }
            }
            StreamEvent::ToolResult { tool_call_id, .. } => {
                let known = pipeline
                    .assembler
                    .state(&self.agent_id)
                    .is_some_and(|state| state.pending_tool_calls.contains_key(tool_call_id));
                if !known {
                    warn!(agent_id = %self.agent_id, %tool_call_id, "Tool result for unknown tool call");
                }
            }
            _ => {}
        }
    }
}
