//! AgentX runtime adapter.
//!
//! [`AgentRuntime`] owns the agent registry. For each agent it pairs a
//! [`Driver`](agentx_core::Driver) with an [`AgentEngine`](agentx_engine::AgentEngine)
//! whose presenter publishes onto the [`EventBus`](agentx_bus::EventBus) and
//! persists assembled messages into the agent's session.

pub mod agent;
pub mod commands;
pub mod conversation;
pub mod error;
pub mod lifecycle;
pub mod presenter;
pub mod runtime;

pub use agent::RuntimeAgent;
pub use commands::{AGENT_INTERRUPT_REQUEST, AGENT_LIST_REQUEST, register_command_handlers};
pub use conversation::{ConversationRecord, ConversationRepository, InMemoryConversationRepository};
pub use error::{Result, RuntimeError};
pub use lifecycle::AgentLifecycle;
pub use presenter::BusPresenter;
pub use runtime::{AgentRuntime, DRIVER_ERROR_CODE, INTERRUPTED_ERROR_CODE};
