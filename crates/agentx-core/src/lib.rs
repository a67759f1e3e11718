//! Core types, config, errors, and collaborator traits for AgentX.
//!
//! Everything the stream-processing engine and the runtime share lives here:
//! the layered event model ([`StreamEvent`] → [`AgentOutput`]), the conversation
//! [`Message`] union, and the [`Driver`] / [`SessionRepository`] seams.

pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
pub mod message;
pub mod output;
pub mod session;
pub mod session_store;
pub mod stream;

pub use driver::{Driver, DriverConfig, DriverFactory, StreamEventStream};
pub use error::{Error, Result};
pub use message::{
    AssistantMessage, ContentPart, ErrorMessage, Message, ToolResultMessage, ToolResultOutput,
    ToolResultPart, UserMessage,
};
pub use output::{AgentOutput, OutputLayer, StateEvent, TurnEvent};
pub use session::{InMemorySessionRepository, SessionRepository};
pub use stream::{StopReason, StreamEvent, TokenUsage, now_millis};
