//! Stream processing for AgentX agents.
//!
//! Raw driver events flow through three pure Mealy processors
//! ([`processors::message_assembler`], [`processors::turn_tracker`],
//! [`processors::state_events`]); the [`AgentEngine`] feeds them, keeps the
//! [`AgentStateMachine`] current and hands the results to a [`Presenter`].

pub mod chain;
pub mod engine;
pub mod error;
pub mod mealy;
pub mod processors;
pub mod state_machine;

pub use chain::{Chain, ChainStep, Interceptor, Middleware};
pub use engine::{AgentEngine, NoopSource, OutputHandler, Presenter, Source};
pub use error::{EngineError, Result};
pub use mealy::{MealyMachine, ProcessorDefinition};
pub use state_machine::{AgentState, AgentStateMachine, StateChange, next_state};
