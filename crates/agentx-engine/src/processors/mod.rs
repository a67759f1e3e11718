//! The engine's built-in stream processors, in the order the engine runs them.

pub mod message_assembler;
pub mod state_events;
pub mod turn_tracker;

pub use message_assembler::{MessageAssemblerState, PendingContent, PendingToolCall, PendingToolUse};
pub use state_events::StateEventState;
pub use turn_tracker::{PendingTurn, TurnTrackerState};
