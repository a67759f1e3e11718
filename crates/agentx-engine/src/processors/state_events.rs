//! Maps raw stream events to conversation and tool lifecycle events.

use agentx_core::output::StateEvent;
use agentx_core::stream::{StopReason, StreamEvent};

use crate::mealy::ProcessorDefinition;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateEventState {
    /// A `conversation_responding` was already emitted for the current text run.
    pub responding: bool,
    /// Tool calls that started but have not stopped yet, oldest first.
    pub open_tools: Vec<(String, String)>,
}

pub fn definition() -> ProcessorDefinition<StateEventState, StreamEvent, StateEvent> {
    ProcessorDefinition {
        name: "state_events",
        description: "Derives conversation and tool lifecycle events from the stream",
        initial_state: StateEventState::default,
        transition: process,
    }
}

pub fn process(state: &StateEventState, event: &StreamEvent) -> (StateEventState, Vec<StateEvent>) {
    match event {
        StreamEvent::MessageStart {
            message_id,
            timestamp,
            ..
        } => {
            let next = StateEventState {
                responding: false,
                open_tools: Vec::new(),
            };
            let start = StateEvent::ConversationStart {
                message_id: message_id.clone(),
                timestamp: *timestamp,
            };
            (next, vec![start])
        }

        StreamEvent::TextDelta { timestamp, .. } => {
            if state.responding {
                return (state.clone(), Vec::new());
            }
            let mut next = state.clone();
            next.responding = true;
            (
                next,
                vec![StateEvent::ConversationResponding {
                    timestamp: *timestamp,
                }],
            )
        }

        StreamEvent::ToolUseStart {
            tool_call_id,
            tool_name,
            timestamp,
        } => {
            let mut next = state.clone();
            // Text after a tool call starts a new responding run.
            next.responding = false;
            next.open_tools.push((tool_call_id.clone(), tool_name.clone()));
            let planned = StateEvent::ToolPlanned {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.clone(),
                timestamp: *timestamp,
            };
            (next, vec![planned])
        }

        StreamEvent::ToolUseStop {
            tool_call_id,
            timestamp,
        } => {
            let position = match tool_call_id {
                Some(id) => state.open_tools.iter().position(|(open, _)| open == id),
                None => state.open_tools.len().checked_sub(1),
            };
            let Some(position) = position else {
                return (state.clone(), Vec::new());
            };
            let mut next = state.clone();
            let (tool_call_id, tool_name) = next.open_tools.remove(position);
            let executing = StateEvent::ToolExecuting {
                tool_call_id,
                tool_name,
                timestamp: *timestamp,
            };
            (next, vec![executing])
        }

        StreamEvent::ToolResult {
            tool_call_id,
            is_error,
            timestamp,
            ..
        } => {
            let tool_call_id = tool_call_id.clone();
            let event = if *is_error {
                StateEvent::ToolFailed {
                    tool_call_id,
                    timestamp: *timestamp,
                }
            } else {
                StateEvent::ToolCompleted {
                    tool_call_id,
                    timestamp: *timestamp,
                }
            };
            (state.clone(), vec![event])
        }

        StreamEvent::MessageStop {
            stop_reason,
            timestamp,
            ..
        } => {
            if *stop_reason == StopReason::ToolUse {
                let mut next = state.clone();
                next.responding = false;
                return (next, Vec::new());
            }
            let end = StateEvent::ConversationEnd {
                stop_reason: *stop_reason,
                timestamp: *timestamp,
            };
            (StateEventState::default(), vec![end])
        }

        StreamEvent::ErrorReceived {
            message, timestamp, ..
        } => {
            let error = StateEvent::ErrorOccurred {
                message: message.clone(),
                timestamp: *timestamp,
            };
            (StateEventState::default(), vec![error])
        }

        StreamEvent::InputJsonDelta { .. } => (state.clone(), Vec::new()),
    }
}
