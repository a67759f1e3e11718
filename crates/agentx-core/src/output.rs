//! Engine outputs: the four layers an agent publishes.
//!
//! - **stream**: raw [`StreamEvent`]s, forwarded as-is
//! - **state**: conversation and tool lifecycle transitions
//! - **message**: assembled [`Message`]s
//! - **turn**: request/response analytics

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::stream::{StopReason, StreamEvent, TokenUsage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayer {
    Stream,
    State,
    Message,
    Turn,
}

impl OutputLayer {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::State => "state",
            Self::Message => "message",
            Self::Turn => "turn",
        }
    }
}

/// Conversation and tool lifecycle transitions derived from the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    ConversationStart {
        message_id: String,
        timestamp: i64,
    },
    ConversationResponding {
        timestamp: i64,
    },
    ConversationEnd {
        stop_reason: StopReason,
        timestamp: i64,
    },
    ConversationInterrupted {
        timestamp: i64,
    },
    ToolPlanned {
        tool_call_id: String,
        tool_name: String,
        timestamp: i64,
    },
    ToolExecuting {
        tool_call_id: String,
        tool_name: String,
        timestamp: i64,
    },
    ToolCompleted {
        tool_call_id: String,
        timestamp: i64,
    },
    ToolFailed {
        tool_call_id: String,
        timestamp: i64,
    },
    ErrorOccurred {
        message: String,
        timestamp: i64,
    },
}

impl StateEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConversationStart { .. } => "conversation_start",
            Self::ConversationResponding { .. } => "conversation_responding",
            Self::ConversationEnd { .. } => "conversation_end",
            Self::ConversationInterrupted { .. } => "conversation_interrupted",
            Self::ToolPlanned { .. } => "tool_planned",
            Self::ToolExecuting { .. } => "tool_executing",
            Self::ToolCompleted { .. } => "tool_completed",
            Self::ToolFailed { .. } => "tool_failed",
            Self::ErrorOccurred { .. } => "error_occurred",
        }
    }
}

/// Request/response analytics for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    TurnRequest {
        turn_id: String,
        message_id: String,
        timestamp: i64,
    },
    TurnResponse {
        turn_id: String,
        message_id: String,
        duration_ms: i64,
        usage: TokenUsage,
        stop_reason: StopReason,
        timestamp: i64,
    },
}

impl TurnEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TurnRequest { .. } => "turn_request",
            Self::TurnResponse { .. } => "turn_response",
        }
    }

    pub fn turn_id(&self) -> &str {
        match self {
            Self::TurnRequest { turn_id, .. } | Self::TurnResponse { turn_id, .. } => turn_id,
        }
    }
}

/// Everything the engine hands to its presenter and handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    Stream(StreamEvent),
    State(StateEvent),
    Message(Message),
    Turn(TurnEvent),
}

impl AgentOutput {
    pub fn layer(&self) -> OutputLayer {
        match self {
            Self::Stream(_) => OutputLayer::Stream,
            Self::State(_) => OutputLayer::State,
            Self::Message(_) => OutputLayer::Message,
            Self::Turn(_) => OutputLayer::Turn,
        }
    }

    pub fn output_type(&self) -> &'static str {
        match self {
            Self::Stream(e) => e.event_type(),
            Self::State(e) => e.event_type(),
            Self::Message(m) => m.event_type(),
            Self::Turn(e) => e.event_type(),
        }
    }

    /// JSON payload of the wrapped value, as published on the bus.
    pub fn to_data(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Stream(e) => serde_json::to_value(e),
            Self::State(e) => serde_json::to_value(e),
            Self::Message(m) => serde_json::to_value(m),
            Self::Turn(e) => serde_json::to_value(e),
        }
    }
}

impl From<StreamEvent> for AgentOutput {
    fn from(event: StreamEvent) -> Self {
        Self::Stream(event)
    }
}

impl From<StateEvent> for AgentOutput {
    fn from(event: StateEvent) -> Self {
        Self::State(event)
    }
}

impl From<Message> for AgentOutput {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

impl From<TurnEvent> for AgentOutput {
    fn from(event: TurnEvent) -> Self {
        Self::Turn(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ErrorMessage;

    #[test]
    fn test_output_type_and_layer() {
        let out: AgentOutput = TurnEvent::TurnRequest {
            turn_id: "t1".into(),
            message_id: "m1".into(),
            timestamp: 0,
        }
        .into();
        assert_eq!(out.output_type(), "turn_request");
        assert_eq!(out.layer(), OutputLayer::Turn);

        let out: AgentOutput = Message::Error(ErrorMessage {
            id: "e".into(),
            content: "boom".into(),
            error_code: None,
            timestamp: 0,
        })
        .into();
        assert_eq!(out.output_type(), "error_message");
        assert_eq!(out.layer().as_str(), "message");
    }

    #[test]
    fn test_state_event_data_has_type_tag() {
        let out = AgentOutput::State(StateEvent::ToolPlanned {
            tool_call_id: "c1".into(),
            tool_name: "calc".into(),
            timestamp: 3,
        });
        let data = out.to_data().unwrap();
        assert_eq!(data["type"], "tool_planned");
        assert_eq!(data["tool_name"], "calc");
    }
}
