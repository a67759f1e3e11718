//! Raw token-level events produced by a [`Driver`](crate::Driver).

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Why the provider ended a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    #[serde(other)]
    Other,
}

impl StopReason {
    /// Whether this stop reason closes the request/response turn.
    pub fn completes_turn(self) -> bool {
        matches!(self, Self::EndTurn | Self::MaxTokens | Self::StopSequence)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::MaxTokens => "max_tokens",
            Self::StopSequence => "stop_sequence",
            Self::ToolUse => "tool_use",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Lowest-level event emitted by a driver while it answers one user message.
///
/// `timestamp` is milliseconds since the Unix epoch on every variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        timestamp: i64,
    },
    TextDelta {
        text: String,
        timestamp: i64,
    },
    ToolUseStart {
        tool_call_id: String,
        tool_name: String,
        timestamp: i64,
    },
    /// A fragment of a tool call's JSON input. When `tool_call_id` is absent
    /// the fragment belongs to the most recently opened tool call, so drivers
    /// that interleave several open calls must set it.
    InputJsonDelta {
        partial_json: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        timestamp: i64,
    },
    ToolUseStop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        timestamp: i64,
    },
    ToolResult {
        tool_call_id: String,
        result: serde_json::Value,
        #[serde(default)]
        is_error: bool,
        timestamp: i64,
    },
    MessageStop {
        stop_reason: StopReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
        timestamp: i64,
    },
    ErrorReceived {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
        timestamp: i64,
    },
}

impl StreamEvent {
    /// Wire name of the event (`message_start`, `text_delta`, ...).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::TextDelta { .. } => "text_delta",
            Self::ToolUseStart { .. } => "tool_use_start",
            Self::InputJsonDelta { .. } => "input_json_delta",
            Self::ToolUseStop { .. } => "tool_use_stop",
            Self::ToolResult { .. } => "tool_result",
            Self::MessageStop { .. } => "message_stop",
            Self::ErrorReceived { .. } => "error_received",
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::MessageStart { timestamp, .. }
            | Self::TextDelta { timestamp, .. }
            | Self::ToolUseStart { timestamp, .. }
            | Self::InputJsonDelta { timestamp, .. }
            | Self::ToolUseStop { timestamp, .. }
            | Self::ToolResult { timestamp, .. }
            | Self::MessageStop { timestamp, .. }
            | Self::ErrorReceived { timestamp, .. } => *timestamp,
        }
    }

    pub fn message_start(message_id: impl Into<String>) -> Self {
        Self::MessageStart {
            message_id: message_id.into(),
            model: None,
            timestamp: now_millis(),
        }
    }

    pub fn text_delta(text: impl Into<String>) -> Self {
        Self::TextDelta {
            text: text.into(),
            timestamp: now_millis(),
        }
    }

    pub fn tool_use_start(tool_call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self::ToolUseStart {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            timestamp: now_millis(),
        }
    }

    pub fn input_json_delta(partial_json: impl Into<String>) -> Self {
        Self::InputJsonDelta {
            partial_json: partial_json.into(),
            tool_call_id: None,
            timestamp: now_millis(),
        }
    }

    pub fn tool_use_stop() -> Self {
        Self::ToolUseStop {
            tool_call_id: None,
            timestamp: now_millis(),
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        result: serde_json::Value,
        is_error: bool,
    ) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            result,
            is_error,
            timestamp: now_millis(),
        }
    }

    pub fn message_stop(stop_reason: StopReason) -> Self {
        Self::MessageStop {
            stop_reason,
            usage: None,
            timestamp: now_millis(),
        }
    }

    pub fn error_received(message: impl Into<String>, error_code: Option<String>) -> Self {
        Self::ErrorReceived {
            message: message.into(),
            error_code,
            timestamp: now_millis(),
        }
    }
}
