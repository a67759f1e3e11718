//! Assembles streamed deltas into complete conversation messages.

use std::collections::BTreeMap;

use agentx_core::message::{
    AssistantMessage, ContentPart, ErrorMessage, Message, ToolResultMessage, ToolResultOutput,
    ToolResultPart,
};
use agentx_core::stream::{StopReason, StreamEvent};
use serde_json::Value;

use crate::mealy::ProcessorDefinition;

/// Tool name used when a result arrives for a call that was never announced.
pub const UNKNOWN_TOOL: &str = "unknown";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingText {
    pub deltas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingToolUse {
    pub tool_id: String,
    pub tool_name: String,
    pub tool_input_json: String,
    pub assembled: bool,
    pub parsed_input: Option<Value>,
}

/// One slot of the message being assembled, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingContent {
    Text(PendingText),
    ToolUse(PendingToolUse),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageAssemblerState {
    pub current_message_id: Option<String>,
    pub message_start_time: Option<i64>,
    pub pending_contents: Vec<PendingContent>,
    pub pending_tool_calls: BTreeMap<String, PendingToolCall>,
}

impl MessageAssemblerState {
    /// True while a message has started or content is buffered.
    pub fn has_pending_message(&self) -> bool {
        self.current_message_id.is_some() || !self.pending_contents.is_empty()
    }
}

pub fn definition() -> ProcessorDefinition<MessageAssemblerState, StreamEvent, Message> {
    ProcessorDefinition {
        name: "message_assembler",
        description: "Assembles stream deltas into assistant, tool-result and error messages",
        initial_state: MessageAssemblerState::default,
        transition: process,
    }
}

pub fn process(
    state: &MessageAssemblerState,
    event: &StreamEvent,
) -> (MessageAssemblerState, Vec<Message>) {
    match event {
        StreamEvent::MessageStart {
            message_id,
            timestamp,
            ..
        } => {
            let mut next = state.clone();
            next.current_message_id = Some(message_id.clone());
            next.message_start_time = Some(*timestamp);
            next.pending_contents.clear();
            (next, Vec::new())
        }

        StreamEvent::TextDelta { text, .. } => {
            let mut next = state.clone();
            match next.pending_contents.last_mut() {
                Some(PendingContent::Text(acc)) => acc.deltas.push(text.clone()),
                _ => next.pending_contents.push(PendingContent::Text(PendingText {
                    deltas: vec![text.clone()],
                })),
            }
            (next, Vec::new())
        }

        StreamEvent::ToolUseStart {
            tool_call_id,
            tool_name,
            ..
        } => {
            let mut next = state.clone();
            next.pending_contents.push(PendingContent::ToolUse(PendingToolUse {
                tool_id: tool_call_id.clone(),
                tool_name: tool_name.clone(),
                tool_input_json: String::new(),
                assembled: false,
                parsed_input: None,
            }));
            (next, Vec::new())
        }

        StreamEvent::InputJsonDelta {
            partial_json,
            tool_call_id,
            ..
        } => {
            let mut next = state.clone();
            if let Some(acc) = open_tool_use(&mut next.pending_contents, tool_call_id.as_deref()) {
                acc.tool_input_json.push_str(partial_json);
            }
            (next, Vec::new())
        }

        StreamEvent::ToolUseStop { tool_call_id, .. } => {
            let mut next = state.clone();
            let Some(acc) = open_tool_use(&mut next.pending_contents, tool_call_id.as_deref())
            else {
                return (next, Vec::new());
            };
            acc.parsed_input = Some(parse_tool_input(&acc.tool_input_json));
            acc.assembled = true;
            let call = PendingToolCall {
                id: acc.tool_id.clone(),
                name: acc.tool_name.clone(),
            };
            next.pending_tool_calls.insert(call.id.clone(), call);
            (next, Vec::new())
        }

        StreamEvent::ToolResult {
            tool_call_id,
            result,
            is_error,
            timestamp,
        } => {
            let mut next = state.clone();
            let tool_name = next
                .pending_tool_calls
                .remove(tool_call_id)
                .map(|call| call.name)
                .unwrap_or_else(|| UNKNOWN_TOOL.to_string());
            let text = result_text(result);
            let output = if *is_error {
                ToolResultOutput::ErrorText(text)
            } else {
                ToolResultOutput::Text(text)
            };
            let message = ToolResultMessage {
                id: format!("tool_result_{tool_call_id}"),
                tool_call_id: tool_call_id.clone(),
                tool_result: ToolResultPart {
                    tool_call_id: tool_call_id.clone(),
                    tool_name,
                    output,
                },
                timestamp: *timestamp,
            };
            (next, vec![Message::ToolResult(message)])
        }

        StreamEvent::MessageStop {
            stop_reason,
            usage,
            timestamp,
        } => {
            let mut next = MessageAssemblerState::default();
            if *stop_reason == StopReason::ToolUse {
                next.pending_tool_calls = state.pending_tool_calls.clone();
            }

            let content = build_parts(&state.pending_contents);
            if content.is_empty() {
                return (next, Vec::new());
            }

            let message = AssistantMessage {
                id: state
                    .current_message_id
                    .clone()
                    .unwrap_or_else(|| format!("msg_{timestamp}")),
                content,
                stop_reason: Some(*stop_reason),
                usage: *usage,
                timestamp: state.message_start_time.unwrap_or(*timestamp),
            };
            (next, vec![Message::Assistant(message)])
        }

        StreamEvent::ErrorReceived {
            message,
            error_code,
            timestamp,
        } => {
            let id = match &state.current_message_id {
                Some(message_id) => format!("{message_id}_error_{timestamp}"),
                None => format!("error_{timestamp}"),
            };
            let error = ErrorMessage {
                id,
                content: message.clone(),
                error_code: error_code.clone(),
                timestamp: *timestamp,
            };
            (MessageAssemblerState::default(), vec![Message::Error(error)])
        }
    }
}

/// The id of the tool call `tool_use_stop` would close if its accumulated
/// input does not parse. Lets callers log the silent `{}` recovery.
pub fn malformed_tool_input(
    state: &MessageAssemblerState,
    tool_call_id: Option<&str>,
) -> Option<String> {
    let acc = state.pending_contents.iter().rev().find_map(|content| match content {
        PendingContent::ToolUse(acc) if is_open(acc, tool_call_id) => Some(acc),
        _ => None,
    })?;
    let raw = acc.tool_input_json.trim();
    let valid = raw.is_empty() || serde_json::from_str::<Value>(raw).is_ok();
    (!valid).then(|| acc.tool_id.clone())
}

fn is_open(acc: &PendingToolUse, tool_call_id: Option<&str>) -> bool {
    !acc.assembled && tool_call_id.is_none_or(|id| id == acc.tool_id)
}

/// Keyed lookup when the driver names the call, else the most recent open one.
fn open_tool_use<'a>(
    contents: &'a mut [PendingContent],
    tool_call_id: Option<&str>,
) -> Option<&'a mut PendingToolUse> {
    contents.iter_mut().rev().find_map(|content| match content {
        PendingContent::ToolUse(acc) if is_open(acc, tool_call_id) => Some(acc),
        _ => None,
    })
}

fn parse_tool_input(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Default::default()))
}

fn result_text(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn build_parts(contents: &[PendingContent]) -> Vec<ContentPart> {
    contents
        .iter()
        .filter_map(|content| match content {
            PendingContent::Text(acc) => {
                let text = acc.deltas.concat();
                (!text.trim().is_empty()).then(|| ContentPart::text(text))
            }
            PendingContent::ToolUse(acc) if acc.assembled => Some(ContentPart::ToolCall {
                id: acc.tool_id.clone(),
                name: acc.tool_name.clone(),
                input: acc
                    .parsed_input
                    .clone()
                    .unwrap_or_else(|| Value::Object(Default::default())),
            }),
            PendingContent::ToolUse(_) => None,
        })
        .collect()
}
