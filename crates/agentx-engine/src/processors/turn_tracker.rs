//! Request/response turn analytics.
//!
//! A turn opens on the first `message_start` and closes on a `message_stop`
//! whose reason finishes the exchange. Tool-use stops keep the turn open so a
//! multi-step tool conversation is measured as one turn.

use agentx_core::output::TurnEvent;
use agentx_core::stream::{StreamEvent, TokenUsage};

use crate::mealy::ProcessorDefinition;

#[derive(Debug, Clone, PartialEq)]
pub struct PendingTurn {
    pub turn_id: String,
    pub message_id: String,
    pub requested_at: i64,
    /// Usage reported by tool-use stops that did not close the turn.
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnTrackerState {
    pub pending_turn: Option<PendingTurn>,
    pub turns_started: u64,
}

pub fn definition() -> ProcessorDefinition<TurnTrackerState, StreamEvent, TurnEvent> {
    ProcessorDefinition {
        name: "turn_tracker",
        description: "Pairs turn requests with turn responses and measures their duration",
        initial_state: TurnTrackerState::default,
        transition: process,
    }
}

pub fn process(state: &TurnTrackerState, event: &StreamEvent) -> (TurnTrackerState, Vec<TurnEvent>) {
    match event {
        StreamEvent::MessageStart {
            message_id,
            timestamp,
            ..
        } => {
            if state.pending_turn.is_some() {
                return (state.clone(), Vec::new());
            }
            let turns_started = state.turns_started + 1;
            let turn_id = format!("turn_{turns_started}_{message_id}");
            let next = TurnTrackerState {
                pending_turn: Some(PendingTurn {
                    turn_id: turn_id.clone(),
                    message_id: message_id.clone(),
                    requested_at: *timestamp,
                    usage: TokenUsage::default(),
                }),
                turns_started,
            };
            let request = TurnEvent::TurnRequest {
                turn_id,
                message_id: message_id.clone(),
                timestamp: *timestamp,
            };
            (next, vec![request])
        }

        StreamEvent::MessageStop {
            stop_reason,
            usage,
            timestamp,
        } => {
            let Some(turn) = &state.pending_turn else {
                return (state.clone(), Vec::new());
            };
            let total = add_usage(turn.usage, usage.unwrap_or_default());

            if !stop_reason.completes_turn() {
                let mut next = state.clone();
                if let Some(pending) = next.pending_turn.as_mut() {
                    pending.usage = total;
                }
                return (next, Vec::new());
            }

            let response = TurnEvent::TurnResponse {
                turn_id: turn.turn_id.clone(),
                message_id: turn.message_id.clone(),
                duration_ms: timestamp.saturating_sub(turn.requested_at).max(0),
                usage: total,
                stop_reason: *stop_reason,
                timestamp: *timestamp,
            };
            let next = TurnTrackerState {
                pending_turn: None,
                turns_started: state.turns_started,
            };
            (next, vec![response])
        }

        _ => (state.clone(), Vec::new()),
    }
}

fn add_usage(a: TokenUsage, b: TokenUsage) -> TokenUsage {
    TokenUsage {
        input_tokens: a.input_tokens.saturating_add(b.input_tokens),
        output_tokens: a.output_tokens.saturating_add(b.output_tokens),
    }
}
