//! Agent-level state derived from state-layer outputs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use agentx_core::output::{AgentOutput, StateEvent};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Idle,
    Thinking,
    Responding,
    ExecutingTool,
    Error,
}

impl AgentState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Thinking => "thinking",
            Self::Responding => "responding",
            Self::ExecutingTool => "executing_tool",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub from: AgentState,
    pub to: AgentState,
}

pub type StateChangeListener = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// The state `current` moves to after observing `output`.
pub fn next_state(current: AgentState, output: &AgentOutput) -> AgentState {
    let AgentOutput::State(event) = output else {
        return current;
    };
    match event {
        StateEvent::ConversationStart { .. } => AgentState::Thinking,
        StateEvent::ConversationResponding { .. } => AgentState::Responding,
        StateEvent::ToolPlanned { .. } | StateEvent::ToolExecuting { .. } => {
            AgentState::ExecutingTool
        }
        StateEvent::ToolCompleted { .. } | StateEvent::ToolFailed { .. } => AgentState::Thinking,
        StateEvent::ConversationEnd { .. } | StateEvent::ConversationInterrupted { .. } => {
            AgentState::Idle
        }
        StateEvent::ErrorOccurred { .. } => AgentState::Error,
    }
}

pub struct AgentStateMachine {
    state: Mutex<AgentState>,
    listeners: RwLock<Vec<(u64, StateChangeListener)>>,
    next_listener_id: AtomicU64,
}

impl AgentStateMachine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AgentState::Idle),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `output`; listeners hear about the change only when the state moved.
    pub fn process(&self, output: &AgentOutput) -> Option<StateChange> {
        let change = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let to = next_state(*state, output);
            if to == *state {
                return None;
            }
            let change = StateChange { from: *state, to };
            *state = to;
            change
        };
        self.notify(&change);
        Some(change)
    }

    /// Force `idle`, notifying listeners if that is a change.
    pub fn reset(&self) -> Option<StateChange> {
        let change = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == AgentState::Idle {
                return None;
            }
            let change = StateChange {
                from: *state,
                to: AgentState::Idle,
            };
            *state = AgentState::Idle;
            change
        };
        self.notify(&change);
        Some(change)
    }

    pub fn on_state_change(&self, listener: impl Fn(&StateChange) + Send + Sync + 'static) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn off(&self, id: u64) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn clear_listeners(&self) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn notify(&self, change: &StateChange) {
        debug!(from = %change.from, to = %change.to, "Agent state changed");
        // Snapshot so listeners may register or remove listeners.
        let listeners: Vec<StateChangeListener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(change);
        }
    }
}

impl Default for AgentStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
