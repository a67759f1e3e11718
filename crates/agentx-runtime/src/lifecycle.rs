use serde::{Deserialize, Serialize};

/// Runtime lifecycle of one agent. `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLifecycle {
    #[default]
    Running,
    Stopped,
    Destroyed,
}

impl AgentLifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Destroyed => "destroyed",
        }
    }

    pub fn can_transition_to(self, next: AgentLifecycle) -> bool {
        matches!(
            (self, next),
            (Self::Running, Self::Stopped)
                | (Self::Stopped, Self::Running)
                | (Self::Running | Self::Stopped, Self::Destroyed)
        )
    }
}

impl std::fmt::Display for AgentLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
