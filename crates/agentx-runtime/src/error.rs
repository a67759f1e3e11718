use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Agent {agent_id} is not running (currently {lifecycle})")]
    NotRunning { agent_id: String, lifecycle: String },

    #[error("Agent {0} is already processing a message")]
    AlreadyProcessing(String),

    #[error("Agent {0} has been destroyed")]
    Destroyed(String),

    #[error("Driver error: {0}")]
    Driver(#[source] anyhow::Error),

    #[error(transparent)]
    Core(#[from] agentx_core::Error),

    #[error(transparent)]
    Engine(#[from] agentx_engine::EngineError),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
