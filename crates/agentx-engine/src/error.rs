use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine for agent {0} has been destroyed")]
    Destroyed(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
