use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("Request {request_type} timed out after {timeout_ms}ms")]
    Timeout { request_type: String, timeout_ms: u64 },

    #[error("Invalid request type {0}: expected a name ending in _request")]
    InvalidRequestType(String),

    #[error("Request {request_type} failed: {message}")]
    Responder {
        request_type: String,
        message: String,
    },

    #[error("Event bus destroyed")]
    Destroyed,
}

pub type Result<T> = std::result::Result<T, BusError>;
