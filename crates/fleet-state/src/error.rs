//! Error types for the coordination state.

use thiserror::Error;

/// Result type alias for coordination state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while talking to the shared store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to connect to shared store: {0}")]
    Connect(String),

    #[error("shared store unavailable: {0}")]
    Unavailable(String),

    #[error("shared store call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("wrong value type at key {0}")]
    WrongType(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("release tag is empty")]
    EmptyTag,
}
