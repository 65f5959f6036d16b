use crate::core::EntityId;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnforceError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Timestamp {attempted} is not after the last recorded point {last}")]
    NonMonotonicTimestamp {
        last: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },

    #[error("Sample for entity {actual} was routed to entity {expected}")]
    SampleMismatch { expected: EntityId, actual: EntityId },

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),
}

pub type Result<T> = std::result::Result<T, EnforceError>;

impl From<tokio::task::JoinError> for EnforceError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::ExecutionError(err.to_string())
    }
}
