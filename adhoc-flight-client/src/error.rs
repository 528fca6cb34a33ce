use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlightClientError>;

#[derive(Error, Debug, Serialize, Deserialize, PartialEq, Clone)]
pub enum FlightClientError {
    #[error("Error authenticating: {0}")]
    Auth(String),

    #[error("{0}")]
    Query(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Schema mismatch: expected {0}, got {1}")]
    SchemaMismatch(String, String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl FlightClientError {
    pub(crate) fn auth(error: impl ToString) -> Self {
        FlightClientError::Auth(error.to_string())
    }

    pub(crate) fn transport(error: impl ToString) -> Self {
        FlightClientError::Transport(error.to_string())
    }

    pub(crate) fn io(error: impl ToString) -> Self {
        FlightClientError::Io(error.to_string())
    }

    /// Keeps the server-provided message verbatim
    pub(crate) fn query(status: tonic::Status) -> Self {
        FlightClientError::Query(status.message().to_string())
    }
}

impl From<std::io::Error> for FlightClientError {
    fn from(error: std::io::Error) -> Self {
        FlightClientError::io(error)
    }
}
