//! Consensus error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// Envelope or payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Broadcast could not be delivered
    #[error("Broadcast failed: {0}")]
    Broadcast(String),

    /// The binding has left its topic
    #[error("Not joined to topic: {0}")]
    NotJoined(String),
}

impl From<serde_json::Error> for ConsensusError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type ConsensusResult<T> = Result<T, ConsensusError>;
