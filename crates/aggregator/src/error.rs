//! Aggregator error types

use common::{BusError, ConfigId};
use consensus::ConsensusError;
use storage::StorageError;
use thiserror::Error;

/// Errors raised by the signer capability
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// Key material could not be decoded or is unusable
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    /// Signature could not be produced
    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Errors that can occur in nodes, the bulk writer and command handling
#[derive(Error, Debug)]
pub enum AggregatorError {
    /// No node for the config id
    #[error("Aggregator not found: {0}")]
    NotFound(ConfigId),

    /// Command bus failure
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// Topic join or broadcast failure
    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    /// Median or signing failure while finalizing a round
    #[error("Consensus computation failed: {0}")]
    ConsensusComputation(String),

    /// Store or cache write failure
    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),

    /// Lifecycle state that should be unreachable
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Signer rotation failure
    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for AggregatorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
