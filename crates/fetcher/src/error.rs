//! Fetcher error types

use common::BusError;
use storage::StorageError;
use thiserror::Error;

/// Errors that can occur while producing local aggregates
#[derive(Error, Debug)]
pub enum FetcherError {
    /// Price computation could not produce a value
    #[error("Computation error: {0}")]
    Computation(String),

    /// Store or cache failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Command bus rejected the message
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}
