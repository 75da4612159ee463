//! Command bus error types

use crate::bus::Component;
use thiserror::Error;

/// Errors raised while publishing, decoding or authorizing bus commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Sender is not allowed to issue the command
    #[error("Unauthorized sender {from:?} for command {command}")]
    UnauthorizedSender { command: String, from: Component },

    /// Command name is not part of the protocol
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// A command argument is missing or has the wrong shape
    #[error("Malformed parameter '{param}' for {command}: {reason}")]
    MalformedParam {
        command: String,
        param: String,
        reason: String,
    },

    /// Target channel is at capacity
    #[error("Channel for {0:?} is full")]
    ChannelFull(Component),

    /// Nobody is listening on the target channel
    #[error("No subscriber for {0:?}")]
    NoSubscriber(Component),

    /// Handler dropped the response channel without answering
    #[error("Response channel dropped")]
    ResponseDropped,
}

/// Result type alias using the bus error type
pub type Result<T> = std::result::Result<T, BusError>;

impl BusError {
    /// Create a malformed parameter error
    pub fn malformed(command: &str, param: &str, reason: impl Into<String>) -> Self {
        Self::MalformedParam {
            command: command.to_string(),
            param: param.to_string(),
            reason: reason.into(),
        }
    }
}
