//! Consensus binding for the round-synchronization protocol
//!
//! The aggregation core only sees the narrow [`ConsensusBinding`] trait:
//! a topic-scoped broadcast primitive plus the leadership view of the
//! underlying election. [`LocalNetwork`] implements it in process, for
//! tests and for single-node deployments.
//!
//! # Modules
//!
//! - [`binding`] - Binding, handler and network traits
//! - [`message`] - Gossip wire envelope and payloads
//! - [`local`] - In-process loopback network

pub mod binding;
pub mod error;
pub mod local;
pub mod message;

pub use binding::{ConsensusBinding, ConsensusHandler, ConsensusNetwork, Role};
pub use error::{ConsensusError, ConsensusResult};
pub use local::{LocalBinding, LocalHost, LocalNetwork};
pub use message::{Message, MessageType, PriceDataMessage, RoundSyncMessage};
