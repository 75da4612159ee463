//! Global aggregation for the oracle node
//!
//! Every pair runs one [`AggregatorNode`] on its consensus topic. Nodes
//! exchange local aggregates round by round, agree on the median and sign
//! it. Finalized rounds are persisted in batches by the
//! [`GlobalAggregateBulkWriter`].
//!
//! # Core Components
//!
//! - [`node`] - Round synchronization and finalization for one pair
//! - [`signer`] - Proof signing and key rotation
//! - [`local_store`] - Latest local aggregate per pair, fed by the bus
//! - [`bulk_writer`] - Batched persistence of finalized rounds
//! - [`app`] - Node lifecycle and command handling
//!
//! # Key Invariants
//!
//! - Finalization needs `peer_count + 1` reports for the round
//! - Sentinel reports count toward quorum but never into the median
//! - A round's reports are discarded once it reaches quorum
//! - Only the admin may change the lifecycle of nodes or the signer

pub mod app;
pub mod bulk_writer;
pub mod error;
pub mod local_store;
pub mod node;
pub mod signer;

pub use app::App;
pub use bulk_writer::GlobalAggregateBulkWriter;
pub use error::{AggregatorError, SignerError};
pub use local_store::SharedLocalAggregates;
pub use node::{integer_median, AggregatorNode, NodeContext, NodeSettings};
pub use signer::{HmacSigner, Signer};

pub type Result<T> = std::result::Result<T, AggregatorError>;
