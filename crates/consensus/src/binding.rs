//! Consensus binding traits
//!
//! A [`ConsensusNetwork`] hands out one [`ConsensusBinding`] per gossip
//! topic. The binding owns the receive loop and calls back into a
//! [`ConsensusHandler`]: `leader_job` on a fixed cadence while this host
//! holds leadership, `handle_message` for every message on the topic
//! (including the host's own broadcasts, echoed back by the overlay).

use crate::error::ConsensusResult;
use crate::message::Message;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Leadership view of a host on one topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

/// Callbacks driven by a binding's run loop
#[async_trait]
pub trait ConsensusHandler: Send + Sync {
    /// Cadence of [`leader_job`](Self::leader_job) while leader
    fn leader_job_interval(&self) -> Duration;

    async fn leader_job(&self) -> anyhow::Result<()>;

    async fn handle_message(&self, message: Message) -> anyhow::Result<()>;
}

/// Topic-scoped broadcast and leadership primitive
#[async_trait]
pub trait ConsensusBinding: Send + Sync {
    fn host_id(&self) -> &str;

    fn topic(&self) -> &str;

    /// Run until `token` is cancelled.
    ///
    /// Handler errors are logged and never end the loop. Once this returns,
    /// the handler is not invoked again.
    async fn run(&self, token: CancellationToken, handler: Arc<dyn ConsensusHandler>);

    async fn broadcast(&self, message: Message) -> ConsensusResult<()>;

    fn role(&self) -> Role;

    /// Bump the election term after leader activity
    fn advance_term(&self);

    /// Number of other hosts on the topic
    fn peer_count(&self) -> usize;
}

/// Source of per-topic bindings
pub trait ConsensusNetwork: Send + Sync {
    fn join(&self, topic: &str) -> ConsensusResult<Arc<dyn ConsensusBinding>>;
}
