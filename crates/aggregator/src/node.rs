//! Per-pair round synchronization
//!
//! The leader opens a round by broadcasting a RoundSync. Every node answers
//! with a PriceData carrying its local aggregate, or the sentinel when it has
//! nothing new. Each node collects the round's reports and, once it holds a
//! quorum of `peer_count + 1`, finalizes: the median of the real values is
//! signed and published on the pair's submission stream.
//!
//! # Round state
//!
//! - `round_id` is only advanced by the leader job or overwritten by a
//!   RoundSync while following
//! - a round's collection is removed the moment it reaches quorum, whether
//!   or not finalization succeeds
//! - the quorum for a round is fixed when the node handles its RoundSync

use crate::error::AggregatorError;
use crate::local_store::SharedLocalAggregates;
use crate::signer::Signer;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    Config, ConfigId, GlobalAggregate, LocalAggregate, Proof, SubmissionData, SENTINEL_VALUE,
};
use config::{AggregatorConfig, CacheConfig};
use consensus::{
    ConsensusBinding, ConsensusHandler, ConsensusNetwork, Message, MessageType, PriceDataMessage,
    Role, RoundSyncMessage,
};
use observability::AggregatorMetrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storage::keys::{global_aggregate_key, proof_key, submission_stream_key};
use storage::{get_json, publish_json, set_json, AggregateStore, Cache};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Timing knobs shared by every node
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub leader_job_interval: Duration,
    /// Rounds behind the newest announced one whose collections are kept
    pub round_retention: i64,
    pub cache_ttl: Duration,
}

impl NodeSettings {
    pub fn from_config(aggregator: &AggregatorConfig, cache: &CacheConfig) -> Self {
        Self {
            leader_job_interval: Duration::from_millis(aggregator.leader_job_interval_ms),
            round_retention: aggregator.round_retention,
            cache_ttl: Duration::from_secs(cache.ttl_seconds),
        }
    }
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self::from_config(&AggregatorConfig::default(), &CacheConfig::default())
    }
}

/// Handles every node is built with
#[derive(Clone)]
pub struct NodeContext {
    pub store: Arc<dyn AggregateStore>,
    pub cache: Arc<dyn Cache>,
    pub signer: Arc<dyn Signer>,
    pub local_aggregates: SharedLocalAggregates,
    pub settings: NodeSettings,
}

/// Median of the non-negative values, `None` when every value is a sentinel.
///
/// Even counts take the floor of the mean of the two middle values.
pub fn integer_median(values: &[i64]) -> Option<i64> {
    let mut real: Vec<i64> = values.iter().copied().filter(|v| *v >= 0).collect();
    if real.is_empty() {
        return None;
    }
    real.sort_unstable();

    let mid = real.len() / 2;
    if real.len() % 2 == 0 {
        let (lo, hi) = (real[mid - 1], real[mid]);
        Some(lo + (hi - lo) / 2)
    } else {
        Some(real[mid])
    }
}

#[derive(Debug, Default)]
struct RoundCollection {
    quorum: Option<usize>,
    values: Vec<i64>,
}

struct NodeInner {
    config: Config,
    binding: Arc<dyn ConsensusBinding>,
    context: NodeContext,
    round_id: AtomicI64,
    last_emitted: Mutex<Option<DateTime<Utc>>>,
    collected: Mutex<HashMap<i64, RoundCollection>>,
    metrics: AggregatorMetrics,
}

impl NodeInner {
    fn current_quorum(&self) -> usize {
        self.binding.peer_count() + 1
    }

    /// Fix the round's quorum and drop collections that fell out of retention
    fn open_round(&self, round: i64) {
        let quorum = self.current_quorum();
        let horizon = round - self.context.settings.round_retention;
        let mut collected = self.collected.lock();

        let before = collected.len();
        collected.retain(|r, _| *r >= horizon);
        let pruned = before - collected.len();
        if pruned > 0 {
            debug!(pair = %self.config.name, pruned, horizon, "Pruned unfinished rounds");
        }

        collected.entry(round).or_default().quorum.get_or_insert(quorum);
    }

    async fn current_local_aggregate(&self) -> Option<LocalAggregate> {
        if let Some(local) = self.context.local_aggregates.get(self.config.id) {
            return Some(local);
        }
        match self.context.store.latest_local_aggregate(self.config.id).await {
            Ok(local) => local,
            Err(e) => {
                warn!(pair = %self.config.name, "Failed to load latest local aggregate: {}", e);
                None
            }
        }
    }

    /// The local value if it changed since the last report, else the sentinel
    fn report_value(&self, local: Option<LocalAggregate>) -> i64 {
        let mut last = self.last_emitted.lock();
        match local {
            Some(local) if *last != Some(local.timestamp) => {
                *last = Some(local.timestamp);
                local.value
            }
            _ => SENTINEL_VALUE,
        }
    }

    async fn handle_round_sync(&self, message: &Message) -> Result<()> {
        let sync: RoundSyncMessage = message.decode()?;

        if self.binding.role() != Role::Leader {
            let previous = self.round_id.swap(sync.round_id, Ordering::SeqCst);
            if sync.round_id < previous {
                warn!(
                    pair = %self.config.name,
                    previous,
                    round = sync.round_id,
                    leader = %sync.leader_id,
                    "Leader announced an older round"
                );
            }
        }
        self.open_round(sync.round_id);

        let local = self.current_local_aggregate().await;
        let value = self.report_value(local);
        let report = Message::price_data(
            self.binding.host_id(),
            &PriceDataMessage {
                round_id: sync.round_id,
                value,
            },
        )?;
        self.binding.broadcast(report).await?;
        Ok(())
    }

    async fn handle_price_data(&self, message: &Message) -> Result<()> {
        let data: PriceDataMessage = message.decode()?;

        let complete = {
            let mut collected = self.collected.lock();
            let entry = collected.entry(data.round_id).or_default();
            entry.values.push(data.value);
            let quorum = entry.quorum.unwrap_or_else(|| self.current_quorum());
            if entry.values.len() >= quorum {
                collected.remove(&data.round_id).map(|c| c.values)
            } else {
                None
            }
        };

        let Some(values) = complete else {
            return Ok(());
        };

        match self.finalize(data.round_id, &values).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.metrics.finalize_failed();
                Err(e)
            }
        }
    }

    /// Turn a complete round into a signed submission
    async fn finalize(&self, round: i64, values: &[i64]) -> Result<Option<SubmissionData>> {
        // A zero median carries no price and is never signed
        let Some(value) = integer_median(values).filter(|v| *v > 0) else {
            debug!(pair = %self.config.name, round, "Round has no real values");
            self.metrics.round_empty();
            return Ok(None);
        };

        let timestamp = Utc::now();
        let signature = self
            .context
            .signer
            .sign(value, timestamp, &self.config.name)
            .map_err(|e| AggregatorError::ConsensusComputation(e.to_string()))?;

        let submission = SubmissionData {
            global_aggregate: GlobalAggregate {
                config_id: self.config.id,
                value,
                round,
                timestamp,
            },
            proof: Proof {
                config_id: self.config.id,
                round,
                proof: signature,
            },
        };

        let cache = self.context.cache.as_ref();
        let ttl = self.context.settings.cache_ttl;
        set_json(cache, &global_aggregate_key(self.config.id), &submission.global_aggregate, ttl)
            .await?;
        set_json(cache, &proof_key(self.config.id, round), &submission.proof, ttl).await?;
        publish_json(cache, &submission_stream_key(&self.config.name), &submission).await?;

        self.metrics.round_finalized();
        info!(
            pair = %self.config.name,
            round,
            value,
            reports = values.len(),
            "Round finalized"
        );
        Ok(Some(submission))
    }

    /// Highest round persisted for the pair, from the store or else the cache
    async fn persisted_round(&self) -> i64 {
        match self.context.store.latest_global_aggregate(self.config.id).await {
            Ok(Some(latest)) => return latest.round,
            Ok(None) => {}
            Err(e) => warn!(pair = %self.config.name, "Failed to load latest global aggregate: {}", e),
        }

        let key = global_aggregate_key(self.config.id);
        match get_json::<GlobalAggregate>(self.context.cache.as_ref(), &key).await {
            Ok(Some(latest)) => latest.round,
            Ok(None) => 0,
            Err(e) => {
                warn!(pair = %self.config.name, "Failed to read cached global aggregate: {}", e);
                0
            }
        }
    }
}

#[async_trait]
impl ConsensusHandler for NodeInner {
    fn leader_job_interval(&self) -> Duration {
        self.context.settings.leader_job_interval
    }

    async fn leader_job(&self) -> anyhow::Result<()> {
        let round = self.round_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.binding.advance_term();
        self.metrics.set_round(round);

        let sync = Message::round_sync(
            self.binding.host_id(),
            &RoundSyncMessage {
                leader_id: self.binding.host_id().to_string(),
                round_id: round,
            },
        )?;
        self.binding.broadcast(sync).await?;
        Ok(())
    }

    async fn handle_message(&self, message: Message) -> anyhow::Result<()> {
        match message.message_type {
            MessageType::RoundSync => self.handle_round_sync(&message).await?,
            MessageType::PriceData => self.handle_price_data(&message).await?,
        }
        Ok(())
    }
}

/// Lifecycle wrapper around one pair's round state
pub struct AggregatorNode {
    inner: Arc<NodeInner>,
    running: bool,
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl AggregatorNode {
    /// Join the pair's topic on `network`
    pub fn new(config: Config, network: &dyn ConsensusNetwork, context: NodeContext) -> Result<Self> {
        let binding = network.join(&config.topic())?;
        Ok(Self::with_binding(config, binding, context))
    }

    pub fn with_binding(
        config: Config,
        binding: Arc<dyn ConsensusBinding>,
        context: NodeContext,
    ) -> Self {
        let metrics = AggregatorMetrics::new(&config.name);
        Self {
            inner: Arc::new(NodeInner {
                config,
                binding,
                context,
                round_id: AtomicI64::new(0),
                last_emitted: Mutex::new(None),
                collected: Mutex::new(HashMap::new()),
                metrics,
            }),
            running: false,
            token: None,
            handle: None,
        }
    }

    pub fn id(&self) -> ConfigId {
        self.inner.config.id
    }

    pub fn round_id(&self) -> i64 {
        self.inner.round_id.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Rounds currently collecting reports
    pub fn pending_rounds(&self) -> usize {
        self.inner.collected.lock().len()
    }

    /// Resume the round counter and spawn the consensus loop. No-op when running.
    pub async fn start(&mut self, parent: &CancellationToken) -> Result<()> {
        if self.running {
            debug!(pair = %self.inner.config.name, "Aggregator already running");
            return Ok(());
        }

        let persisted = self.inner.persisted_round().await;
        let round = self.inner.round_id.fetch_max(persisted, Ordering::SeqCst).max(persisted);

        let token = parent.child_token();
        let binding = self.inner.binding.clone();
        let handler: Arc<dyn ConsensusHandler> = self.inner.clone();
        let run_token = token.clone();
        self.handle = Some(tokio::spawn(async move { binding.run(run_token, handler).await }));
        self.token = Some(token);
        self.running = true;

        info!(
            pair = %self.inner.config.name,
            topic = %self.inner.binding.topic(),
            round,
            "Aggregator started"
        );
        Ok(())
    }

    /// Cancel the consensus loop and wait for it to exit. No-op when stopped.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.running {
            debug!(pair = %self.inner.config.name, "Aggregator already stopped");
            return Ok(());
        }

        let (Some(token), Some(handle)) = (self.token.take(), self.handle.take()) else {
            return Err(AggregatorError::InvariantViolation(format!(
                "aggregator {} is running without a cancellation handle",
                self.inner.config.name
            )));
        };

        token.cancel();
        if let Err(e) = handle.await {
            error!(pair = %self.inner.config.name, "Consensus loop ended abnormally: {}", e);
        }
        self.running = false;

        info!(pair = %self.inner.config.name, round = self.round_id(), "Aggregator stopped");
        Ok(())
    }
}
