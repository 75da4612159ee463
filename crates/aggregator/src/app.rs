//! Aggregator application
//!
//! Owns every [`AggregatorNode`], keyed by config id, and the
//! [`GlobalAggregateBulkWriter`]. Control arrives as [`Command`]s on the
//! aggregator's bus channel; each message is handled on its own task.

use crate::bulk_writer::GlobalAggregateBulkWriter;
use crate::error::AggregatorError;
use crate::local_store::SharedLocalAggregates;
use crate::node::{AggregatorNode, NodeContext};
use crate::Result;
use common::{BusError, BusMessage, Command, CommandResponse, Component, ConfigId, MessageBus};
use config::AggregatorConfig;
use consensus::ConsensusNetwork;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct App {
    bus: MessageBus,
    network: Arc<dyn ConsensusNetwork>,
    context: NodeContext,
    config: AggregatorConfig,
    root: CancellationToken,
    nodes: Mutex<HashMap<ConfigId, AggregatorNode>>,
    bulk_writer: Mutex<Option<GlobalAggregateBulkWriter>>,
}

impl App {
    pub fn new(
        bus: MessageBus,
        network: Arc<dyn ConsensusNetwork>,
        context: NodeContext,
        config: AggregatorConfig,
        root: CancellationToken,
    ) -> Self {
        Self {
            bus,
            network,
            context,
            config,
            root,
            nodes: Mutex::new(HashMap::new()),
            bulk_writer: Mutex::new(None),
        }
    }

    pub fn local_aggregates(&self) -> &SharedLocalAggregates {
        &self.context.local_aggregates
    }

    /// Build the nodes, start listening on the bus and start everything
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        self.load().await?;
        self.subscribe()?;
        self.start_all().await
    }

    /// Stop everything and drop all nodes
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_all().await?;
        self.nodes.lock().await.clear();
        *self.bulk_writer.lock().await = None;
        Ok(())
    }

    pub async fn node_ids(&self) -> Vec<ConfigId> {
        let mut ids: Vec<ConfigId> = self.nodes.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn running_node_ids(&self) -> Vec<ConfigId> {
        let nodes = self.nodes.lock().await;
        let mut ids: Vec<ConfigId> = nodes
            .values()
            .filter(|n| n.is_running())
            .map(|n| n.id())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub async fn is_bulk_writer_running(&self) -> bool {
        self.bulk_writer
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| w.is_running())
    }

    /// Replace every node and the bulk writer with ones built from the
    /// configs currently in storage
    async fn load(&self) -> Result<()> {
        let configs = self.context.store.load_configs().await?;

        let mut nodes = self.nodes.lock().await;
        for node in nodes.values_mut() {
            node.stop().await?;
        }
        nodes.clear();

        let mut pairs = Vec::with_capacity(configs.len());
        for config in configs {
            pairs.push(config.name.clone());
            let node = AggregatorNode::new(config, self.network.as_ref(), self.context.clone())?;
            nodes.insert(node.id(), node);
        }

        let mut writer = self.bulk_writer.lock().await;
        if let Some(old) = writer.as_mut() {
            old.stop();
        }
        *writer = Some(GlobalAggregateBulkWriter::new(
            self.context.store.clone(),
            self.context.cache.clone(),
            pairs,
            Duration::from_millis(self.config.bulk_insert_interval_ms),
            self.config.buffer_size,
        ));

        info!("Loaded {} aggregators", nodes.len());
        Ok(())
    }

    /// Dispatch every message on the aggregator channel until cancelled
    fn subscribe(self: &Arc<Self>) -> Result<()> {
        let mut rx = self
            .bus
            .subscribe(Component::Aggregator)
            .ok_or(AggregatorError::Bus(BusError::NoSubscriber(Component::Aggregator)))?;
        let app = Arc::clone(self);
        let token = self.root.clone();

        tokio::spawn(async move {
            debug!("Aggregator bus subscription started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(msg) => {
                            let app = Arc::clone(&app);
                            tokio::spawn(async move { app.handle_message(msg).await });
                        }
                        None => break,
                    },
                }
            }
            debug!("Aggregator bus subscription stopped");
        });
        Ok(())
    }

    /// Authorize and execute one bus message, answering on its response channel
    pub async fn handle_message(&self, mut msg: BusMessage) {
        if msg.to != Component::Aggregator {
            debug!(to = ?msg.to, "Message not addressed to aggregator");
            return;
        }

        if let Err(e) = msg.command.authorize(msg.from) {
            warn!(command = msg.command.name(), from = ?msg.from, "Rejected command: {}", e);
            msg.respond(CommandResponse::error(e.to_string()));
            return;
        }

        debug!(command = msg.command.name(), from = ?msg.from, "Handling command");
        let result = match &msg.command {
            Command::StreamLocalAggregate { value } => {
                self.context.local_aggregates.upsert(value.clone());
                return;
            }
            Command::ActivateAggregator { id } => self.start_node(*id).await,
            Command::DeactivateAggregator { id } => self.stop_node(*id).await,
            Command::StartAggregatorApp => self.start_all().await,
            Command::StopAggregatorApp => self.stop_all().await,
            Command::RefreshAggregatorApp => self.refresh().await,
            Command::RenewSigner => self.renew_signer(),
        };

        let response = match result {
            Ok(()) => CommandResponse::ok(),
            Err(e) => {
                warn!(command = msg.command.name(), "Command failed: {}", e);
                CommandResponse::error(e.to_string())
            }
        };
        msg.respond(response);
    }

    pub async fn start_node(&self, id: ConfigId) -> Result<()> {
        let mut nodes = self.nodes.lock().await;
        let node = nodes.get_mut(&id).ok_or(AggregatorError::NotFound(id))?;
        node.start(&self.root).await
    }

    pub async fn stop_node(&self, id: ConfigId) -> Result<()> {
        let mut nodes = self.nodes.lock().await;
        let node = nodes.get_mut(&id).ok_or(AggregatorError::NotFound(id))?;
        node.stop().await
    }

    fn start_delay(&self) -> Duration {
        let jitter = match self.config.start_jitter_ms {
            0 => 0,
            max => rand::thread_rng().gen_range(0..=max),
        };
        Duration::from_millis(self.config.start_stagger_ms + jitter)
    }

    /// Start the bulk writer and every node, staggering the nodes so their
    /// leader cadences do not line up
    pub async fn start_all(&self) -> Result<()> {
        if let Some(writer) = self.bulk_writer.lock().await.as_mut() {
            writer.start(&self.root).await?;
        }

        // Never hold the nodes lock across a stagger sleep
        let ids = self.node_ids().await;
        let total = ids.len();

        for (i, id) in ids.into_iter().enumerate() {
            let started = {
                let mut nodes = self.nodes.lock().await;
                match nodes.get_mut(&id) {
                    Some(node) if !node.is_running() => {
                        node.start(&self.root).await?;
                        true
                    }
                    _ => false,
                }
            };
            if started && i + 1 < total {
                let delay = self.start_delay();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        info!("Started {} aggregators", total);
        Ok(())
    }

    pub async fn stop_all(&self) -> Result<()> {
        let mut nodes = self.nodes.lock().await;
        for node in nodes.values_mut() {
            node.stop().await?;
        }
        if let Some(writer) = self.bulk_writer.lock().await.as_mut() {
            writer.stop();
        }
        info!("Stopped {} aggregators", nodes.len());
        Ok(())
    }

    /// Tear everything down, reload configs from storage and start again.
    /// Rounds in flight are lost.
    pub async fn refresh(&self) -> Result<()> {
        self.stop_all().await?;
        self.load().await?;
        self.start_all().await
    }

    pub fn renew_signer(&self) -> Result<()> {
        self.context.signer.rotate_if_needed()?;
        Ok(())
    }
}
