//! Fetcher application
//!
//! Owns one [`LocalAggregator`] per tracked pair, the local aggregate bulk
//! writer and the observation cleanup job.

use crate::bulk_writer::LocalAggregateBulkWriter;
use crate::feed_data::LatestFeedDataMap;
use crate::local_aggregator::{AggregationSettings, LocalAggregator};
use crate::Result;
use common::{LocalAggregate, MessageBus};
use config::FetcherConfig;
use std::sync::Arc;
use std::time::Duration;
use storage::{AggregateStore, Cache};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct Running {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct FetcherApp {
    store: Arc<dyn AggregateStore>,
    cache: Arc<dyn Cache>,
    bus: MessageBus,
    feed_data: Arc<LatestFeedDataMap>,
    config: FetcherConfig,
    cache_ttl: Duration,
    running: Mutex<Option<Running>>,
}

impl FetcherApp {
    pub fn new(
        store: Arc<dyn AggregateStore>,
        cache: Arc<dyn Cache>,
        bus: MessageBus,
        config: FetcherConfig,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            bus,
            feed_data: Arc::new(LatestFeedDataMap::new()),
            config,
            cache_ttl,
            running: Mutex::new(None),
        }
    }

    /// Map that collectors write observations into
    pub fn feed_data(&self) -> Arc<LatestFeedDataMap> {
        self.feed_data.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    async fn build_aggregators(
        &self,
        output: mpsc::Sender<LocalAggregate>,
    ) -> Result<Vec<LocalAggregator>> {
        let settings = AggregationSettings::from_config(&self.config);
        let mut aggregators = Vec::new();

        for config in self.store.load_configs().await? {
            let feeds = self.store.load_feeds(config.id).await?;
            if feeds.is_empty() {
                warn!("No feeds registered for {}, skipping", config.name);
                continue;
            }
            aggregators.push(LocalAggregator::new(
                config,
                &feeds,
                settings.clone(),
                self.feed_data.clone(),
                self.bus.clone(),
                output.clone(),
            ));
        }
        Ok(aggregators)
    }

    /// Start every aggregator plus the writer and cleanup jobs. No-op when running.
    pub async fn start(&self, parent: &CancellationToken) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            info!("Fetcher already running");
            return Ok(());
        }

        let (tx, rx) = mpsc::channel(self.config.buffer_size);
        let aggregators = self.build_aggregators(tx).await?;
        let token = parent.child_token();
        let mut tasks = Vec::with_capacity(aggregators.len() + 2);

        info!("Starting fetcher with {} local aggregators", aggregators.len());

        for aggregator in aggregators {
            let token = token.clone();
            tasks.push(tokio::spawn(async move { aggregator.run(token).await }));
        }

        let writer = LocalAggregateBulkWriter::new(
            self.store.clone(),
            self.cache.clone(),
            Duration::from_millis(self.config.bulk_insert_interval_ms),
            self.cache_ttl,
        );
        {
            let token = token.clone();
            tasks.push(tokio::spawn(async move { writer.run(token, rx).await }));
        }

        {
            let feed_data = self.feed_data.clone();
            let token = token.clone();
            let every = Duration::from_secs(self.config.cleanup_interval_seconds);
            let max_age = Duration::from_secs(self.config.max_feed_data_age_seconds);
            tasks.push(tokio::spawn(async move {
                feed_data.run_cleanup(token, every, max_age).await
            }));
        }

        *running = Some(Running { token, tasks });
        Ok(())
    }

    /// Cancel every task and wait for them to finish. No-op when stopped.
    pub async fn stop(&self) {
        let Some(Running { token, tasks }) = self.running.lock().await.take() else {
            info!("Fetcher already stopped");
            return;
        };

        token.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                error!("Fetcher task ended abnormally: {}", e);
            }
        }
        info!("Fetcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Command, Component, Config, Feed, FeedData};
    use storage::{MemoryCache, MemoryStore};

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.upsert_config(Config {
            id: 1,
            name: "BTC-USD".to_string(),
            fetch_interval: 2000,
            aggregate_interval: 5000,
            submit_interval: 15000,
            feed_data_freshness: None,
        });
        store.upsert_config(Config {
            id: 2,
            name: "ETH-USD".to_string(),
            fetch_interval: 2000,
            aggregate_interval: 5000,
            submit_interval: 15000,
            feed_data_freshness: None,
        });
        store.add_feed(Feed {
            id: 10,
            name: "binance-btc".to_string(),
            definition: serde_json::Value::Null,
            config_id: 1,
        });
        store
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_produces_and_persists_local_aggregates() {
        let store = seeded_store();
        let bus = MessageBus::new(64);
        let mut bus_rx = bus.subscribe(Component::Aggregator).unwrap();
        let app = FetcherApp::new(
            store.clone(),
            Arc::new(MemoryCache::new()),
            bus,
            FetcherConfig::default(),
            Duration::from_secs(300),
        );
        app.feed_data().set_latest([FeedData {
            feed_id: 10,
            value: 65_000.0,
            volume: 0.0,
            timestamp: Some(chrono::Utc::now()),
        }]);

        let root = CancellationToken::new();
        app.start(&root).await.unwrap();
        app.start(&root).await.unwrap();
        assert!(app.is_running().await);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        app.stop().await;
        assert!(!app.is_running().await);

        let msg = bus_rx.recv().await.unwrap();
        assert!(matches!(msg.command, Command::StreamLocalAggregate { value } if value.value == 65_000));

        let persisted = store.local_aggregates();
        assert_eq!(persisted.len(), 2);
        assert!(persisted.iter().all(|a| a.config_id == 1));
    }

    #[tokio::test]
    async fn test_stop_when_not_running_is_noop() {
        let app = FetcherApp::new(
            seeded_store(),
            Arc::new(MemoryCache::new()),
            MessageBus::new(4),
            FetcherConfig::default(),
            Duration::from_secs(300),
        );
        app.stop().await;
        assert!(!app.is_running().await);
    }
}
