//! Per-pair local aggregation
//!
//! On every tick a [`LocalAggregator`] reduces the latest observation of each
//! of its feeds into one value, streams it to the aggregator component over
//! the command bus and queues it for persistence.

use crate::error::FetcherError;
use crate::feed_data::LatestFeedDataMap;
use crate::price;
use crate::Result;
use chrono::{DateTime, Utc};
use common::{BusMessage, Command, Component, Config, Feed, FeedId, LocalAggregate, MessageBus};
use config::FetcherConfig;
use observability::LocalAggregatorMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reduction parameters shared by every pair
#[derive(Debug, Clone)]
pub struct AggregationSettings {
    pub interval: Duration,
    pub median_ratio: f64,
    pub max_outlier_removal_ratio: f64,
    pub fx_pairs: Vec<String>,
}

impl AggregationSettings {
    pub fn from_config(config: &FetcherConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.local_aggregate_interval_ms),
            median_ratio: config.median_ratio,
            max_outlier_removal_ratio: config.max_outlier_removal_ratio,
            fx_pairs: config.fx_pairs.clone(),
        }
    }

    /// Currency pairs are reduced with a plain median
    pub fn is_fx(&self, pair: &str) -> bool {
        self.fx_pairs.iter().any(|p| p == pair)
    }
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self::from_config(&FetcherConfig::default())
    }
}

pub struct LocalAggregator {
    config: Config,
    feed_ids: Vec<FeedId>,
    settings: AggregationSettings,
    feed_data: Arc<LatestFeedDataMap>,
    bus: MessageBus,
    output: mpsc::Sender<LocalAggregate>,
    metrics: LocalAggregatorMetrics,
}

impl LocalAggregator {
    pub fn new(
        config: Config,
        feeds: &[Feed],
        settings: AggregationSettings,
        feed_data: Arc<LatestFeedDataMap>,
        bus: MessageBus,
        output: mpsc::Sender<LocalAggregate>,
    ) -> Self {
        let metrics = LocalAggregatorMetrics::new(&config.name);
        Self {
            feed_ids: feeds.iter().map(|f| f.id).collect(),
            config,
            settings,
            feed_data,
            bus,
            output,
            metrics,
        }
    }

    /// Reduce the current observations, or `None` when the tick is skipped
    pub fn aggregate(&self, now: DateTime<Utc>) -> Option<f64> {
        let collected = self.feed_data.get_latest(&self.feed_ids);
        let feeds = price::filter_stale(collected, self.config.feed_data_freshness, now);

        if feeds.is_empty() || feeds.len() < self.feed_ids.len() / 2 {
            debug!(
                pair = %self.config.name,
                available = feeds.len(),
                registered = self.feed_ids.len(),
                "Not enough feeds"
            );
            return None;
        }

        if self.settings.is_fx(&self.config.name) {
            let values: Vec<f64> = feeds.iter().map(|f| f.value).collect();
            return Some(price::median(&values));
        }

        let filtered = price::filter_outliers(feeds, self.settings.max_outlier_removal_ratio);
        let (weighted, plain) = price::partition_by_volume(filtered);
        let vwap = price::vwap(&weighted);
        let plain_values: Vec<f64> = plain.iter().map(|f| f.value).collect();
        let median = price::median(&plain_values);

        debug!(pair = %self.config.name, vwap, median, "Reduced observations");
        Some(price::blend(vwap, median, self.settings.median_ratio))
    }

    /// One tick. Returns the aggregate that was produced, if any.
    ///
    /// The aggregate is queued for persistence even when the bus publish
    /// fails; the publish error is still returned.
    pub async fn job(&self) -> Result<Option<LocalAggregate>> {
        let now = Utc::now();
        let value = match self.aggregate(now) {
            Some(v) if v.is_finite() => v as i64,
            Some(_) => return Ok(None),
            None => {
                self.metrics.skipped();
                return Ok(None);
            }
        };
        // Sub-unit prices truncate to zero and are never published
        if value == 0 {
            debug!(pair = %self.config.name, "Local aggregate truncated to zero");
            return Ok(None);
        }

        let local = LocalAggregate {
            config_id: self.config.id,
            value,
            timestamp: now,
        };

        let published = self.bus.publish(BusMessage::new(
            Component::Fetcher,
            Component::Aggregator,
            Command::StreamLocalAggregate {
                value: local.clone(),
            },
        ));

        if self.output.send(local.clone()).await.is_err() {
            warn!(pair = %self.config.name, "Local aggregate queue closed");
        }

        if let Err(e) = published {
            self.metrics.publish_failed();
            return Err(FetcherError::Bus(e));
        }

        self.metrics.produced();
        Ok(Some(local))
    }

    /// Tick until cancelled
    pub async fn run(&self, token: CancellationToken) {
        info!(
            "Starting local aggregator for {} (interval={}ms, feeds={})",
            self.config.name,
            self.settings.interval.as_millis(),
            self.feed_ids.len()
        );

        let mut timer = tokio::time::interval(self.settings.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Local aggregator for {} stopped", self.config.name);
                    return;
                }
                _ = timer.tick() => {
                    if let Err(e) = self.job().await {
                        error!(pair = %self.config.name, "Local aggregation failed: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use common::{BusError, FeedData};

    fn pair(id: i32, name: &str, freshness: Option<i32>) -> Config {
        Config {
            id,
            name: name.to_string(),
            fetch_interval: 2000,
            aggregate_interval: 5000,
            submit_interval: 15000,
            feed_data_freshness: freshness,
        }
    }

    fn feeds(config_id: i32, ids: &[i32]) -> Vec<Feed> {
        ids.iter()
            .map(|id| Feed {
                id: *id,
                name: format!("feed-{id}"),
                definition: serde_json::Value::Null,
                config_id,
            })
            .collect()
    }

    fn observation(feed_id: i32, value: f64, volume: f64) -> FeedData {
        FeedData {
            feed_id,
            value,
            volume,
            timestamp: Some(Utc::now()),
        }
    }

    struct Harness {
        aggregator: LocalAggregator,
        feed_data: Arc<LatestFeedDataMap>,
        bus_rx: mpsc::Receiver<BusMessage>,
        output_rx: mpsc::Receiver<LocalAggregate>,
    }

    fn harness(config: Config, feed_ids: &[i32], bus_capacity: usize) -> Harness {
        let bus = MessageBus::new(bus_capacity);
        let bus_rx = bus.subscribe(Component::Aggregator).unwrap();
        let (tx, output_rx) = mpsc::channel(16);
        let feed_data = Arc::new(LatestFeedDataMap::new());
        let aggregator = LocalAggregator::new(
            config.clone(),
            &feeds(config.id, feed_ids),
            AggregationSettings::default(),
            feed_data.clone(),
            bus,
            tx,
        );
        Harness {
            aggregator,
            feed_data,
            bus_rx,
            output_rx,
        }
    }

    #[tokio::test]
    async fn test_blends_vwap_and_median() {
        let mut h = harness(pair(1, "BTC-USD", None), &[1, 2, 3], 8);
        h.feed_data.set_latest([
            observation(1, 100.0, 1.0),
            observation(2, 200.0, 3.0),
            observation(3, 300.0, 0.0),
        ]);

        // vwap 175, median 300 → 175·0.95 + 300·0.05 = 181.25
        let local = h.aggregator.job().await.unwrap().unwrap();
        assert_eq!(local.value, 181);
        assert_eq!(local.config_id, 1);

        let msg = h.bus_rx.recv().await.unwrap();
        assert_eq!(msg.from, Component::Fetcher);
        assert_matches!(msg.command, Command::StreamLocalAggregate { value } if value == local);
        assert_eq!(h.output_rx.recv().await.unwrap(), local);
    }

    #[tokio::test]
    async fn test_fx_pair_uses_median() {
        let h = harness(pair(2, "EUR-USD", None), &[1, 2, 3], 8);
        h.feed_data.set_latest([
            observation(1, 108_000.0, 10.0),
            observation(2, 108_200.0, 0.0),
            observation(3, 107_900.0, 99.0),
        ]);

        assert_eq!(h.aggregator.aggregate(Utc::now()), Some(108_000.0));
    }

    #[tokio::test]
    async fn test_zero_result_is_not_published() {
        let mut h = harness(pair(1, "BTC-USD", None), &[1, 2], 8);
        h.feed_data.set_latest([observation(1, 0.0, 0.0), observation(2, 0.0, 0.0)]);

        assert!(h.aggregator.job().await.unwrap().is_none());
        assert!(h.bus_rx.try_recv().is_err());
        assert!(h.output_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sub_unit_price_is_not_published() {
        let mut h = harness(pair(1, "DOGE-USD", None), &[1], 8);
        h.feed_data.set_latest([observation(1, 0.086, 0.0)]);

        assert_eq!(h.aggregator.aggregate(Utc::now()), Some(0.086));
        assert!(h.aggregator.job().await.unwrap().is_none());
        assert!(h.bus_rx.try_recv().is_err());
        assert!(h.output_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_insufficient_coverage_skips_tick() {
        let h = harness(pair(1, "BTC-USD", None), &[1, 2, 3, 4], 8);
        h.feed_data.set_latest([observation(1, 100.0, 1.0)]);

        assert_eq!(h.aggregator.aggregate(Utc::now()), None);
    }

    #[tokio::test]
    async fn test_stale_feed_excluded_from_value() {
        let h = harness(pair(1, "BTC-USD", Some(60_000)), &[1, 2], 8);
        let now = Utc::now();
        h.feed_data.set_latest([
            FeedData {
                feed_id: 1,
                value: 100.0,
                volume: 0.0,
                timestamp: Some(now - chrono::Duration::milliseconds(59_999)),
            },
            FeedData {
                feed_id: 2,
                value: 500.0,
                volume: 0.0,
                timestamp: Some(now - chrono::Duration::milliseconds(60_001)),
            },
        ]);

        assert_eq!(h.aggregator.aggregate(now), Some(100.0));
    }

    #[tokio::test]
    async fn test_bus_failure_still_forwards_locally() {
        let mut h = harness(pair(1, "BTC-USD", None), &[1], 1);
        h.aggregator
            .bus
            .publish(BusMessage::new(
                Component::Admin,
                Component::Aggregator,
                Command::StartAggregatorApp,
            ))
            .unwrap();
        h.feed_data.set_latest([observation(1, 100.0, 0.0)]);

        let err = h.aggregator.job().await.unwrap_err();
        assert_matches!(err, FetcherError::Bus(BusError::ChannelFull(Component::Aggregator)));
        assert_eq!(h.output_rx.recv().await.unwrap().value, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_cancelled() {
        let Harness {
            aggregator,
            feed_data,
            mut output_rx,
            bus_rx: _bus_rx,
        } = harness(pair(1, "BTC-USD", None), &[1], 8);
        feed_data.set_latest([observation(1, 100.0, 0.0)]);

        let token = CancellationToken::new();
        let task = {
            let token = token.clone();
            tokio::spawn(async move { aggregator.run(token).await })
        };

        tokio::time::sleep(Duration::from_millis(850)).await;
        token.cancel();
        task.await.unwrap();

        let mut produced = 0;
        while output_rx.try_recv().is_ok() {
            produced += 1;
        }
        assert_eq!(produced, 2);
    }
}
