//! In-memory store and cache for tests and single-node runs

use crate::error::StorageError;
use crate::traits::{AggregateStore, Cache, StorageResult};
use async_trait::async_trait;
use common::{Config, ConfigId, Feed, GlobalAggregate, LocalAggregate, Proof};
use config::PairSeed;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

const SUBSCRIBER_CAPACITY: usize = 256;

/// Relational store kept in process memory
#[derive(Default)]
pub struct MemoryStore {
    configs: RwLock<BTreeMap<ConfigId, Config>>,
    feeds: RwLock<Vec<Feed>>,
    local_aggregates: RwLock<Vec<LocalAggregate>>,
    global_aggregates: RwLock<Vec<GlobalAggregate>>,
    proofs: RwLock<Vec<Proof>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with the pairs from configuration
    pub fn from_seed(pairs: &[PairSeed]) -> Self {
        let store = Self::new();
        for pair in pairs {
            store.upsert_config(Config {
                id: pair.id,
                name: pair.name.clone(),
                fetch_interval: pair.fetch_interval,
                aggregate_interval: pair.aggregate_interval,
                submit_interval: pair.submit_interval,
                feed_data_freshness: pair.feed_data_freshness,
            });
            for feed in &pair.feeds {
                store.add_feed(Feed {
                    id: feed.id,
                    name: feed.name.clone(),
                    definition: feed.definition.clone(),
                    config_id: pair.id,
                });
            }
        }
        store
    }

    pub fn upsert_config(&self, config: Config) {
        self.configs.write().insert(config.id, config);
    }

    pub fn remove_config(&self, config_id: ConfigId) {
        self.configs.write().remove(&config_id);
        self.feeds.write().retain(|f| f.config_id != config_id);
    }

    pub fn add_feed(&self, feed: Feed) {
        self.feeds.write().push(feed);
    }

    /// Make every subsequent insert fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn local_aggregates(&self) -> Vec<LocalAggregate> {
        self.local_aggregates.read().clone()
    }

    pub fn global_aggregates(&self) -> Vec<GlobalAggregate> {
        self.global_aggregates.read().clone()
    }

    pub fn proofs(&self) -> Vec<Proof> {
        self.proofs.read().clone()
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Query("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn load_configs(&self) -> StorageResult<Vec<Config>> {
        Ok(self.configs.read().values().cloned().collect())
    }

    async fn load_feeds(&self, config_id: ConfigId) -> StorageResult<Vec<Feed>> {
        Ok(self
            .feeds
            .read()
            .iter()
            .filter(|f| f.config_id == config_id)
            .cloned()
            .collect())
    }

    async fn latest_local_aggregate(
        &self,
        config_id: ConfigId,
    ) -> StorageResult<Option<LocalAggregate>> {
        Ok(self
            .local_aggregates
            .read()
            .iter()
            .filter(|a| a.config_id == config_id)
            .max_by_key(|a| a.timestamp)
            .cloned())
    }

    async fn insert_local_aggregates(&self, aggregates: &[LocalAggregate]) -> StorageResult<u64> {
        self.check_writable()?;
        self.local_aggregates.write().extend_from_slice(aggregates);
        Ok(aggregates.len() as u64)
    }

    async fn latest_global_aggregate(
        &self,
        config_id: ConfigId,
    ) -> StorageResult<Option<GlobalAggregate>> {
        Ok(self
            .global_aggregates
            .read()
            .iter()
            .filter(|a| a.config_id == config_id)
            .max_by_key(|a| a.round)
            .cloned())
    }

    async fn insert_global_aggregates(
        &self,
        aggregates: &[GlobalAggregate],
    ) -> StorageResult<u64> {
        self.check_writable()?;
        self.global_aggregates.write().extend_from_slice(aggregates);
        Ok(aggregates.len() as u64)
    }

    async fn insert_proofs(&self, proofs: &[Proof]) -> StorageResult<u64> {
        self.check_writable()?;
        self.proofs.write().extend_from_slice(proofs);
        Ok(proofs.len() as u64)
    }
}

/// Key-value cache with expiring entries and fan-out pub/sub
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<String>>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .lock()
            .get(channel)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StorageResult<()> {
        self.entries
            .write()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> StorageResult<()> {
        let targets = {
            let mut subscribers = self.subscribers.lock();
            match subscribers.get_mut(channel) {
                Some(subs) => {
                    subs.retain(|tx| !tx.is_closed());
                    subs.clone()
                }
                None => return Ok(()),
            }
        };

        for tx in targets {
            // A receiver dropped since the snapshot is pruned on the next publish
            let _ = tx.send(payload.to_string()).await;
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> StorageResult<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subscribers
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{get_json, set_json};
    use chrono::Utc;

    fn aggregate(config_id: ConfigId, round: i64, value: i64) -> GlobalAggregate {
        GlobalAggregate {
            config_id,
            value,
            round,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_latest_global_aggregate_uses_highest_round() {
        let store = MemoryStore::new();
        store
            .insert_global_aggregates(&[aggregate(1, 4, 10), aggregate(1, 9, 11), aggregate(2, 20, 5)])
            .await
            .unwrap();

        let latest = store.latest_global_aggregate(1).await.unwrap().unwrap();
        assert_eq!(latest.round, 9);
        assert!(store.latest_global_aggregate(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(store.insert_proofs(&[]).await.is_err());
        assert!(store.proofs().is_empty());
    }

    #[tokio::test]
    async fn test_seeded_store() {
        let pairs: Vec<PairSeed> = seed_pairs();
        let store = MemoryStore::from_seed(&pairs);
        let configs = store.load_configs().await.unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(store.load_feeds(1).await.unwrap().len(), 2);
        assert!(store.load_feeds(2).await.unwrap().is_empty());
    }

    fn seed_pairs() -> Vec<PairSeed> {
        serde_json::from_value(serde_json::json!([{
            "id": 1,
            "name": "BTC-USD",
            "fetch_interval": 2000,
            "aggregate_interval": 5000,
            "submit_interval": 15000,
            "feeds": [
                {"id": 1, "name": "a"},
                {"id": 2, "name": "b"}
            ]
        }]))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_entries_expire() {
        let cache = MemoryCache::new();
        set_json(&cache, "k", &42i64, Duration::from_secs(5)).await.unwrap();
        assert_eq!(get_json::<i64>(&cache, "k").await.unwrap(), Some(42));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(get_json::<i64>(&cache, "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_publish_fans_out_to_subscribers() {
        let cache = MemoryCache::new();
        let mut first = cache.subscribe("stream").await.unwrap();
        let mut second = cache.subscribe("stream").await.unwrap();

        cache.publish("stream", "hello").await.unwrap();
        cache.publish("other", "ignored").await.unwrap();

        assert_eq!(first.recv().await.unwrap(), "hello");
        assert_eq!(second.recv().await.unwrap(), "hello");

        drop(second);
        cache.publish("stream", "again").await.unwrap();
        assert_eq!(cache.subscriber_count("stream"), 1);
    }
}
