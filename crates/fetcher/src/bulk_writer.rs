//! Batched persistence of local aggregates

use common::{ConfigId, LocalAggregate};
use observability::BulkWriterMetrics;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use storage::keys::local_aggregate_key;
use storage::{set_json, AggregateStore, Cache};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct LocalAggregateBulkWriter {
    store: Arc<dyn AggregateStore>,
    cache: Arc<dyn Cache>,
    interval: Duration,
    cache_ttl: Duration,
    metrics: BulkWriterMetrics,
}

impl LocalAggregateBulkWriter {
    pub fn new(
        store: Arc<dyn AggregateStore>,
        cache: Arc<dyn Cache>,
        interval: Duration,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            interval,
            cache_ttl,
            metrics: BulkWriterMetrics::new("local_aggregates"),
        }
    }

    /// Drain whatever is queued and write it. Returns the batch size.
    ///
    /// A failed insert drops the batch.
    pub async fn flush(&self, queue: &mut mpsc::Receiver<LocalAggregate>) -> usize {
        let mut batch = Vec::new();
        while let Ok(item) = queue.try_recv() {
            batch.push(item);
        }
        if batch.is_empty() {
            return 0;
        }

        match self.store.insert_local_aggregates(&batch).await {
            Ok(rows) => {
                debug!(rows, "Inserted local aggregates");
                self.metrics.record_flush(batch.len());
            }
            Err(e) => {
                error!(batch = batch.len(), "Failed to insert local aggregates: {}", e);
                self.metrics.flush_failed();
            }
        }

        let mut latest: HashMap<ConfigId, &LocalAggregate> = HashMap::new();
        for item in &batch {
            latest
                .entry(item.config_id)
                .and_modify(|cur| {
                    if item.timestamp >= cur.timestamp {
                        *cur = item;
                    }
                })
                .or_insert(item);
        }
        for (config_id, item) in latest {
            let key = local_aggregate_key(config_id);
            if let Err(e) = set_json(self.cache.as_ref(), &key, item, self.cache_ttl).await {
                warn!(config_id, "Failed to cache local aggregate: {}", e);
            }
        }

        batch.len()
    }

    /// Flush on every interval until cancelled, then flush once more
    pub async fn run(&self, token: CancellationToken, mut queue: mpsc::Receiver<LocalAggregate>) {
        info!(interval_ms = self.interval.as_millis() as u64, "Starting local aggregate bulk writer");

        let mut timer = tokio::time::interval(self.interval);
        timer.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    let remaining = self.flush(&mut queue).await;
                    info!(remaining, "Local aggregate bulk writer stopped");
                    return;
                }
                _ = timer.tick() => {
                    self.flush(&mut queue).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use storage::{get_json, MemoryCache, MemoryStore};

    fn local(config_id: ConfigId, value: i64, ms_ago: i64) -> LocalAggregate {
        LocalAggregate {
            config_id,
            value,
            timestamp: Utc::now() - ChronoDuration::milliseconds(ms_ago),
        }
    }

    #[tokio::test]
    async fn test_flush_persists_and_caches_latest() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let writer = LocalAggregateBulkWriter::new(
            store.clone(),
            cache.clone(),
            Duration::from_secs(1),
            Duration::from_secs(300),
        );

        let (tx, mut rx) = mpsc::channel(16);
        tx.send(local(1, 100, 20)).await.unwrap();
        tx.send(local(1, 101, 10)).await.unwrap();
        tx.send(local(2, 7, 0)).await.unwrap();

        assert_eq!(writer.flush(&mut rx).await, 3);
        assert_eq!(store.local_aggregates().len(), 3);

        let cached: LocalAggregate = get_json(cache.as_ref(), &local_aggregate_key(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.value, 101);
        assert_eq!(writer.flush(&mut rx).await, 0);
    }

    #[tokio::test]
    async fn test_failed_insert_drops_batch() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_writes(true);
        let writer = LocalAggregateBulkWriter::new(
            store.clone(),
            Arc::new(MemoryCache::new()),
            Duration::from_secs(1),
            Duration::from_secs(300),
        );

        let (tx, mut rx) = mpsc::channel(16);
        tx.send(local(1, 100, 0)).await.unwrap();

        assert_eq!(writer.flush(&mut rx).await, 1);
        store.set_fail_writes(false);
        assert_eq!(writer.flush(&mut rx).await, 0);
        assert!(store.local_aggregates().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_flushes_on_interval_and_on_stop() {
        let store = Arc::new(MemoryStore::new());
        let writer = Arc::new(LocalAggregateBulkWriter::new(
            store.clone(),
            Arc::new(MemoryCache::new()),
            Duration::from_secs(1),
            Duration::from_secs(300),
        ));

        let (tx, rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let task = {
            let (writer, token) = (writer.clone(), token.clone());
            tokio::spawn(async move { writer.run(token, rx).await })
        };

        tx.send(local(1, 100, 0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(store.local_aggregates().len(), 1);

        tx.send(local(1, 101, 0)).await.unwrap();
        token.cancel();
        task.await.unwrap();
        assert_eq!(store.local_aggregates().len(), 2);
    }
}
