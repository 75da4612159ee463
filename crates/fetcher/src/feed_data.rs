//! Latest observation per feed
//!
//! Collectors write normalized observations here; local aggregators read the
//! newest one for each of their feeds on every tick.

use chrono::{DateTime, Utc};
use common::{FeedData, FeedId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct LatestFeedDataMap {
    entries: RwLock<HashMap<FeedId, FeedData>>,
}

impl LatestFeedDataMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a batch, keeping whichever observation per feed is newer
    pub fn set_latest(&self, batch: impl IntoIterator<Item = FeedData>) {
        let mut entries = self.entries.write();
        for data in batch {
            if let Some(prev) = entries.get(&data.feed_id) {
                if prev.timestamp > data.timestamp {
                    continue;
                }
            }
            entries.insert(data.feed_id, data);
        }
    }

    /// Observations for `feed_ids` in request order. Unknown feeds are skipped.
    pub fn get_latest(&self, feed_ids: &[FeedId]) -> Vec<FeedData> {
        let entries = self.entries.read();
        feed_ids
            .iter()
            .filter_map(|id| entries.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop observations stamped before `cutoff`; returns how many went
    pub fn remove_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, data| data.timestamp.map_or(true, |ts| ts >= cutoff));
        before - entries.len()
    }

    /// Periodically evict observations older than `max_age` until cancelled
    pub async fn run_cleanup(&self, token: CancellationToken, every: Duration, max_age: Duration) {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::days(1));
        let mut timer = tokio::time::interval(every);
        timer.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Feed data cleanup stopped");
                    return;
                }
                _ = timer.tick() => {
                    let removed = self.remove_older_than(Utc::now() - max_age);
                    debug!(removed, remaining = self.len(), "Feed data cleanup pass");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(feed_id: FeedId, value: f64, secs_ago: i64) -> FeedData {
        FeedData {
            feed_id,
            value,
            volume: 0.0,
            timestamp: Some(Utc::now() - chrono::Duration::seconds(secs_ago)),
        }
    }

    #[test]
    fn test_latest_wins() {
        let map = LatestFeedDataMap::new();
        map.set_latest([data(1, 100.0, 10)]);
        map.set_latest([data(1, 90.0, 20)]);
        assert_eq!(map.get_latest(&[1])[0].value, 100.0);

        map.set_latest([data(1, 110.0, 0)]);
        assert_eq!(map.get_latest(&[1])[0].value, 110.0);
    }

    #[test]
    fn test_get_latest_keeps_request_order() {
        let map = LatestFeedDataMap::new();
        map.set_latest([data(1, 1.0, 0), data(2, 2.0, 0), data(3, 3.0, 0)]);

        let values: Vec<f64> = map.get_latest(&[3, 9, 1]).iter().map(|d| d.value).collect();
        assert_eq!(values, vec![3.0, 1.0]);
    }

    #[test]
    fn test_remove_older_than() {
        let map = LatestFeedDataMap::new();
        map.set_latest([
            data(1, 1.0, 90_000),
            data(2, 2.0, 10),
            FeedData {
                feed_id: 3,
                value: 3.0,
                volume: 0.0,
                timestamp: None,
            },
        ]);

        let removed = map.remove_older_than(Utc::now() - chrono::Duration::days(1));
        assert_eq!(removed, 1);
        assert_eq!(map.len(), 2);
        assert!(map.get_latest(&[1]).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_job_stops_on_cancel() {
        let map = std::sync::Arc::new(LatestFeedDataMap::new());
        map.set_latest([data(1, 1.0, 90_000)]);

        let token = CancellationToken::new();
        let job = {
            let (map, token) = (map.clone(), token.clone());
            tokio::spawn(async move {
                map.run_cleanup(token, Duration::from_secs(3600), Duration::from_secs(86_400))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(3601)).await;
        assert!(map.is_empty());

        token.cancel();
        job.await.unwrap();
    }
}
