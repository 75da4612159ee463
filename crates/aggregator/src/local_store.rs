//! Fast-path store of the latest local aggregate per pair
//!
//! Written by STREAM_LOCAL_AGGREGATE commands, read by every node when it
//! answers a round.

use common::{ConfigId, LocalAggregate};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct SharedLocalAggregates {
    inner: Arc<RwLock<HashMap<ConfigId, LocalAggregate>>>,
}

impl SharedLocalAggregates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `aggregate` unless a newer one is already stored
    pub fn upsert(&self, aggregate: LocalAggregate) {
        let mut map = self.inner.write();
        match map.get(&aggregate.config_id) {
            Some(current) if current.timestamp > aggregate.timestamp => {}
            _ => {
                map.insert(aggregate.config_id, aggregate);
            }
        }
    }

    pub fn get(&self, config_id: ConfigId) -> Option<LocalAggregate> {
        self.inner.read().get(&config_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_latest_wins() {
        let store = SharedLocalAggregates::new();
        let now = Utc::now();
        store.upsert(LocalAggregate {
            config_id: 1,
            value: 100,
            timestamp: now,
        });
        store.upsert(LocalAggregate {
            config_id: 1,
            value: 90,
            timestamp: now - Duration::seconds(1),
        });
        assert_eq!(store.get(1).unwrap().value, 100);

        store.upsert(LocalAggregate {
            config_id: 1,
            value: 110,
            timestamp: now + Duration::seconds(1),
        });
        assert_eq!(store.get(1).unwrap().value, 110);
        assert!(store.get(2).is_none());
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let store = SharedLocalAggregates::new();
        let base = Utc::now();
        let mut tasks = Vec::new();
        for i in 0..8i64 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.upsert(LocalAggregate {
                    config_id: 1,
                    value: i,
                    timestamp: base + Duration::milliseconds(i),
                });
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(store.get(1).unwrap().value, 7);
    }
}
