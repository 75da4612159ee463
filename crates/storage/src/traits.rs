//! Store traits
//!
//! [`AggregateStore`] is the relational side (configs, feeds and the
//! aggregate tables). [`Cache`] is the key-value side, including the
//! pub/sub primitive that carries SubmissionData between components.

use crate::error::StorageError;
use async_trait::async_trait;
use common::{Config, ConfigId, Feed, GlobalAggregate, LocalAggregate, Proof};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// All tracked pairs
    async fn load_configs(&self) -> StorageResult<Vec<Config>>;

    async fn load_feeds(&self, config_id: ConfigId) -> StorageResult<Vec<Feed>>;

    async fn latest_local_aggregate(
        &self,
        config_id: ConfigId,
    ) -> StorageResult<Option<LocalAggregate>>;

    /// Returns the number of rows written
    async fn insert_local_aggregates(&self, aggregates: &[LocalAggregate]) -> StorageResult<u64>;

    /// Aggregate with the highest round for the pair
    async fn latest_global_aggregate(
        &self,
        config_id: ConfigId,
    ) -> StorageResult<Option<GlobalAggregate>>;

    async fn insert_global_aggregates(&self, aggregates: &[GlobalAggregate])
        -> StorageResult<u64>;

    async fn insert_proofs(&self, proofs: &[Proof]) -> StorageResult<u64>;
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StorageResult<()>;

    /// Deliver `payload` to every current subscriber of `channel`.
    ///
    /// Waits while a subscriber's queue is full.
    async fn publish(&self, channel: &str, payload: &str) -> StorageResult<()>;

    /// Receive every payload published on `channel` from now on
    async fn subscribe(&self, channel: &str) -> StorageResult<mpsc::Receiver<String>>;
}

pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn Cache,
    key: &str,
) -> StorageResult<Option<T>> {
    match cache.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + Sync>(
    cache: &dyn Cache,
    key: &str,
    value: &T,
    ttl: Duration,
) -> StorageResult<()> {
    let raw = serde_json::to_string(value)?;
    cache.set(key, &raw, ttl).await
}

pub async fn publish_json<T: Serialize + Sync>(
    cache: &dyn Cache,
    channel: &str,
    value: &T,
) -> StorageResult<()> {
    let raw = serde_json::to_string(value)?;
    cache.publish(channel, &raw).await
}
