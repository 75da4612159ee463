//! Redis implementation of the `Cache` trait
//!
//! Commands share one connection manager. Every subscription opens its own
//! pub/sub connection, pumped into an mpsc channel by a background task.

use crate::error::StorageError;
use crate::traits::{Cache, StorageResult};
use async_trait::async_trait;
use config::RedisConfig;
use futures::StreamExt;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const SUBSCRIBER_CAPACITY: usize = 256;

pub struct RedisCache {
    client: redis::Client,
    redis: Arc<tokio::sync::Mutex<redis::aio::ConnectionManager>>,
}

fn cache_error(e: redis::RedisError) -> StorageError {
    StorageError::Cache(e.to_string())
}

impl RedisCache {
    pub async fn new(config: &RedisConfig) -> StorageResult<Self> {
        let connection_string = if config.password.is_empty() {
            format!("redis://{}:{}/{}", config.host, config.port, config.db_index)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                config.password, config.host, config.port, config.db_index
            )
        };

        info!(host = %config.host, port = config.port, db = config.db_index, "Connecting to Redis");

        let client = redis::Client::open(connection_string.as_str())
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let connection_manager = client
            .get_connection_manager()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            redis: Arc::new(tokio::sync::Mutex::new(connection_manager)),
        })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let mut redis = self.redis.lock().await;
        redis.get::<_, Option<String>>(key).await.map_err(cache_error)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StorageResult<()> {
        let mut redis = self.redis.lock().await;
        redis
            .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(cache_error)
    }

    async fn publish(&self, channel: &str, payload: &str) -> StorageResult<()> {
        let mut redis = self.redis.lock().await;
        redis
            .publish::<_, _, ()>(channel, payload)
            .await
            .map_err(cache_error)
    }

    async fn subscribe(&self, channel: &str) -> StorageResult<mpsc::Receiver<String>> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(cache_error)?;
        pubsub.subscribe(channel).await.map_err(cache_error)?;

        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let channel = channel.to_string();
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(%channel, error = %e, "Dropping undecodable pub/sub payload");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
            debug!(%channel, "Redis subscription closed");
        });

        Ok(rx)
    }
}
