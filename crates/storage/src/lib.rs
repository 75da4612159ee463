//! Storage and cache abstractions for the oracle node
//!
//! - [`AggregateStore`]: configs, feeds and the aggregate tables
//!   (in-memory or PostgreSQL)
//! - [`Cache`]: key-value entries with TTL plus pub/sub (in-memory or Redis)
//!
//! Handles are built once at startup by [`create_store`] / [`create_cache`]
//! and passed explicitly to every component.

pub mod error;
pub mod keys;
mod memory;
mod postgres;
mod redis;
mod traits;

pub use error::StorageError;
pub use self::memory::{MemoryCache, MemoryStore};
pub use self::postgres::PostgresStore;
pub use self::redis::RedisCache;
pub use self::traits::*;

use config::{CacheConfig, StorageConfig};
use std::sync::Arc;
use tracing::info;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    InMemory,
    Postgres,
    Redis,
}

impl BackendType {
    /// Parse backend type from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "inmemory" | "in_memory" | "memory" => Some(BackendType::InMemory),
            "postgres" | "postgresql" => Some(BackendType::Postgres),
            "redis" => Some(BackendType::Redis),
            _ => None,
        }
    }
}

/// Create the relational store described by configuration
pub async fn create_store(config: &StorageConfig) -> Result<Arc<dyn AggregateStore>> {
    match BackendType::parse(&config.storage_type) {
        Some(BackendType::InMemory) => {
            info!(pairs = config.pairs.len(), "Creating in-memory store");
            Ok(Arc::new(MemoryStore::from_seed(&config.pairs)))
        }
        Some(BackendType::Postgres) => {
            let pg = config.postgres.as_ref().ok_or_else(|| {
                StorageError::Config("Postgres config required for postgres storage".to_string())
            })?;
            info!("Creating PostgreSQL store");
            let store = PostgresStore::new(pg).await?;
            if config.run_migrations {
                store.run_migrations().await?;
            }
            Ok(Arc::new(store))
        }
        _ => Err(StorageError::Config(format!(
            "Unsupported storage type '{}'",
            config.storage_type
        ))),
    }
}

/// Create the key-value cache described by configuration
pub async fn create_cache(config: &CacheConfig) -> Result<Arc<dyn Cache>> {
    match BackendType::parse(&config.cache_type) {
        Some(BackendType::InMemory) => {
            info!("Creating in-memory cache");
            Ok(Arc::new(MemoryCache::new()))
        }
        Some(BackendType::Redis) => {
            let redis = config.redis.as_ref().ok_or_else(|| {
                StorageError::Config("Redis config required for redis cache".to_string())
            })?;
            info!("Creating Redis cache");
            Ok(Arc::new(RedisCache::new(redis).await?))
        }
        _ => Err(StorageError::Config(format!(
            "Unsupported cache type '{}'",
            config.cache_type
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_backend_type_parse() {
        assert_eq!(BackendType::parse("Memory"), Some(BackendType::InMemory));
        assert_eq!(BackendType::parse("postgres"), Some(BackendType::Postgres));
        assert_eq!(BackendType::parse("redis"), Some(BackendType::Redis));
        assert_eq!(BackendType::parse("sqlite"), None);
    }

    #[tokio::test]
    async fn test_create_memory_backends() {
        let store = create_store(&StorageConfig::default()).await.unwrap();
        assert!(store.load_configs().await.unwrap().is_empty());

        let cache = create_cache(&CacheConfig::default()).await.unwrap();
        assert!(cache.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_postgres_without_settings_fails() {
        let config = StorageConfig {
            storage_type: "postgres".to_string(),
            ..StorageConfig::default()
        };
        assert_matches!(create_store(&config).await.err(), Some(StorageError::Config(_)));
    }
}
