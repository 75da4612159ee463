use serde::{Deserialize, Serialize};

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    pub node: NodeSection,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub signer: SignerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeSection {
    /// Host identity announced on the gossip overlay
    pub id: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_leader_job_interval_ms")]
    pub leader_job_interval_ms: u64,
    #[serde(default = "default_bulk_insert_interval_ms")]
    pub bulk_insert_interval_ms: u64,
    #[serde(default = "default_aggregator_buffer_size")]
    pub buffer_size: usize,
    /// Rounds behind the current one whose partial collections are kept
    #[serde(default = "default_round_retention")]
    pub round_retention: i64,
    #[serde(default = "default_start_stagger_ms")]
    pub start_stagger_ms: u64,
    #[serde(default = "default_start_jitter_ms")]
    pub start_jitter_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            leader_job_interval_ms: default_leader_job_interval_ms(),
            bulk_insert_interval_ms: default_bulk_insert_interval_ms(),
            buffer_size: default_aggregator_buffer_size(),
            round_retention: default_round_retention(),
            start_stagger_ms: default_start_stagger_ms(),
            start_jitter_ms: default_start_jitter_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetcherConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_local_aggregate_interval_ms")]
    pub local_aggregate_interval_ms: u64,
    #[serde(default = "default_median_ratio")]
    pub median_ratio: f64,
    #[serde(default = "default_max_outlier_removal_ratio")]
    pub max_outlier_removal_ratio: f64,
    #[serde(default = "default_fx_pairs")]
    pub fx_pairs: Vec<String>,
    #[serde(default = "default_bulk_insert_interval_ms")]
    pub bulk_insert_interval_ms: u64,
    #[serde(default = "default_fetcher_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,
    #[serde(default = "default_max_feed_data_age_seconds")]
    pub max_feed_data_age_seconds: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            local_aggregate_interval_ms: default_local_aggregate_interval_ms(),
            median_ratio: default_median_ratio(),
            max_outlier_removal_ratio: default_max_outlier_removal_ratio(),
            fx_pairs: default_fx_pairs(),
            bulk_insert_interval_ms: default_bulk_insert_interval_ms(),
            buffer_size: default_fetcher_buffer_size(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
            max_feed_data_age_seconds: default_max_feed_data_age_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    #[serde(default = "default_storage_type")]
    pub storage_type: String,
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
    #[serde(default)]
    pub run_migrations: bool,
    /// Pairs loaded into the in-memory store at startup
    #[serde(default)]
    pub pairs: Vec<PairSeed>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: default_storage_type(),
            postgres: None,
            run_migrations: false,
            pairs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostgresConfig {
    pub host: String,
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl PostgresConfig {
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.database, self.ssl_mode
        )
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PairSeed {
    pub id: i32,
    pub name: String,
    pub fetch_interval: i32,
    pub aggregate_interval: i32,
    pub submit_interval: i32,
    #[serde(default)]
    pub feed_data_freshness: Option<i32>,
    #[serde(default)]
    pub feeds: Vec<FeedSeed>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedSeed {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub definition: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(rename = "type")]
    #[serde(default = "default_storage_type")]
    pub cache_type: String,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: default_storage_type(),
            redis: None,
            ttl_seconds: default_ttl_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db_index: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignerConfig {
    /// Hex encoded signing key
    pub private_key: String,
    #[serde(default = "default_rotation_interval_seconds")]
    pub rotation_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample_node_config() {
        let yaml = include_str!("../../../node_config/oracle.yaml");
        let cfg: NodeConfig = serde_yaml::from_str(yaml).expect("sample config parses");

        assert_eq!(cfg.node.id, "oracle-node-1");
        assert_eq!(cfg.storage.storage_type, "memory");
        assert_eq!(cfg.storage.pairs.len(), 2);
        assert_eq!(cfg.storage.pairs[0].name, "BTC-USD");
        assert_eq!(cfg.storage.pairs[0].feeds.len(), 3);
        assert_eq!(cfg.storage.pairs[0].feed_data_freshness, Some(60000));
        assert_eq!(cfg.cache.cache_type, "memory");
        assert_eq!(cfg.logging.format, "pretty");
        assert!(cfg.fetcher.fx_pairs.contains(&"EUR-USD".to_string()));
    }

    #[test]
    fn test_minimal_config_applies_defaults() {
        let yaml = r#"
node:
  id: node-a
signer:
  private_key: "00ff"
"#;
        let cfg: NodeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.node.service_name, "oracled");
        assert_eq!(cfg.aggregator.buffer_size, 2000);
        assert_eq!(cfg.aggregator.bulk_insert_interval_ms, 1000);
        assert_eq!(cfg.fetcher.local_aggregate_interval_ms, 400);
        assert!((cfg.fetcher.median_ratio - 0.05).abs() < f64::EPSILON);
        assert_eq!(cfg.fetcher.fx_pairs.len(), 5);
        assert_eq!(cfg.cache.ttl_seconds, 300);
        assert_eq!(cfg.signer.rotation_interval_seconds, 604800);
        assert!(!cfg.metrics.enabled);
    }

    #[test]
    fn test_postgres_connection_url() {
        let pg = PostgresConfig {
            host: "db".to_string(),
            port: 5432,
            database: "oracle".to_string(),
            user: "node".to_string(),
            password: "secret".to_string(),
            ssl_mode: "disable".to_string(),
            max_connections: 5,
        };
        assert_eq!(
            pg.connection_url(),
            "postgres://node:secret@db:5432/oracle?sslmode=disable"
        );
    }
}
