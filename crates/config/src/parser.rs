use crate::*;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

#[instrument(skip(path))]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<NodeConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    debug!("Config file content length: {} bytes", content.len());
    parse_config(&content)
}

/// Substitute environment variables and parse YAML content
pub fn parse_config(content: &str) -> Result<NodeConfig> {
    let substituted = substitution::substitute_env_vars(content)?;
    debug!("Environment variable substitution completed");

    let config: NodeConfig = serde_yaml::from_str(&substituted)
        .with_context(|| "Failed to parse YAML configuration")?;

    info!(node_id = %config.node.id, "Configuration loaded successfully");
    Ok(config)
}

#[instrument]
pub fn generate_default_config() -> NodeConfig {
    NodeConfig {
        node: NodeSection {
            id: "oracle-node-1".to_string(),
            service_name: default_service_name(),
            bus_capacity: default_bus_capacity(),
        },
        aggregator: AggregatorConfig::default(),
        fetcher: FetcherConfig::default(),
        storage: StorageConfig {
            pairs: vec![PairSeed {
                id: 1,
                name: "BTC-USD".to_string(),
                fetch_interval: 2000,
                aggregate_interval: 5000,
                submit_interval: 15000,
                feed_data_freshness: Some(60000),
                feeds: vec![FeedSeed {
                    id: 1,
                    name: "binance-BTC-USD".to_string(),
                    definition: serde_json::json!({ "type": "wss" }),
                }],
            }],
            ..StorageConfig::default()
        },
        cache: CacheConfig::default(),
        signer: SignerConfig {
            private_key: "${ORACLE_SIGNER_KEY}".to_string(),
            rotation_interval_seconds: default_rotation_interval_seconds(),
        },
        logging: LoggingConfig::default(),
        metrics: MetricsConfig::default(),
    }
}

#[instrument(skip(config))]
pub fn save_config<P: AsRef<Path> + std::fmt::Debug>(config: &NodeConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    info!("Saving configuration to: {:?}", path);

    let yaml = serde_yaml::to_string(config)
        .with_context(|| "Failed to serialize configuration to YAML")?;

    fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))?;

    info!("Configuration saved successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_yaml() {
        let yaml = serde_yaml::to_string(&generate_default_config()).unwrap();
        let parsed: NodeConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.node.id, "oracle-node-1");
        assert_eq!(parsed.storage.pairs[0].feeds[0].name, "binance-BTC-USD");
        assert_eq!(parsed.signer.private_key, "${ORACLE_SIGNER_KEY}");
    }

    #[test]
    fn test_parse_config_substitutes_env() {
        std::env::set_var("ORACLE_TEST_NODE_ID", "node-from-env");
        let yaml = r#"
node:
  id: ${ORACLE_TEST_NODE_ID}
signer:
  private_key: "abcd"
"#;
        let cfg = parse_config(yaml).unwrap();
        assert_eq!(cfg.node.id, "node-from-env");
    }
}
