use crate::*;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("Node id is required")]
    MissingNodeId,

    #[error("{field} must be a positive integer")]
    InvalidPositiveInteger { field: String },

    #[error("{field} must be between 0 and 1, got {value}")]
    InvalidRatio { field: String, value: f64 },

    #[error("Storage: {message}")]
    InvalidStorage { message: String },

    #[error("Cache: {message}")]
    InvalidCache { message: String },

    #[error("Pair '{name}': {message}")]
    InvalidPair { name: String, message: String },

    #[error("Signer: {message}")]
    InvalidSigner { message: String },

    #[error("Invalid log format: {0}. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),

    #[error("Environment variable '{var}' is missing or invalid: {message}")]
    InvalidEnvVar { var: String, message: String },
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }
}

pub fn validate_config(config: &NodeConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    validate_node(&config.node, &mut report);
    validate_aggregator(&config.aggregator, &mut report);
    validate_fetcher(&config.fetcher, &mut report);
    validate_storage(&config.storage, &mut report);
    validate_cache(&config.cache, &mut report);
    validate_signer(&config.signer, &mut report);

    if !["pretty", "json", "compact"].contains(&config.logging.format.to_lowercase().as_str()) {
        report.add_error(ValidationError::InvalidLogFormat(config.logging.format.clone()));
    }

    report
}

fn require_positive(value: u64, field: &str, report: &mut ValidationReport) {
    if value == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: field.to_string(),
        });
    }
}

fn require_ratio(value: f64, field: &str, report: &mut ValidationReport) {
    if !(0.0..=1.0).contains(&value) {
        report.add_error(ValidationError::InvalidRatio {
            field: field.to_string(),
            value,
        });
    }
}

fn validate_node(node: &NodeSection, report: &mut ValidationReport) {
    if node.id.trim().is_empty() {
        report.add_error(ValidationError::MissingNodeId);
    } else if has_unresolved_env_vars(&node.id) {
        report.add_error(ValidationError::InvalidEnvVar {
            var: node.id.clone(),
            message: "node id is not resolved".to_string(),
        });
    }
    require_positive(node.bus_capacity as u64, "node.bus_capacity", report);
}

fn validate_aggregator(aggregator: &AggregatorConfig, report: &mut ValidationReport) {
    require_positive(
        aggregator.leader_job_interval_ms,
        "aggregator.leader_job_interval_ms",
        report,
    );
    require_positive(
        aggregator.bulk_insert_interval_ms,
        "aggregator.bulk_insert_interval_ms",
        report,
    );
    require_positive(aggregator.buffer_size as u64, "aggregator.buffer_size", report);

    if aggregator.round_retention < 1 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "aggregator.round_retention".to_string(),
        });
    }
}

fn validate_fetcher(fetcher: &FetcherConfig, report: &mut ValidationReport) {
    require_positive(
        fetcher.local_aggregate_interval_ms,
        "fetcher.local_aggregate_interval_ms",
        report,
    );
    require_positive(
        fetcher.bulk_insert_interval_ms,
        "fetcher.bulk_insert_interval_ms",
        report,
    );
    require_positive(fetcher.buffer_size as u64, "fetcher.buffer_size", report);
    require_positive(
        fetcher.cleanup_interval_seconds,
        "fetcher.cleanup_interval_seconds",
        report,
    );
    require_ratio(fetcher.median_ratio, "fetcher.median_ratio", report);
    require_ratio(
        fetcher.max_outlier_removal_ratio,
        "fetcher.max_outlier_removal_ratio",
        report,
    );

    if fetcher.fx_pairs.is_empty() {
        report.add_warning(
            "fetcher.fx_pairs",
            "no FX pairs configured, every pair uses the VWAP blend",
        );
    }
}

fn validate_storage(storage: &StorageConfig, report: &mut ValidationReport) {
    match storage.storage_type.as_str() {
        "memory" => {
            if storage.pairs.is_empty() {
                report.add_warning(
                    "storage.pairs",
                    "in-memory storage has no pairs, nothing will be aggregated",
                );
            }
        }
        "postgres" => match storage.postgres {
            Some(ref pg) => validate_postgres_config(pg, report),
            None => report.add_error(ValidationError::InvalidStorage {
                message: "Storage type is 'postgres' but postgres configuration is missing"
                    .to_string(),
            }),
        },
        other => report.add_error(ValidationError::InvalidStorage {
            message: format!("Invalid storage type '{}'. Must be one of: memory, postgres", other),
        }),
    }

    let mut config_ids = HashSet::new();
    let mut feed_ids = HashSet::new();
    for pair in &storage.pairs {
        if !config_ids.insert(pair.id) {
            report.add_error(ValidationError::InvalidPair {
                name: pair.name.clone(),
                message: format!("duplicate config id {}", pair.id),
            });
        }
        if pair.aggregate_interval <= 0 {
            report.add_error(ValidationError::InvalidPair {
                name: pair.name.clone(),
                message: "aggregate_interval must be a positive integer".to_string(),
            });
        }
        if pair.feeds.is_empty() {
            report.add_warning(&format!("storage.pairs.{}", pair.name), "pair has no feeds");
        }
        for feed in &pair.feeds {
            if !feed_ids.insert(feed.id) {
                report.add_error(ValidationError::InvalidPair {
                    name: pair.name.clone(),
                    message: format!("duplicate feed id {}", feed.id),
                });
            }
        }
    }
}

fn validate_postgres_config(pg: &PostgresConfig, report: &mut ValidationReport) {
    if pg.port == 0 {
        report.add_error(ValidationError::InvalidStorage {
            message: "port must be a positive integer".to_string(),
        });
    }

    if pg.max_connections == 0 {
        report.add_error(ValidationError::InvalidStorage {
            message: "max_connections must be a positive integer".to_string(),
        });
    }

    if has_unresolved_env_vars(&pg.password) {
        report.add_error(ValidationError::InvalidEnvVar {
            var: pg.password.clone(),
            message: "postgres password is not resolved".to_string(),
        });
    }
}

fn validate_cache(cache: &CacheConfig, report: &mut ValidationReport) {
    match cache.cache_type.as_str() {
        "memory" => {}
        "redis" => match cache.redis {
            Some(ref redis) if redis.port == 0 => report.add_error(ValidationError::InvalidCache {
                message: "redis port must be a positive integer".to_string(),
            }),
            Some(_) => {}
            None => report.add_error(ValidationError::InvalidCache {
                message: "Cache type is 'redis' but redis configuration is missing".to_string(),
            }),
        },
        other => report.add_error(ValidationError::InvalidCache {
            message: format!("Invalid cache type '{}'. Must be one of: memory, redis", other),
        }),
    }

    require_positive(cache.ttl_seconds, "cache.ttl_seconds", report);
}

fn validate_signer(signer: &SignerConfig, report: &mut ValidationReport) {
    if has_unresolved_env_vars(&signer.private_key) {
        report.add_error(ValidationError::InvalidEnvVar {
            var: signer.private_key.clone(),
            message: "signer key is not resolved".to_string(),
        });
        return;
    }

    let key = signer.private_key.trim_start_matches("0x");
    if key.is_empty() || key.len() % 2 != 0 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
        report.add_error(ValidationError::InvalidSigner {
            message: "private_key must be a non-empty hex string".to_string(),
        });
    } else if key.len() < 64 {
        report.add_warning("signer.private_key", "key is shorter than 32 bytes");
    }

    require_positive(
        signer.rotation_interval_seconds,
        "signer.rotation_interval_seconds",
        report,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> NodeConfig {
        let mut config = generate_default_config();
        config.signer.private_key = "ab".repeat(32);
        config
    }

    #[test]
    fn test_default_config_with_key_is_valid() {
        let report = validate_config(&valid_config());
        assert!(report.is_valid(), "errors: {:?}", report.errors);
    }

    #[test]
    fn test_unresolved_signer_key_is_rejected() {
        let report = validate_config(&generate_default_config());
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidEnvVar { .. })));
    }

    #[test]
    fn test_postgres_without_settings() {
        let mut config = valid_config();
        config.storage.storage_type = "postgres".to_string();
        let report = validate_config(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidStorage { .. })));
    }

    #[test]
    fn test_bad_ratio_and_zero_interval() {
        let mut config = valid_config();
        config.fetcher.median_ratio = 1.5;
        config.aggregator.bulk_insert_interval_ms = 0;
        let report = validate_config(&config);
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_duplicate_feed_ids() {
        let mut config = valid_config();
        let mut pair = config.storage.pairs[0].clone();
        pair.id = 2;
        pair.name = "ETH-USD".to_string();
        config.storage.pairs.push(pair);
        let report = validate_config(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidPair { .. })));
    }

    #[test]
    fn test_empty_fx_pairs_warns() {
        let mut config = valid_config();
        config.fetcher.fx_pairs.clear();
        let report = validate_config(&config);
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.field == "fetcher.fx_pairs"));
    }
}
