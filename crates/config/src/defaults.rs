pub fn default_enabled() -> bool {
    true
}

pub fn default_service_name() -> String {
    "oracled".to_string()
}

pub fn default_bus_capacity() -> usize {
    1000
}

pub fn default_leader_job_interval_ms() -> u64 {
    400
}

pub fn default_bulk_insert_interval_ms() -> u64 {
    1000
}

pub fn default_aggregator_buffer_size() -> usize {
    2000
}

pub fn default_round_retention() -> i64 {
    10
}

pub fn default_start_stagger_ms() -> u64 {
    200
}

pub fn default_start_jitter_ms() -> u64 {
    100
}

pub fn default_local_aggregate_interval_ms() -> u64 {
    400
}

pub fn default_median_ratio() -> f64 {
    0.05
}

pub fn default_max_outlier_removal_ratio() -> f64 {
    0.2
}

pub fn default_fx_pairs() -> Vec<String> {
    ["GBP-USD", "EUR-USD", "KRW-USD", "JPY-USD", "CHF-USD"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

pub fn default_fetcher_buffer_size() -> usize {
    1000
}

pub fn default_cleanup_interval_seconds() -> u64 {
    3600
}

pub fn default_max_feed_data_age_seconds() -> u64 {
    86400
}

pub fn default_storage_type() -> String {
    "memory".to_string()
}

pub fn default_postgres_port() -> u16 {
    5432
}

pub fn default_ssl_mode() -> String {
    "prefer".to_string()
}

pub fn default_max_connections() -> u32 {
    20
}

pub fn default_redis_port() -> u16 {
    6379
}

pub fn default_ttl_seconds() -> u64 {
    300
}

pub fn default_rotation_interval_seconds() -> u64 {
    604800
}

pub fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn default_metrics_port() -> u16 {
    9090
}
