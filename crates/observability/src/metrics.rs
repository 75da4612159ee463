//! Prometheus metrics for the aggregation pipeline
//!
//! Metric handles are created once per component and cloned into tasks.
//! Without an installed recorder every handle is a no-op, so tests never
//! need to set one up.

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Start the Prometheus exporter, serving `/metrics` on `port`
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    tracing::info!(%addr, "Metrics server listening");
    Ok(())
}

/// Per-pair metrics of an aggregator node
///
/// * `oracle_rounds_finalized_total` - rounds that produced a GlobalAggregate
/// * `oracle_rounds_empty_total` - rounds that reached quorum with only sentinels
/// * `oracle_finalize_failures_total` - rounds whose signing or publishing failed
/// * `oracle_round_id` - latest round seen by the node
#[derive(Clone)]
pub struct AggregatorMetrics {
    rounds_finalized: Counter,
    rounds_empty: Counter,
    finalize_failures: Counter,
    round_id: Gauge,
}

impl AggregatorMetrics {
    pub fn new(pair: &str) -> Self {
        let pair = pair.to_string();
        Self {
            rounds_finalized: counter!("oracle_rounds_finalized_total", "pair" => pair.clone()),
            rounds_empty: counter!("oracle_rounds_empty_total", "pair" => pair.clone()),
            finalize_failures: counter!("oracle_finalize_failures_total", "pair" => pair.clone()),
            round_id: gauge!("oracle_round_id", "pair" => pair),
        }
    }

    pub fn round_finalized(&self) {
        self.rounds_finalized.increment(1);
    }

    pub fn round_empty(&self) {
        self.rounds_empty.increment(1);
    }

    pub fn finalize_failed(&self) {
        self.finalize_failures.increment(1);
    }

    pub fn set_round(&self, round: i64) {
        self.round_id.set(round as f64);
    }
}

/// Metrics of a bulk writer, labelled by target (`global` or `local`)
#[derive(Clone)]
pub struct BulkWriterMetrics {
    rows_flushed: Counter,
    flush_failures: Counter,
    batch_size: Histogram,
}

impl BulkWriterMetrics {
    pub fn new(target: &str) -> Self {
        let target = target.to_string();
        Self {
            rows_flushed: counter!("oracle_bulk_rows_flushed_total", "target" => target.clone()),
            flush_failures: counter!("oracle_bulk_flush_failures_total", "target" => target.clone()),
            batch_size: histogram!("oracle_bulk_batch_size", "target" => target),
        }
    }

    pub fn record_flush(&self, rows: usize) {
        self.rows_flushed.increment(rows as u64);
        self.batch_size.record(rows as f64);
    }

    pub fn flush_failed(&self) {
        self.flush_failures.increment(1);
    }
}

/// Per-pair metrics of a local aggregator
#[derive(Clone)]
pub struct LocalAggregatorMetrics {
    produced: Counter,
    skipped: Counter,
    publish_failures: Counter,
}

impl LocalAggregatorMetrics {
    pub fn new(pair: &str) -> Self {
        let pair = pair.to_string();
        Self {
            produced: counter!("oracle_local_aggregates_total", "pair" => pair.clone()),
            skipped: counter!("oracle_local_ticks_skipped_total", "pair" => pair.clone()),
            publish_failures: counter!("oracle_local_publish_failures_total", "pair" => pair),
        }
    }

    pub fn produced(&self) {
        self.produced.increment(1);
    }

    pub fn skipped(&self) {
        self.skipped.increment(1);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_work_without_recorder() {
        let aggregator = AggregatorMetrics::new("BTC-USD");
        aggregator.round_finalized();
        aggregator.set_round(5);

        let writer = BulkWriterMetrics::new("global");
        writer.record_flush(3);
        writer.flush_failed();

        LocalAggregatorMetrics::new("BTC-USD").produced();
    }
}
