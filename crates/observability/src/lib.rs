//! Observability infrastructure for the oracle node
//!
//! This crate provides:
//! - Structured logging via tracing
//! - Prometheus metrics
//! - Metric sets for the aggregation pipeline
//!
//! # Quick Start
//!
//! ```ignore
//! use observability::{init_logging, LogFormat};
//!
//! init_logging("oracled", LogFormat::Pretty)?;
//! observability::metrics::init_metrics(9090)?;
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{init_metrics, AggregatorMetrics, BulkWriterMetrics, LocalAggregatorMetrics};
