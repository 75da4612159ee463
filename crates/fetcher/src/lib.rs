//! Local price aggregation for the oracle node
//!
//! This crate turns raw feed observations into one local value per pair.
//!
//! # Core Components
//!
//! - [`feed_data`] - Latest observation per feed
//! - [`price`] - Staleness filter, outlier rejection, median, VWAP and blend
//! - [`local_aggregator`] - Per-pair tick producing local aggregates
//! - [`bulk_writer`] - Batched persistence of local aggregates
//! - [`app`] - Lifecycle of all of the above
//!
//! # Key Invariants
//!
//! - The staleness filter never empties a non-empty observation set
//! - A zero result is never published
//! - A produced aggregate is queued for persistence even if the bus rejects it

pub mod app;
pub mod bulk_writer;
pub mod error;
pub mod feed_data;
pub mod local_aggregator;
pub mod price;

pub use app::FetcherApp;
pub use bulk_writer::LocalAggregateBulkWriter;
pub use error::FetcherError;
pub use feed_data::LatestFeedDataMap;
pub use local_aggregator::{AggregationSettings, LocalAggregator};

pub type Result<T> = std::result::Result<T, FetcherError>;
