//! Common types used across the oracle node
//!
//! These are the rows and messages that flow between the fetcher, the
//! aggregator and storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a tracked trading pair configuration
pub type ConfigId = i32;

/// Identifier of a single feed
pub type FeedId = i32;

/// Reported in a round when a node has no new local data.
pub const SENTINEL_VALUE: i64 = -1;

/// One tracked trading pair and its timing parameters.
///
/// Intervals are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub id: ConfigId,
    pub name: String,
    pub fetch_interval: i32,
    pub aggregate_interval: i32,
    pub submit_interval: i32,
    #[serde(default)]
    pub feed_data_freshness: Option<i32>,
}

impl Config {
    /// Gossip topic shared by every node aggregating this pair
    pub fn topic(&self) -> String {
        format!("{}-global-aggregator-topic-{}", self.name, self.aggregate_interval)
    }
}

/// A single price source belonging to one Config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    pub id: FeedId,
    pub name: String,
    pub definition: serde_json::Value,
    pub config_id: ConfigId,
}

/// Latest normalized observation for one feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedData {
    pub feed_id: FeedId,
    pub value: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One node's summarized price for a Config at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalAggregate {
    pub config_id: ConfigId,
    pub value: i64,
    pub timestamp: DateTime<Utc>,
}

/// Finalized consensus value for one round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalAggregate {
    pub config_id: ConfigId,
    pub value: i64,
    pub round: i64,
    pub timestamp: DateTime<Utc>,
}

/// Signature over a GlobalAggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    pub config_id: ConfigId,
    pub round: i64,
    pub proof: Vec<u8>,
}

/// Unit streamed from an aggregator node to the bulk writer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionData {
    pub global_aggregate: GlobalAggregate,
    pub proof: Proof,
}
