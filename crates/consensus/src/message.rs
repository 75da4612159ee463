//! Gossip wire envelope
//!
//! Every message on a pair topic is `{"type", "sentFrom", "data"}` where
//! `data` is a JSON encoded [`RoundSyncMessage`] or [`PriceDataMessage`].

use crate::error::ConsensusResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    RoundSync,
    PriceData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub sent_from: String,
    pub data: serde_json::Value,
}

impl Message {
    pub fn new<T: Serialize>(
        message_type: MessageType,
        sent_from: &str,
        payload: &T,
    ) -> ConsensusResult<Self> {
        Ok(Self {
            message_type,
            sent_from: sent_from.to_string(),
            data: serde_json::to_value(payload)?,
        })
    }

    pub fn round_sync(sent_from: &str, payload: &RoundSyncMessage) -> ConsensusResult<Self> {
        Self::new(MessageType::RoundSync, sent_from, payload)
    }

    pub fn price_data(sent_from: &str, payload: &PriceDataMessage) -> ConsensusResult<Self> {
        Self::new(MessageType::PriceData, sent_from, payload)
    }

    /// Decode the payload
    pub fn decode<T: DeserializeOwned>(&self) -> ConsensusResult<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    pub fn to_bytes(&self) -> ConsensusResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> ConsensusResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Leader announcement opening a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSyncMessage {
    pub leader_id: String,
    pub round_id: i64,
}

/// A node's report for one round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceDataMessage {
    pub round_id: i64,
    pub value: i64,
}
