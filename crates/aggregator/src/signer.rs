//! Proof signing
//!
//! A proof attests to `(value, timestamp, pair name)`. [`HmacSigner`] signs
//! `"{value}|{timestamp_ms}|{name}"` with HMAC-SHA256 and rotates its key by
//! hashing it once the rotation interval has elapsed.

use crate::error::SignerError;
use chrono::{DateTime, Utc};
use config::SignerConfig;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::info;

type HmacSha256 = Hmac<Sha256>;

#[cfg_attr(test, mockall::automock)]
pub trait Signer: Send + Sync {
    fn sign(&self, value: i64, timestamp: DateTime<Utc>, name: &str) -> Result<Vec<u8>, SignerError>;

    /// Replace the key if it has outlived the rotation interval
    fn rotate_if_needed(&self) -> Result<(), SignerError>;
}

/// Canonical byte string covered by a proof
pub fn signing_payload(value: i64, timestamp: DateTime<Utc>, name: &str) -> String {
    format!("{}|{}|{}", value, timestamp.timestamp_millis(), name)
}

struct KeyState {
    key: Vec<u8>,
    issued_at: DateTime<Utc>,
}

pub struct HmacSigner {
    state: RwLock<KeyState>,
    rotation_interval: chrono::Duration,
}

impl HmacSigner {
    pub fn new(key: Vec<u8>, rotation_interval: Duration) -> Result<Self, SignerError> {
        if key.is_empty() {
            return Err(SignerError::InvalidKey("key is empty".to_string()));
        }
        let rotation_interval = chrono::Duration::from_std(rotation_interval)
            .map_err(|e| SignerError::InvalidKey(format!("rotation interval: {e}")))?;
        Ok(Self {
            state: RwLock::new(KeyState {
                key,
                issued_at: Utc::now(),
            }),
            rotation_interval,
        })
    }

    pub fn from_config(config: &SignerConfig) -> Result<Self, SignerError> {
        let key = hex::decode(config.private_key.trim_start_matches("0x"))
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Self::new(key, Duration::from_secs(config.rotation_interval_seconds))
    }

    pub fn verify(&self, value: i64, timestamp: DateTime<Utc>, name: &str, proof: &[u8]) -> bool {
        let state = self.state.read();
        let Ok(mut mac) = HmacSha256::new_from_slice(&state.key) else {
            return false;
        };
        mac.update(signing_payload(value, timestamp, name).as_bytes());
        mac.verify_slice(proof).is_ok()
    }

    /// Rotate when `now` is past the key's lifetime. Returns whether it rotated.
    pub fn rotate_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.write();
        if now - state.issued_at < self.rotation_interval {
            return false;
        }
        state.key = Sha256::digest(&state.key).to_vec();
        state.issued_at = now;
        true
    }
}

impl Signer for HmacSigner {
    fn sign(&self, value: i64, timestamp: DateTime<Utc>, name: &str) -> Result<Vec<u8>, SignerError> {
        let state = self.state.read();
        let mut mac = HmacSha256::new_from_slice(&state.key)
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        mac.update(signing_payload(value, timestamp, name).as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn rotate_if_needed(&self) -> Result<(), SignerError> {
        if self.rotate_at(Utc::now()) {
            info!("Signer key rotated");
        }
        Ok(())
    }
}
