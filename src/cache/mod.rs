//! Cache layer shared by all retrieval calls
//!
//! Holds two kinds of data:
//! - query embeddings keyed by content hash (write-once, safe to overwrite)
//! - per-owner rate-limit counters (atomic increment-with-expiry)
//!
//! [`CacheLayer`] is the seam for an external store such as Redis;
//! [`InMemoryCache`] is the in-process implementation.

mod memory;
mod rate_limit;

pub use memory::{CacheStats, InMemoryCache};
pub use rate_limit::{RateLimitDecision, RateLimiter};

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Key/value store with TTL and atomic counters
#[async_trait]
pub trait CacheLayer: Send + Sync {
    /// Fetch a live value
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value, replacing any existing one
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Fetch several keys at once, in order; missing or expired keys are `None`
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await?);
        }
        Ok(out)
    }

    /// Atomically increment a counter and return the new count.
    ///
    /// A missing or expired key starts at 1 and expires after `ttl`;
    /// incrementing a live key keeps its original expiry.
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64>;
}

/// Encode a counter the way `increment_with_expiry` stores it
pub fn encode_counter(count: u64) -> Vec<u8> {
    count.to_le_bytes().to_vec()
}

/// Decode a counter value; anything malformed reads as zero
pub fn decode_counter(bytes: &[u8]) -> u64 {
    bytes
        .try_into()
        .map(u64::from_le_bytes)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_codec() {
        assert_eq!(decode_counter(&encode_counter(42)), 42);
        assert_eq!(decode_counter(b"bad"), 0);
        assert_eq!(decode_counter(&[]), 0);
    }
}
