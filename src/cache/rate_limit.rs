//! Per-owner rate limiting over the cache layer
//!
//! The window is split into [`SLOTS_PER_WINDOW`] fixed slots. A request
//! increments its own slot with one atomic `increment_with_expiry`, then
//! reads every slot that overlaps the rolling window ending now and sums
//! them. A slot is counted as long as any part of it lies inside the window,
//! so the sum never undercounts requests made in the last `window`.
//!
//! Concurrent requests in the same slot each see their own increment and
//! every earlier one, so at most `limit` of them can be allowed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use super::{decode_counter, CacheLayer};
use crate::error::Result;
use crate::types::OwnerScope;

/// Number of slots a window is divided into
pub const SLOTS_PER_WINDOW: i64 = 60;

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RateLimitDecision {
    Allowed { count: u64 },
    Limited { count: u64, retry_after_ms: u64 },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

/// Rolling-window request limiter keyed by owner
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn CacheLayer>,
    limit: u64,
    window_ms: i64,
    slot_ms: i64,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn CacheLayer>, limit: u64, window: Duration) -> Self {
        let window_ms = (window.as_millis() as i64).max(1);
        Self {
            cache,
            limit,
            window_ms,
            slot_ms: (window_ms / SLOTS_PER_WINDOW).max(1),
        }
    }

    fn slot_key(owner: &OwnerScope, slot: i64) -> String {
        format!("rl:{}:{}", owner.as_str(), slot)
    }

    /// Count this request against `owner` and decide whether it may proceed
    pub async fn check(&self, owner: &OwnerScope) -> Result<RateLimitDecision> {
        self.check_at(owner, Utc::now().timestamp_millis()).await
    }

    /// [`check`](Self::check) at an explicit wall-clock time in epoch millis
    pub async fn check_at(&self, owner: &OwnerScope, now_ms: i64) -> Result<RateLimitDecision> {
        let current = now_ms.div_euclid(self.slot_ms);
        // Oldest slot that still overlaps (now - window, now]
        let oldest = (now_ms - self.window_ms).div_euclid(self.slot_ms);

        // Slots must live until they fall out of every window that overlaps them
        let ttl = Duration::from_millis((self.window_ms + 2 * self.slot_ms) as u64);
        let own = self
            .cache
            .increment_with_expiry(&Self::slot_key(owner, current), ttl)
            .await?;

        let keys: Vec<String> = (oldest..current)
            .map(|slot| Self::slot_key(owner, slot))
            .collect();
        let earlier: Vec<u64> = self
            .cache
            .get_many(&keys)
            .await?
            .iter()
            .map(|raw| raw.as_deref().map_or(0, decode_counter))
            .collect();

        let count = own + earlier.iter().sum::<u64>();
        if count <= self.limit {
            return Ok(RateLimitDecision::Allowed { count });
        }

        tracing::debug!(owner = %owner, count, limit = self.limit, "rate limit exceeded");
        Ok(RateLimitDecision::Limited {
            count,
            retry_after_ms: self.retry_after_ms(now_ms, oldest, &earlier, own, count),
        })
    }

    /// Time until enough slots expire for one more request to fit
    fn retry_after_ms(&self, now_ms: i64, oldest: i64, earlier: &[u64], own: u64, count: u64) -> u64 {
        // The next request adds one, so `count - limit + 1` must age out
        let needed = (count + 1).saturating_sub(self.limit);
        let mut dropped = 0;
        let slots = earlier.iter().copied().chain(std::iter::once(own));
        for (offset, slot_count) in slots.enumerate() {
            dropped += slot_count;
            if dropped >= needed {
                let slot = oldest + offset as i64;
                let leaves_at = (slot + 1) * self.slot_ms + self.window_ms;
                return (leaves_at - now_ms).max(1) as u64;
            }
        }
        // A zero limit never admits anything
        self.window_ms as u64
    }
}
