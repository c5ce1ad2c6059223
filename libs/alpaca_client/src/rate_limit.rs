//! Rate limiter for Alpaca API.
//!
//! Trading API allows 200 requests/min per account; the data API is metered
//! separately, so each gets its own bucket.

use governor::{Quota, RateLimiter as GovLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectLimiter = GovLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Dual rate limiter: separate buckets for trading and market-data calls.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    trading_limiter: Arc<DirectLimiter>,
    data_limiter: Arc<DirectLimiter>,
}

impl RateLimiter {
    /// Create with Alpaca free-tier limits.
    pub fn new() -> Self {
        Self::with_limits(200, 200)
    }

    /// Create with custom per-minute limits. Zero is clamped to one.
    pub fn with_limits(trading_per_min: u32, data_per_min: u32) -> Self {
        let trading_quota =
            Quota::per_minute(NonZeroU32::new(trading_per_min).unwrap_or(NonZeroU32::MIN));
        let data_quota = Quota::per_minute(NonZeroU32::new(data_per_min).unwrap_or(NonZeroU32::MIN));

        Self {
            trading_limiter: Arc::new(GovLimiter::direct(trading_quota)),
            data_limiter: Arc::new(GovLimiter::direct(data_quota)),
        }
    }

    /// Wait until a trading slot is available.
    pub async fn wait_trading(&self) {
        self.trading_limiter.until_ready().await;
    }

    /// Wait until a market-data slot is available.
    pub async fn wait_data(&self) {
        self.data_limiter.until_ready().await;
    }

    /// Try to acquire a trading slot without waiting. Returns true if acquired.
    pub fn try_trading(&self) -> bool {
        self.trading_limiter.check().is_ok()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
