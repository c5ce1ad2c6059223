//! Brokerage seams.
//!
//! The REST client implements both traits; components take them as explicit
//! parameters so tests can substitute in-memory doubles.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::{AccountState, BarsRequest, OrderRequest, OrderResponse, Position, RawBar, Result};

/// Market-data feed: one bulk bars request for many symbols.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Fetch bars keyed by symbol, ascending by timestamp. Symbols without
    /// data are simply absent from the map.
    async fn fetch_bars(&self, request: &BarsRequest) -> Result<HashMap<String, Vec<RawBar>>>;
}

/// Account, position and order endpoints.
#[async_trait]
pub trait Brokerage: Send + Sync {
    async fn get_account(&self) -> Result<AccountState>;

    async fn list_positions(&self) -> Result<Vec<Position>>;

    /// Authoritative single-symbol lookup. `Ok(None)` when nothing is held.
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>>;

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResponse>;
}
