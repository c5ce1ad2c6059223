//! Domain types shared across the bot.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ── Decimal helpers ───────────────────────────────────────────────────

/// Alpaca encodes money and quantities as decimal strings; accept both forms.
pub fn de_decimal<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
        Null(()),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(v) => Ok(v),
        Raw::Str(s) if s.trim().is_empty() => Ok(0.0),
        Raw::Str(s) => s.trim().parse::<f64>().map_err(serde::de::Error::custom),
        Raw::Null(()) => Ok(0.0),
    }
}

/// Position lookups ignore the slash in crypto pairs (`BTC/USD` vs `BTCUSD`).
pub fn symbol_key(symbol: &str) -> String {
    symbol.replace('/', "").to_ascii_uppercase()
}

// ── Market Data Types ─────────────────────────────────────────────────

/// One OHLCV sample as returned by the bars endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,
    #[serde(rename = "v")]
    pub volume: f64,
}

/// Paginated response from GET /v2/stocks/bars (and the crypto equivalent).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BarsResponse {
    #[serde(default)]
    pub bars: Option<HashMap<String, Vec<RawBar>>>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Equity,
    Crypto,
}

impl AssetClass {
    /// Crypto pairs are written `BASE/QUOTE`; everything else is an equity.
    pub fn of_symbol(symbol: &str) -> Self {
        if symbol.contains('/') {
            AssetClass::Crypto
        } else {
            AssetClass::Equity
        }
    }
}

/// A multi-symbol bars query.
#[derive(Debug, Clone)]
pub struct BarsRequest {
    pub asset_class: AssetClass,
    pub symbols: Vec<String>,
    /// Alpaca timeframe string, e.g. `1Min`, `15Min`, `1Day`.
    pub timeframe: String,
    pub limit: u32,
}

// ── Account Types ─────────────────────────────────────────────────────

/// Account balances, refreshed once per cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    #[serde(deserialize_with = "de_decimal", default)]
    pub cash: f64,
    #[serde(deserialize_with = "de_decimal", default)]
    pub equity: f64,
    #[serde(deserialize_with = "de_decimal", default)]
    pub buying_power: f64,
    #[serde(deserialize_with = "de_decimal", default)]
    pub portfolio_value: f64,
}

/// An open position as reported by GET /v2/positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    #[serde(rename = "qty", deserialize_with = "de_decimal")]
    pub quantity: f64,
    #[serde(deserialize_with = "de_decimal", default)]
    pub unrealized_pl: f64,
    #[serde(deserialize_with = "de_decimal", default)]
    pub market_value: f64,
}

impl Position {
    /// Whole shares held; fractional remainders are not traded.
    pub fn whole_shares(&self) -> i64 {
        self.quantity.max(0.0).floor() as i64
    }
}

// ── Decision Types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn label(self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
            Action::Hold => "hold",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Output of the signal evaluator for one symbol in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub symbol: String,
    pub action: Action,
    pub quantity: i64,
    /// Reason for the decision (for logging).
    pub reason: String,
}

impl Decision {
    pub fn hold(symbol: &str, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            action: Action::Hold,
            quantity: 0,
            reason: reason.into(),
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.action != Action::Hold && self.quantity > 0
    }
}

// ── Order Types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    Gtc,
}

/// Order request body for POST /v2/orders.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub qty: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub client_order_id: String,
}

impl OrderRequest {
    /// Market order, good-until-canceled. The only order shape this bot sends.
    pub fn market_gtc(symbol: &str, side: OrderSide, quantity: i64, client_order_id: String) -> Self {
        Self {
            symbol: symbol.to_string(),
            qty: quantity.to_string(),
            side,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Gtc,
            client_order_id,
        }
    }
}

/// Response from POST /v2/orders.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    #[serde(default)]
    pub client_order_id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub status: String,
}
