//! Strategy crate.
//!
//! Bar storage, signal evaluation, the position ledger and the trading
//! window. Nothing here submits orders.

pub mod bars;
pub mod ledger;
pub mod market_hours;
pub mod signal;

pub use bars::{Bar, BarSeries, BarStore};
pub use ledger::{BaselineTracker, DailyBaseline, DailyProfit, PositionLedger, RetryPolicy};
pub use market_hours::MarketHours;
pub use signal::{PortfolioContext, SignalEvaluator};
