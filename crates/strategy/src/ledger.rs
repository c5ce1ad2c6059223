//! Position ledger and daily baseline.
//!
//! The ledger holds one snapshot of the account and open positions per
//! cycle. Account reads are retried a bounded number of times and then
//! degrade to zero balances so the loop keeps running.

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDate;
use common::{symbol_key, AccountState, Brokerage, Position};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::signal::PortfolioContext;

/// Bounded retry for account lookups.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

/// Account and positions as of the last refresh.
#[derive(Debug, Clone, Default)]
pub struct PositionLedger {
    account: AccountState,
    account_degraded: bool,
    positions: HashMap<String, Position>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh the account snapshot. Returns `false` when every attempt
    /// failed and the snapshot was replaced with zero balances.
    pub async fn refresh_account<B: Brokerage + ?Sized>(
        &mut self,
        broker: &B,
        retry: &RetryPolicy,
    ) -> bool {
        for attempt in 1..=retry.max_attempts {
            match broker.get_account().await {
                Ok(account) => {
                    self.account = account;
                    self.account_degraded = false;
                    return true;
                }
                Err(e) => {
                    if attempt == retry.max_attempts {
                        error!(
                            "Account lookup failed after {} attempts, continuing with zero balances: {}",
                            retry.max_attempts, e
                        );
                    } else {
                        warn!(
                            "Account lookup attempt {}/{} failed: {}",
                            attempt, retry.max_attempts, e
                        );
                        sleep(retry.backoff).await;
                    }
                }
            }
        }

        self.account = AccountState::default();
        self.account_degraded = true;
        false
    }

    /// Replace positions wholesale. A failed read leaves the ledger with no
    /// positions for this cycle.
    pub async fn refresh_positions<B: Brokerage + ?Sized>(&mut self, broker: &B) -> bool {
        match broker.list_positions().await {
            Ok(positions) => {
                self.replace_positions(positions);
                info!("Ledger: {} open positions", self.positions.len());
                true
            }
            Err(e) => {
                warn!("Position refresh failed, assuming no positions this cycle: {}", e);
                self.positions.clear();
                false
            }
        }
    }

    pub fn replace_positions(&mut self, positions: Vec<Position>) {
        self.positions = positions
            .into_iter()
            .filter(|p| p.quantity > 0.0)
            .map(|p| (symbol_key(&p.symbol), p))
            .collect();
    }

    pub fn account(&self) -> &AccountState {
        &self.account
    }

    pub fn is_degraded(&self) -> bool {
        self.account_degraded
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(&symbol_key(symbol))
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// Evaluator input for one symbol.
    pub fn context_for(&self, symbol: &str) -> PortfolioContext {
        match self.position(symbol) {
            Some(p) => PortfolioContext {
                cash: self.account.cash,
                has_position: true,
                held_quantity: p.whole_shares(),
                unrealized_pl: Some(p.unrealized_pl),
            },
            None => PortfolioContext {
                cash: self.account.cash,
                has_position: false,
                held_quantity: 0,
                unrealized_pl: None,
            },
        }
    }

    /// Open positions, best unrealized P/L first.
    pub fn positions_by_pl(&self) -> Vec<&Position> {
        let mut out: Vec<&Position> = self.positions.values().collect();
        out.sort_by(|a, b| {
            b.unrealized_pl
                .partial_cmp(&a.unrealized_pl)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        out
    }

    pub fn total_unrealized_pl(&self) -> f64 {
        self.positions.values().map(|p| p.unrealized_pl).sum()
    }
}

/// Equity at the first successful account read of a trading day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyBaseline {
    pub start_equity: f64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyProfit {
    pub profit: f64,
    /// `profit / start_equity`, 0 when there is no usable baseline.
    pub ratio: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BaselineTracker {
    current: Option<DailyBaseline>,
}

impl BaselineTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful account read. Latches a new baseline on the
    /// first read of each date and returns it.
    pub fn observe(&mut self, equity: f64, date: NaiveDate) -> Option<DailyBaseline> {
        if matches!(self.current, Some(b) if b.date == date) {
            return None;
        }
        let baseline = DailyBaseline {
            start_equity: equity,
            date,
        };
        if let Some(prev) = self.current {
            info!(
                "New trading day {}: baseline {:.2} (was {:.2} on {})",
                date, equity, prev.start_equity, prev.date
            );
        } else {
            info!("Daily baseline latched: {:.2} on {}", equity, date);
        }
        self.current = Some(baseline);
        Some(baseline)
    }

    pub fn current(&self) -> Option<DailyBaseline> {
        self.current
    }

    pub fn daily_profit(&self, equity: f64) -> DailyProfit {
        let Some(baseline) = self.current else {
            return DailyProfit {
                profit: 0.0,
                ratio: 0.0,
            };
        };
        let profit = equity - baseline.start_equity;
        let ratio = if baseline.start_equity > 0.0 {
            profit / baseline.start_equity
        } else {
            0.0
        };
        DailyProfit { profit, ratio }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{Error, OrderRequest, OrderResponse};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyBroker {
        failures_before_success: u32,
        calls: AtomicU32,
        positions: Option<Vec<Position>>,
    }

    #[async_trait]
    impl Brokerage for FlakyBroker {
        async fn get_account(&self) -> common::Result<AccountState> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                return Err(Error::Http("timeout".into()));
            }
            Ok(AccountState {
                cash: 5_000.0,
                equity: 12_000.0,
                buying_power: 10_000.0,
                portfolio_value: 12_000.0,
            })
        }

        async fn list_positions(&self) -> common::Result<Vec<Position>> {
            self.positions
                .clone()
                .ok_or_else(|| Error::AlpacaApi {
                    status: 500,
                    message: "internal".into(),
                })
        }

        async fn get_position(&self, _symbol: &str) -> common::Result<Option<Position>> {
            Ok(None)
        }

        async fn submit_order(&self, _order: &OrderRequest) -> common::Result<OrderResponse> {
            Err(Error::Other("not used".into()))
        }
    }

    fn position(symbol: &str, qty: f64, pl: f64) -> Position {
        Position {
            symbol: symbol.into(),
            quantity: qty,
            unrealized_pl: pl,
            market_value: qty * 100.0,
        }
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_account_retry_recovers() {
        let broker = FlakyBroker {
            failures_before_success: 3,
            calls: AtomicU32::new(0),
            positions: Some(Vec::new()),
        };
        let mut ledger = PositionLedger::new();
        assert!(ledger.refresh_account(&broker, &fast_retry(4)).await);
        assert_eq!(broker.calls.load(Ordering::SeqCst), 4);
        assert_eq!(ledger.account().cash, 5_000.0);
        assert!(!ledger.is_degraded());
    }

    #[tokio::test]
    async fn test_account_retry_exhaustion_degrades_to_zero() {
        let broker = FlakyBroker {
            failures_before_success: 10,
            calls: AtomicU32::new(0),
            positions: Some(Vec::new()),
        };
        let mut ledger = PositionLedger::new();
        assert!(!ledger.refresh_account(&broker, &fast_retry(4)).await);
        assert_eq!(broker.calls.load(Ordering::SeqCst), 4);
        assert_eq!(*ledger.account(), AccountState::default());
        assert!(ledger.is_degraded());
    }

    #[tokio::test]
    async fn test_position_refresh_failure_clears_positions() {
        let mut ledger = PositionLedger::new();
        ledger.replace_positions(vec![position("AAPL", 10.0, 1.0)]);

        let broker = FlakyBroker {
            failures_before_success: 0,
            calls: AtomicU32::new(0),
            positions: None,
        };
        assert!(!ledger.refresh_positions(&broker).await);
        assert_eq!(ledger.position_count(), 0);
    }

    #[test]
    fn test_context_matches_crypto_symbols_without_slash() {
        let mut ledger = PositionLedger::new();
        ledger.replace_positions(vec![
            position("BTCUSD", 0.4, 12.0),
            position("AAPL", 50.0, -3.0),
            position("ZERO", 0.0, 0.0),
        ]);

        let btc = ledger.context_for("BTC/USD");
        assert!(btc.has_position);
        assert_eq!(btc.held_quantity, 0);

        let aapl = ledger.context_for("AAPL");
        assert_eq!(aapl.held_quantity, 50);
        assert_eq!(aapl.unrealized_pl, Some(-3.0));

        assert!(!ledger.context_for("ZERO").has_position);
    }

    #[test]
    fn test_positions_sorted_by_unrealized_pl() {
        let mut ledger = PositionLedger::new();
        ledger.replace_positions(vec![
            position("A", 1.0, -5.0),
            position("B", 1.0, 20.0),
            position("C", 1.0, 3.5),
        ]);
        let order: Vec<&str> = ledger
            .positions_by_pl()
            .iter()
            .map(|p| p.symbol.as_str())
            .collect();
        assert_eq!(order, vec!["B", "C", "A"]);
        assert_eq!(ledger.total_unrealized_pl(), 18.5);
    }

    #[test]
    fn test_baseline_latches_once_per_day() {
        let day1 = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let mut tracker = BaselineTracker::new();

        assert!(tracker.observe(10_000.0, day1).is_some());
        assert!(tracker.observe(10_400.0, day1).is_none());
        assert_eq!(tracker.current().unwrap().start_equity, 10_000.0);

        let p = tracker.daily_profit(10_100.0);
        assert_eq!(p.profit, 100.0);
        assert!((p.ratio - 0.01).abs() < 1e-12);

        assert!(tracker.observe(10_400.0, day2).is_some());
        assert_eq!(tracker.current().unwrap().start_equity, 10_400.0);
    }

    #[test]
    fn test_profit_ratio_zero_without_baseline_equity() {
        let mut tracker = BaselineTracker::new();
        assert_eq!(tracker.daily_profit(500.0).ratio, 0.0);

        tracker.observe(0.0, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        let p = tracker.daily_profit(500.0);
        assert_eq!(p.profit, 500.0);
        assert_eq!(p.ratio, 0.0);
    }
}
