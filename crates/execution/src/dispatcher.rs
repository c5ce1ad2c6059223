//! Order dispatcher.
//!
//! Turns a decision into a market order after re-checking the live
//! position with the broker. Re-check and submit for a symbol run under a
//! per-symbol lock so two callers cannot both pass the check.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use common::{Action, Brokerage, OrderRequest, OrderSide};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::AuditLog;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Hold or non-positive quantity; nothing was sent.
    Skipped,
    /// The live position check contradicted the action.
    Suppressed,
    Submitted { order_id: String },
    DryRun,
    Failed { reason: String },
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Skipped => "skipped",
            DispatchOutcome::Suppressed => "suppressed",
            DispatchOutcome::Submitted { .. } => "submitted",
            DispatchOutcome::DryRun => "dry_run",
            DispatchOutcome::Failed { .. } => "failed",
        }
    }
}

pub struct OrderDispatcher<B: Brokerage + ?Sized> {
    broker: Arc<B>,
    audit: AuditLog,
    dry_run: bool,
    symbol_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<B: Brokerage + ?Sized> OrderDispatcher<B> {
    pub fn new(broker: Arc<B>, audit: AuditLog, dry_run: bool) -> Self {
        Self {
            broker,
            audit,
            dry_run,
            symbol_locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, symbol: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.symbol_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(common::symbol_key(symbol))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub async fn submit(&self, symbol: &str, action: Action, quantity: i64) -> DispatchOutcome {
        let side = match action {
            Action::Buy => OrderSide::Buy,
            Action::Sell => OrderSide::Sell,
            Action::Hold => return DispatchOutcome::Skipped,
        };
        if quantity <= 0 {
            return DispatchOutcome::Skipped;
        }

        let lock = self.lock_for(symbol);
        let _guard = lock.lock().await;

        let has_position = match self.broker.get_position(symbol).await {
            Ok(pos) => pos.map(|p| p.quantity > 0.0).unwrap_or(false),
            Err(e) => {
                warn!("{}: position re-check failed, not sending {} order: {}", symbol, action, e);
                return DispatchOutcome::Failed {
                    reason: format!("position re-check failed: {}", e),
                };
            }
        };

        match (action, has_position) {
            (Action::Buy, true) | (Action::Sell, false) => return DispatchOutcome::Suppressed,
            _ => {}
        }

        if self.dry_run {
            info!("[DRY RUN] would {} {} x{}", action, symbol, quantity);
            return DispatchOutcome::DryRun;
        }

        let order = OrderRequest::market_gtc(symbol, side, quantity, Uuid::new_v4().to_string());
        match self.broker.submit_order(&order).await {
            Ok(resp) => {
                info!(
                    "Order submitted: {} {} x{} id={} status={}",
                    action, symbol, quantity, resp.id, resp.status
                );
                if let Err(e) = self.audit.append(Utc::now(), symbol, action) {
                    error!(
                        "{}: order {} submitted but audit append to {} failed: {}",
                        symbol,
                        resp.id,
                        self.audit.path().display(),
                        e
                    );
                }
                DispatchOutcome::Submitted { order_id: resp.id }
            }
            Err(e) => {
                error!("Order failed for {} ({} x{}): {}", symbol, action, quantity, e);
                DispatchOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{AccountState, Error, OrderResponse, Position};
    use std::path::Path;

    #[derive(Default)]
    struct FakeBroker {
        positions: Mutex<HashMap<String, f64>>,
        orders: Mutex<Vec<OrderRequest>>,
        position_checks: Mutex<u32>,
        fail_recheck: bool,
        reject_orders: bool,
    }

    impl FakeBroker {
        fn holding(symbol: &str, qty: f64) -> Self {
            let broker = Self::default();
            broker
                .positions
                .lock()
                .unwrap()
                .insert(common::symbol_key(symbol), qty);
            broker
        }
    }

    #[async_trait]
    impl Brokerage for FakeBroker {
        async fn get_account(&self) -> common::Result<AccountState> {
            Ok(AccountState::default())
        }

        async fn list_positions(&self) -> common::Result<Vec<Position>> {
            Ok(Vec::new())
        }

        async fn get_position(&self, symbol: &str) -> common::Result<Option<Position>> {
            *self.position_checks.lock().unwrap() += 1;
            if self.fail_recheck {
                return Err(Error::Http("connection refused".into()));
            }
            // Fills land immediately so a second buy sees the position.
            Ok(self
                .positions
                .lock()
                .unwrap()
                .get(&common::symbol_key(symbol))
                .map(|qty| Position {
                    symbol: common::symbol_key(symbol),
                    quantity: *qty,
                    unrealized_pl: 0.0,
                    market_value: 0.0,
                }))
        }

        async fn submit_order(&self, order: &OrderRequest) -> common::Result<OrderResponse> {
            if self.reject_orders {
                return Err(Error::AlpacaApi {
                    status: 403,
                    message: "insufficient buying power".into(),
                });
            }
            self.orders.lock().unwrap().push(order.clone());
            if order.side == OrderSide::Buy {
                self.positions
                    .lock()
                    .unwrap()
                    .insert(common::symbol_key(&order.symbol), 1.0);
            }
            Ok(OrderResponse {
                id: format!("ord-{}", self.orders.lock().unwrap().len()),
                client_order_id: order.client_order_id.clone(),
                symbol: order.symbol.clone(),
                status: "accepted".into(),
            })
        }
    }

    fn dispatcher(broker: FakeBroker, dir: &Path, dry_run: bool) -> OrderDispatcher<FakeBroker> {
        let audit = AuditLog::open(dir.join("trade_log.csv")).unwrap();
        OrderDispatcher::new(Arc::new(broker), audit, dry_run)
    }

    fn audit_rows(dir: &Path) -> usize {
        let raw = std::fs::read_to_string(dir.join("trade_log.csv")).unwrap();
        raw.lines().count() - 1
    }

    #[tokio::test]
    async fn test_non_positive_quantity_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(FakeBroker::default(), dir.path(), false);

        assert_eq!(d.submit("AAPL", Action::Buy, 0).await, DispatchOutcome::Skipped);
        assert_eq!(d.submit("AAPL", Action::Sell, -3).await, DispatchOutcome::Skipped);
        assert_eq!(d.submit("AAPL", Action::Hold, 5).await, DispatchOutcome::Skipped);

        assert_eq!(*d.broker.position_checks.lock().unwrap(), 0);
        assert!(d.broker.orders.lock().unwrap().is_empty());
        assert_eq!(audit_rows(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_buy_suppressed_when_position_exists() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(FakeBroker::holding("AAPL", 10.0), dir.path(), false);

        assert_eq!(d.submit("AAPL", Action::Buy, 5).await, DispatchOutcome::Suppressed);
        assert!(d.broker.orders.lock().unwrap().is_empty());
        assert_eq!(audit_rows(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_sell_suppressed_without_position() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(FakeBroker::default(), dir.path(), false);

        assert_eq!(d.submit("MSFT", Action::Sell, 5).await, DispatchOutcome::Suppressed);
        assert!(d.broker.orders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_sends_market_gtc_and_audits() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(FakeBroker::holding("BTCUSD", 2.0), dir.path(), false);

        let outcome = d.submit("BTC/USD", Action::Sell, 2).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Submitted {
                order_id: "ord-1".into()
            }
        );

        let orders = d.broker.orders.lock().unwrap();
        assert_eq!(orders[0].symbol, "BTC/USD");
        assert_eq!(orders[0].qty, "2");
        assert_eq!(orders[0].order_type, common::OrderType::Market);
        assert_eq!(orders[0].time_in_force, common::TimeInForce::Gtc);
        assert!(!orders[0].client_order_id.is_empty());
        assert_eq!(audit_rows(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_recheck_failure_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let broker = FakeBroker {
            fail_recheck: true,
            ..FakeBroker::default()
        };
        let d = dispatcher(broker, dir.path(), false);

        let outcome = d.submit("AAPL", Action::Buy, 5).await;
        assert_eq!(outcome.label(), "failed");
        assert!(d.broker.orders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_order_is_failed_without_audit() {
        let dir = tempfile::tempdir().unwrap();
        let broker = FakeBroker {
            reject_orders: true,
            ..FakeBroker::default()
        };
        let d = dispatcher(broker, dir.path(), false);

        match d.submit("AAPL", Action::Buy, 5).await {
            DispatchOutcome::Failed { reason } => assert!(reason.contains("403")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(audit_rows(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_dry_run_checks_but_never_submits() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(FakeBroker::default(), dir.path(), true);

        assert_eq!(d.submit("AAPL", Action::Buy, 5).await, DispatchOutcome::DryRun);
        assert_eq!(*d.broker.position_checks.lock().unwrap(), 1);
        assert!(d.broker.orders.lock().unwrap().is_empty());
        assert_eq!(audit_rows(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_concurrent_buys_place_one_order() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(FakeBroker::default(), dir.path(), false);

        let (a, b) = tokio::join!(
            d.submit("NVDA", Action::Buy, 3),
            d.submit("NVDA", Action::Buy, 3)
        );
        let submitted = [a, b]
            .iter()
            .filter(|o| matches!(o, DispatchOutcome::Submitted { .. }))
            .count();
        assert_eq!(submitted, 1);
        assert_eq!(d.broker.orders.lock().unwrap().len(), 1);
    }
}
