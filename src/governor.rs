//! Cycle governor.
//!
//! Drives one cycle at a time: market-hours gate, account refresh, bar
//! fetch, per-symbol evaluation and dispatch, daily profit check. Once the
//! profit target is hit the halt is permanent for the process.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{Action, BotConfig, Brokerage, Error, MarketData};
use execution::{DispatchOutcome, OrderDispatcher};
use serde::Serialize;
use strategy::{
    BarStore, BaselineTracker, DailyProfit, MarketHours, PositionLedger, RetryPolicy,
    SignalEvaluator,
};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::control::ControlChannel;
use crate::journal::{JournalEvent, TradeJournal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    WaitingForMarketOpen,
    RefreshingAccount,
    Evaluating,
    TargetReached,
    Sleeping,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleSummary {
    pub cycle: u64,
    pub account_degraded: bool,
    pub symbols_with_bars: usize,
    pub decisions: usize,
    pub buys: usize,
    pub sells: usize,
    pub submitted: usize,
    pub suppressed: usize,
    pub dry_run: usize,
    pub failed: usize,
    pub equity: f64,
    pub daily_profit: f64,
    pub daily_profit_ratio: f64,
    pub total_unrealized_pl: f64,
    pub target_reached: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    MarketClosed,
    Halted,
    Completed(CycleSummary),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LiquidationReport {
    pub positions: usize,
    pub submitted: usize,
    pub failed: usize,
    pub skipped_fractional: usize,
}

pub struct CycleGovernor<B: Brokerage + ?Sized, M: MarketData + ?Sized> {
    config: BotConfig,
    broker: Arc<B>,
    feed: Arc<M>,
    dispatcher: OrderDispatcher<B>,
    evaluator: SignalEvaluator,
    hours: MarketHours,
    retry: RetryPolicy,
    ledger: PositionLedger,
    baseline: BaselineTracker,
    journal: TradeJournal,
    phase: CyclePhase,
    halted: bool,
    cycle: u64,
}

impl<B: Brokerage + ?Sized, M: MarketData + ?Sized> CycleGovernor<B, M> {
    pub fn new(
        config: BotConfig,
        broker: Arc<B>,
        feed: Arc<M>,
        dispatcher: OrderDispatcher<B>,
        journal: TradeJournal,
    ) -> Result<Self, Error> {
        let hours = MarketHours::from_config(&config.market_hours)?;
        let retry = RetryPolicy::new(
            config.timing.account_retry_attempts,
            Duration::from_millis(config.timing.account_retry_backoff_ms),
        );
        let evaluator = SignalEvaluator::new(&config.strategy);
        Ok(Self {
            config,
            broker,
            feed,
            dispatcher,
            evaluator,
            hours,
            retry,
            ledger: PositionLedger::new(),
            baseline: BaselineTracker::new(),
            journal,
            phase: CyclePhase::WaitingForMarketOpen,
            halted: false,
            cycle: 0,
        })
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn record(&mut self, event: JournalEvent) {
        self.journal.record(&event);
    }

    fn enter(&mut self, phase: CyclePhase) {
        if self.phase != phase {
            debug!("Governor: {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Run one cycle as of `now`.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        if self.halted {
            self.enter(CyclePhase::TargetReached);
            return CycleOutcome::Halted;
        }

        self.enter(CyclePhase::WaitingForMarketOpen);
        if !self.hours.is_open(now) {
            debug!(
                "Market closed at {} ({}), waiting",
                now.with_timezone(&self.hours.timezone()).format("%Y-%m-%d %H:%M:%S"),
                self.hours.timezone()
            );
            return CycleOutcome::MarketClosed;
        }

        self.cycle = self.cycle.saturating_add(1);
        let mut summary = CycleSummary {
            cycle: self.cycle,
            ..CycleSummary::default()
        };

        // ── Account ──────────────────────────────────────────────────
        self.enter(CyclePhase::RefreshingAccount);
        let account_ok = self
            .ledger
            .refresh_account(self.broker.as_ref(), &self.retry)
            .await;
        if account_ok {
            let equity = self.ledger.account().equity;
            if let Some(baseline) = self.baseline.observe(equity, self.hours.local_date(now)) {
                self.record(JournalEvent::BaselineLatched {
                    date: baseline.date,
                    start_equity: baseline.start_equity,
                });
            }
        } else {
            summary.account_degraded = true;
            self.record(JournalEvent::AccountDegraded {
                cycle: self.cycle,
                attempts: self.retry.max_attempts,
            });
        }

        let account = *self.ledger.account();
        info!(
            "Cycle {}: cash=${:.2} equity=${:.2} buying_power=${:.2}",
            self.cycle, account.cash, account.equity, account.buying_power
        );
        self.record(JournalEvent::CycleStart {
            cycle: self.cycle,
            cash: account.cash,
            equity: account.equity,
            degraded: summary.account_degraded,
        });

        // ── Evaluate ─────────────────────────────────────────────────
        self.enter(CyclePhase::Evaluating);
        self.ledger.refresh_positions(self.broker.as_ref()).await;

        let symbols = self.config.all_symbols();
        let store = BarStore::load(
            self.feed.as_ref(),
            &symbols,
            &self.config.bars.timeframe,
            self.config.bars.limit,
        )
        .await;
        for class in store.failed_requests().to_vec() {
            self.record(JournalEvent::BarsFetchFailed {
                cycle: self.cycle,
                asset_class: class,
            });
        }
        summary.symbols_with_bars = store.len();

        for symbol in &symbols {
            let Some(series) = store.get(symbol) else {
                continue;
            };
            let ctx = self.ledger.context_for(symbol);
            let decision = self.evaluator.evaluate(series, &ctx);
            summary.decisions += 1;

            if !decision.is_actionable() {
                debug!("{}: hold ({})", symbol, decision.reason);
                continue;
            }

            match decision.action {
                Action::Buy => summary.buys += 1,
                Action::Sell => summary.sells += 1,
                Action::Hold => {}
            }
            info!(
                "{}: {} x{} ({})",
                symbol, decision.action, decision.quantity, decision.reason
            );
            self.record(JournalEvent::Decision {
                cycle: self.cycle,
                symbol: symbol.clone(),
                action: decision.action,
                quantity: decision.quantity,
                reason: decision.reason.clone(),
            });

            let outcome = self
                .dispatcher
                .submit(symbol, decision.action, decision.quantity)
                .await;
            self.record_outcome(&mut summary, symbol, decision.action, decision.quantity, outcome);
        }

        // ── Daily profit ─────────────────────────────────────────────
        let DailyProfit { profit, ratio } = self.baseline.daily_profit(account.equity);
        summary.equity = account.equity;
        summary.daily_profit = profit;
        summary.daily_profit_ratio = ratio;
        summary.total_unrealized_pl = self.ledger.total_unrealized_pl();
        self.report(&summary);

        if ratio >= self.config.risk.daily_profit_target {
            self.halted = true;
            summary.target_reached = true;
            self.enter(CyclePhase::TargetReached);
            info!(
                "🎯 Daily profit target reached: {:.2}% >= {:.2}%; trading halted",
                ratio * 100.0,
                self.config.risk.daily_profit_target * 100.0
            );
            self.record(JournalEvent::TargetReached {
                cycle: self.cycle,
                daily_profit: profit,
                ratio,
                target: self.config.risk.daily_profit_target,
            });
        }

        self.record(JournalEvent::CycleSummary(summary.clone()));

        CycleOutcome::Completed(summary)
    }

    fn record_outcome(
        &mut self,
        summary: &mut CycleSummary,
        symbol: &str,
        action: Action,
        quantity: i64,
        outcome: DispatchOutcome,
    ) {
        match outcome {
            DispatchOutcome::Submitted { order_id } => {
                summary.submitted += 1;
                self.record(JournalEvent::OrderSubmitted {
                    symbol: symbol.to_string(),
                    action,
                    quantity,
                    order_id,
                });
            }
            DispatchOutcome::Failed { reason } => {
                summary.failed += 1;
                self.record(JournalEvent::OrderFailed {
                    symbol: symbol.to_string(),
                    action,
                    quantity,
                    error: reason,
                });
            }
            DispatchOutcome::Suppressed => summary.suppressed += 1,
            DispatchOutcome::DryRun => summary.dry_run += 1,
            DispatchOutcome::Skipped => {}
        }
    }

    fn report(&self, summary: &CycleSummary) {
        info!(
            "Cycle {} done: {} decisions ({} buy, {} sell), {} submitted, {} suppressed, {} failed, {} dry-run",
            summary.cycle,
            summary.decisions,
            summary.buys,
            summary.sells,
            summary.submitted,
            summary.suppressed,
            summary.failed,
            summary.dry_run
        );

        let positions = self.ledger.positions_by_pl();
        if !positions.is_empty() {
            info!("Open positions (by unrealized P/L):");
            for p in positions {
                info!(
                    "  {:<10} qty={:>12.4} value=${:>12.2} uPL=${:>10.2}",
                    p.symbol, p.quantity, p.market_value, p.unrealized_pl
                );
            }
        }
        info!(
            "Total unrealized P/L: ${:.2} | daily P/L: ${:.2} ({:.3}%)",
            summary.total_unrealized_pl,
            summary.daily_profit,
            summary.daily_profit_ratio * 100.0
        );
    }

    /// Sell every open position in full, bypassing the evaluator.
    pub async fn liquidate_all(&mut self) -> LiquidationReport {
        let mut report = LiquidationReport::default();
        let positions = match self.broker.list_positions().await {
            Ok(p) => p,
            Err(e) => {
                warn!("Liquidation aborted, could not list positions: {}", e);
                self.record(JournalEvent::LiquidateAll {
                    report,
                    error: Some(e.to_string()),
                });
                return report;
            }
        };

        info!("⚠️ Liquidating {} positions", positions.len());
        for position in positions {
            report.positions += 1;
            let quantity = position.whole_shares();
            if quantity <= 0 {
                warn!(
                    "{}: {} units held, nothing whole to sell",
                    position.symbol, position.quantity
                );
                report.skipped_fractional += 1;
                continue;
            }
            match self
                .dispatcher
                .submit(&position.symbol, Action::Sell, quantity)
                .await
            {
                DispatchOutcome::Submitted { .. } | DispatchOutcome::DryRun => {
                    report.submitted += 1
                }
                DispatchOutcome::Failed { .. } => report.failed += 1,
                DispatchOutcome::Suppressed | DispatchOutcome::Skipped => {}
            }
        }

        self.record(JournalEvent::LiquidateAll {
            report,
            error: None,
        });
        report
    }

    /// Main loop. With `once`, returns after the first cycle that reaches
    /// the market (or immediately when closed or halted).
    pub async fn run(&mut self, control: &mut ControlChannel, once: bool) {
        let timing = self.config.timing.clone();
        loop {
            match self.run_cycle(Utc::now()).await {
                CycleOutcome::MarketClosed => {
                    if once {
                        info!("Market closed; nothing to do");
                        return;
                    }
                    sleep(Duration::from_secs(timing.market_closed_poll_secs)).await;
                }
                CycleOutcome::Halted => {
                    if once {
                        return;
                    }
                    sleep(Duration::from_secs(timing.halted_poll_secs)).await;
                }
                CycleOutcome::Completed(summary) => {
                    if once {
                        return;
                    }
                    if summary.target_reached {
                        continue;
                    }
                    self.enter(CyclePhase::Sleeping);
                    if control
                        .wait_for_liquidate(Duration::from_secs(timing.liquidate_window_secs))
                        .await
                    {
                        self.liquidate_all().await;
                    }
                    sleep(Duration::from_secs(timing.loop_interval_secs)).await;
                }
            }
        }
    }
}
