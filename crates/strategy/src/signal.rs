//! Signal evaluation.
//!
//! Maps one symbol's bar series plus explicit portfolio context to a
//! `Decision`. Pure and deterministic: no I/O, no clock, no shared state.
//! Too little data is always a hold.

use common::config::{BreakoutConfig, InvestmentCap, SignalPolicy, SmaConfig, StrategyConfig};
use common::{Action, Decision};

use crate::bars::BarSeries;

/// What the evaluator knows about the account and the symbol's position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PortfolioContext {
    pub cash: f64,
    /// Any non-zero position, including fractional crypto lots.
    pub has_position: bool,
    /// Whole units held; what a sell can actually close.
    pub held_quantity: i64,
    pub unrealized_pl: Option<f64>,
}

/// Configured signal rule.
#[derive(Debug, Clone)]
pub struct SignalEvaluator {
    policy: SignalPolicy,
    breakout: BreakoutConfig,
    sma: SmaConfig,
    investment_cap: InvestmentCap,
}

impl SignalEvaluator {
    pub fn new(cfg: &StrategyConfig) -> Self {
        Self {
            policy: cfg.policy,
            breakout: cfg.breakout.clone(),
            sma: cfg.sma.clone(),
            investment_cap: cfg.investment_cap,
        }
    }

    /// Evaluate one symbol.
    pub fn evaluate(&self, series: &BarSeries, ctx: &PortfolioContext) -> Decision {
        match self.policy {
            SignalPolicy::Breakout => evaluate_breakout(series, ctx, &self.breakout),
            SignalPolicy::SmaCrossover => {
                evaluate_sma_crossover(series, ctx, &self.sma, self.investment_cap)
            }
        }
    }
}

// ── Breakout + relative volume ─────────────────────────────────────────

/// Range and volume statistics over the window preceding the last bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakoutStats {
    pub last_close: f64,
    pub prev_high: f64,
    pub prev_low: f64,
    pub rel_volume: f64,
}

/// `None` when the series is shorter than `lookback + 1` bars.
pub fn breakout_stats(series: &BarSeries, lookback: usize) -> Option<BreakoutStats> {
    let bars = series.bars();
    if lookback == 0 || bars.len() < lookback + 1 {
        return None;
    }

    let (last, history) = bars.split_last()?;
    let window = &history[history.len() - lookback..];

    let prev_high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let prev_low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let avg_volume = window.iter().map(|b| b.volume).sum::<f64>() / lookback as f64;
    let rel_volume = if avg_volume > 0.0 {
        last.volume / avg_volume
    } else {
        1.0
    };

    Some(BreakoutStats {
        last_close: last.close,
        prev_high,
        prev_low,
        rel_volume,
    })
}

pub fn evaluate_breakout(
    series: &BarSeries,
    ctx: &PortfolioContext,
    cfg: &BreakoutConfig,
) -> Decision {
    let symbol = series.symbol();
    let Some(stats) = breakout_stats(series, cfg.lookback) else {
        return Decision::hold(
            symbol,
            format!("need {} bars, have {}", cfg.lookback + 1, series.len()),
        );
    };

    let BreakoutStats {
        last_close,
        prev_high,
        prev_low,
        rel_volume,
    } = stats;

    if !ctx.has_position
        && ctx.cash > 0.0
        && last_close > prev_high
        && rel_volume > cfg.entry_rel_volume
        && prev_high > 0.0
    {
        let strength = ((last_close - prev_high) / prev_high) * rel_volume;
        if strength < cfg.min_strength {
            return Decision::hold(
                symbol,
                format!("weak breakout: strength={:.4} < {}", strength, cfg.min_strength),
            );
        }

        let invest = (ctx.cash * cfg.max_cash_fraction)
            .min(ctx.cash * (cfg.strength_multiplier * strength).min(1.0));
        let size = (invest / last_close).floor() as i64;
        if size <= 0 {
            return Decision::hold(
                symbol,
                format!("breakout but ${:.2} buys no whole units at {:.2}", invest, last_close),
            );
        }

        return Decision {
            symbol: symbol.to_string(),
            action: Action::Buy,
            quantity: size,
            reason: format!(
                "breakout: close={:.2} > high={:.2}, rel_vol={:.2}, strength={:.4}",
                last_close, prev_high, rel_volume, strength
            ),
        };
    }

    let breakdown = last_close < prev_low;
    let volume_collapse = rel_volume < cfg.exit_rel_volume;
    if ctx.has_position && ctx.held_quantity > 0 && (breakdown || volume_collapse) {
        let (quantity, reason) = if breakdown {
            (
                ctx.held_quantity,
                format!("breakdown: close={:.2} < low={:.2}", last_close, prev_low),
            )
        } else {
            (
                (ctx.held_quantity / 2).max(1),
                format!("volume collapse: rel_vol={:.2}", rel_volume),
            )
        };
        return Decision {
            symbol: symbol.to_string(),
            action: Action::Sell,
            quantity,
            reason,
        };
    }

    Decision::hold(symbol, "no signal")
}

// ── Dual moving-average crossover ──────────────────────────────────────

/// Simple moving average of `values[end + 1 - window ..= end]`.
pub fn sma(values: &[f64], window: usize, end: usize) -> Option<f64> {
    if window == 0 || end >= values.len() || end + 1 < window {
        return None;
    }
    let slice = &values[end + 1 - window..=end];
    Some(slice.iter().sum::<f64>() / window as f64)
}

pub fn evaluate_sma_crossover(
    series: &BarSeries,
    ctx: &PortfolioContext,
    cfg: &SmaConfig,
    cap: InvestmentCap,
) -> Decision {
    let symbol = series.symbol();
    let closes = series.closes();
    let n = closes.len();
    let min_bars = cfg.slow_window.max(cfg.fast_window) + 1;
    if n < min_bars {
        return Decision::hold(symbol, format!("need {} bars, have {}", min_bars, n));
    }

    let prior_defined = sma(&closes, cfg.fast_window, n - 2).is_some()
        && sma(&closes, cfg.slow_window, n - 2).is_some();
    let (Some(fast), Some(slow)) = (
        sma(&closes, cfg.fast_window, n - 1),
        sma(&closes, cfg.slow_window, n - 1),
    ) else {
        return Decision::hold(symbol, "moving averages undefined");
    };
    if !prior_defined {
        return Decision::hold(symbol, "moving averages undefined");
    }

    let last_close = closes[n - 1];

    if fast > slow && ctx.cash > 0.0 && !ctx.has_position && last_close > 0.0 {
        let budget = cap.amount(ctx.cash);
        let quantity = (budget / last_close).floor() as i64;
        if quantity <= 0 {
            return Decision::hold(symbol, "investment cap buys no whole units");
        }
        return Decision {
            symbol: symbol.to_string(),
            action: Action::Buy,
            quantity,
            reason: format!("sma{}={:.2} > sma{}={:.2}", cfg.fast_window, fast, cfg.slow_window, slow),
        };
    }

    if fast < slow && ctx.has_position && ctx.held_quantity > 0 {
        if cfg.require_profit_to_exit && ctx.unrealized_pl.unwrap_or(0.0) <= 0.0 {
            return Decision::hold(symbol, "bearish cross but position not in profit");
        }
        return Decision {
            symbol: symbol.to_string(),
            action: Action::Sell,
            quantity: ctx.held_quantity,
            reason: format!("sma{}={:.2} < sma{}={:.2}", cfg.fast_window, fast, cfg.slow_window, slow),
        };
    }

    Decision::hold(symbol, "no signal")
}
