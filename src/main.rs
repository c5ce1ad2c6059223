//! Breakout Bot entry point.
//!
//! Polls Alpaca bars for a fixed universe during market hours, evaluates a
//! breakout (or SMA crossover) rule per symbol and trades through the same
//! account until the daily profit target is reached.

mod config;
mod control;
mod governor;
mod journal;

use std::sync::Arc;

use alpaca_client::AlpacaRestClient;
use clap::Parser;
use execution::{AuditLog, OrderDispatcher};
use tracing::{error, info, warn};

use crate::config::load_config;
use crate::control::ControlChannel;
use crate::governor::CycleGovernor;
use crate::journal::{default_journal_dir, JournalEvent, RunMode, TradeJournal};

#[derive(Parser)]
#[command(about = "Breakout trading bot for Alpaca equities and crypto")]
struct Cli {
    /// Verify credentials against the account endpoint and exit.
    #[arg(long)]
    check_auth: bool,

    /// Evaluate and log decisions without submitting orders.
    #[arg(long)]
    dry_run: bool,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,

    /// Sell every open position and exit.
    #[arg(long)]
    liquidate_all: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "breakout_bot=info,strategy=info,execution=info,alpaca_client=info".into()
            }),
        )
        .init();

    info!("🚀 Breakout Bot starting...");

    let cli = Cli::parse();
    let mut cfg = match load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Config error: {}", e);
            std::process::exit(1);
        }
    };
    if cli.dry_run {
        cfg.dry_run = true;
    }
    if cfg.dry_run {
        info!("Dry-run mode enabled: decisions will be logged but not executed.");
    }

    let trading_url = cfg.resolved_trading_url();
    info!(
        "Environment: {} ({})",
        if cfg.paper { "PAPER" } else { "LIVE" },
        trading_url
    );
    info!(
        "Universe: {} equities, {} crypto | policy={:?} | target={:.2}%",
        cfg.universe.equities.len(),
        cfg.universe.crypto.len(),
        cfg.strategy.policy,
        cfg.risk.daily_profit_target * 100.0
    );

    let client = match AlpacaRestClient::from_config(&cfg) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Client initialization failed: {}", e);
            std::process::exit(1);
        }
    };

    // ── Check-auth mode ──────────────────────────────────────────────
    if cli.check_auth {
        info!("Running auth check for key {}...", client.api_key());
        match client.get_account().await {
            Ok(account) => {
                info!(
                    "✅ Auth successful! cash=${:.2} equity=${:.2} buying_power=${:.2}",
                    account.cash, account.equity, account.buying_power
                );
            }
            Err(e) => {
                error!("❌ Auth check failed: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let mut trade_journal = match TradeJournal::open(default_journal_dir()) {
        Ok(journal) => journal,
        Err(e) => {
            error!("Failed to initialize trade journal: {}", e);
            std::process::exit(1);
        }
    };
    info!("Trade journal path: {}", trade_journal.dir().display());
    trade_journal.record(&JournalEvent::BotStart {
        mode: if cfg.dry_run { RunMode::DryRun } else { RunMode::Live },
        paper: cfg.paper,
        policy: cfg.strategy.policy,
        symbols: cfg.all_symbols().len(),
        daily_profit_target: cfg.risk.daily_profit_target,
    });

    let audit = match AuditLog::open(&cfg.audit_log_path) {
        Ok(a) => a,
        Err(e) => {
            error!("Failed to open audit log {}: {}", cfg.audit_log_path, e);
            std::process::exit(1);
        }
    };
    info!("Audit log path: {}", audit.path().display());

    let dispatcher = OrderDispatcher::new(client.clone(), audit, cfg.dry_run);
    let mut control_cfg = cfg.control.clone();
    if cli.once {
        control_cfg.stdin_enabled = false;
    }
    let mut governor = match CycleGovernor::new(cfg, client.clone(), client, dispatcher, trade_journal) {
        Ok(g) => g,
        Err(e) => {
            error!("Governor initialization failed: {}", e);
            std::process::exit(1);
        }
    };

    // ── Liquidate-all mode ───────────────────────────────────────────
    if cli.liquidate_all {
        let report = governor.liquidate_all().await;
        info!(
            "Liquidation: {} positions, {} sell orders, {} failed, {} fractional skipped",
            report.positions, report.submitted, report.failed, report.skipped_fractional
        );
        if report.failed > 0 {
            warn!("Some liquidation orders failed; check the journal");
        }
        return;
    }

    let mut control = ControlChannel::spawn(&control_cfg);

    info!("Breakout Bot is running. Press Ctrl+C to stop.");
    let shutdown_reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            "ctrl_c"
        }
        _ = governor.run(&mut control, cli.once) => {
            if cli.once { "once" } else { "loop_exit" }
        }
    };

    let phase = governor.phase();
    let halted = governor.is_halted();
    governor.record(JournalEvent::BotShutdown {
        reason: shutdown_reason.to_string(),
        phase,
        halted,
    });
    info!("Shutdown complete ({})", shutdown_reason);
}
