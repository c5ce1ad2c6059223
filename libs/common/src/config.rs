//! Bot configuration types.

use serde::{Deserialize, Serialize};

const PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";
const LIVE_TRADING_URL: &str = "https://api.alpaca.markets";

/// Top-level bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Alpaca API key ID.
    #[serde(default)]
    pub api_key: String,

    /// Alpaca API secret key.
    #[serde(default)]
    pub api_secret: String,

    /// Use the paper trading endpoint (true) or live (false).
    #[serde(default = "default_true")]
    pub paper: bool,

    /// Explicit trading endpoint; empty means derive from `paper`.
    #[serde(default)]
    pub trading_base_url: String,

    /// Market-data endpoint.
    #[serde(default = "default_data_base_url")]
    pub data_base_url: String,

    /// Stock data feed (`iex` works on free plans, `sip` needs a subscription).
    #[serde(default = "default_data_feed")]
    pub data_feed: String,

    /// Log decisions and skip order submission.
    #[serde(default)]
    pub dry_run: bool,

    /// Symbols to trade.
    #[serde(default)]
    pub universe: UniverseConfig,

    /// Bar request parameters.
    #[serde(default)]
    pub bars: BarsConfig,

    /// Signal policy and sizing.
    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Daily profit target and related limits.
    #[serde(default)]
    pub risk: RiskConfig,

    /// Timing parameters.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Exchange trading window.
    #[serde(default)]
    pub market_hours: MarketHoursConfig,

    /// Operator control sources.
    #[serde(default)]
    pub control: ControlConfig,

    /// CSV audit log of submitted orders.
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: String,
}

impl BotConfig {
    /// Trading endpoint after applying the paper/live switch.
    pub fn resolved_trading_url(&self) -> String {
        let explicit = self.trading_base_url.trim().trim_end_matches('/');
        if !explicit.is_empty() {
            return explicit.to_string();
        }
        if self.paper {
            PAPER_TRADING_URL.to_string()
        } else {
            LIVE_TRADING_URL.to_string()
        }
    }

    /// Every configured symbol, equities first.
    pub fn all_symbols(&self) -> Vec<String> {
        self.universe
            .equities
            .iter()
            .chain(self.universe.crypto.iter())
            .cloned()
            .collect()
    }
}

/// Symbol universe split by asset class; each class has its own bars endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseConfig {
    #[serde(default = "default_equities")]
    pub equities: Vec<String>,
    /// Crypto pairs in `BASE/QUOTE` form.
    #[serde(default = "default_crypto")]
    pub crypto: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarsConfig {
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// Page size sent to the feed; also the number of most recent bars
    /// kept per symbol.
    #[serde(default = "default_bar_limit")]
    pub limit: u32,
    /// Upper bound on `next_page_token` follow-ups per bars request.
    #[serde(default = "default_bar_max_pages")]
    pub max_pages: u32,
}

/// Which signal rule drives decisions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalPolicy {
    Breakout,
    SmaCrossover,
}

/// Per-symbol investment cap used by the SMA policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InvestmentCap {
    Fixed { usd: f64 },
    CashFraction { fraction: f64 },
}

impl InvestmentCap {
    /// Dollar amount available for one symbol given current cash.
    pub fn amount(&self, cash: f64) -> f64 {
        match *self {
            InvestmentCap::Fixed { usd } => usd,
            InvestmentCap::CashFraction { fraction } => cash.max(0.0) * fraction,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_policy")]
    pub policy: SignalPolicy,

    #[serde(default)]
    pub breakout: BreakoutConfig,

    #[serde(default)]
    pub sma: SmaConfig,

    #[serde(default = "default_investment_cap")]
    pub investment_cap: InvestmentCap,
}

/// Breakout + relative-volume thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakoutConfig {
    /// Bars preceding the last one used for the high/low/volume window.
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    /// Relative volume must exceed this to enter.
    #[serde(default = "default_entry_rel_volume")]
    pub entry_rel_volume: f64,
    /// Relative volume below this triggers a half exit.
    #[serde(default = "default_exit_rel_volume")]
    pub exit_rel_volume: f64,
    /// Minimum breakout strength (breakout % × relative volume).
    #[serde(default = "default_min_strength")]
    pub min_strength: f64,
    /// Hard cap on a single buy as a fraction of cash.
    #[serde(default = "default_max_cash_fraction")]
    pub max_cash_fraction: f64,
    /// Cash fraction committed per unit of strength.
    #[serde(default = "default_strength_multiplier")]
    pub strength_multiplier: f64,
}

/// Dual moving-average crossover windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmaConfig {
    #[serde(default = "default_fast_window")]
    pub fast_window: usize,
    #[serde(default = "default_slow_window")]
    pub slow_window: usize,
    /// Only exit on a bearish cross when the position is in profit.
    #[serde(default)]
    pub require_profit_to_exit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Equity growth ratio that halts trading for the rest of the run.
    #[serde(default = "default_daily_profit_target")]
    pub daily_profit_target: f64,
}

/// Timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Sleep after a completed cycle.
    #[serde(default = "default_loop_interval")]
    pub loop_interval_secs: u64,
    /// Re-check interval while the market is closed.
    #[serde(default = "default_market_closed_poll")]
    pub market_closed_poll_secs: u64,
    /// How long to listen for a liquidate command after each cycle.
    #[serde(default = "default_liquidate_window")]
    pub liquidate_window_secs: u64,
    /// Idle interval once the profit target halted trading.
    #[serde(default = "default_halted_poll")]
    pub halted_poll_secs: u64,
    /// Account lookups per cycle before degrading to zero balances.
    #[serde(default = "default_account_retry_attempts")]
    pub account_retry_attempts: u32,
    #[serde(default = "default_account_retry_backoff_ms")]
    pub account_retry_backoff_ms: u64,
}

/// Daily trading window in the exchange's local time zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketHoursConfig {
    /// IANA zone name.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// `HH:MM`, inclusive.
    #[serde(default = "default_open")]
    pub open: String,
    /// `HH:MM`, inclusive.
    #[serde(default = "default_close")]
    pub close: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Read `s` / `sell` / `liquidate` lines from stdin.
    #[serde(default = "default_true")]
    pub stdin_enabled: bool,
    /// Liquidate when this file appears; it is removed once consumed.
    #[serde(default)]
    pub control_file: Option<String>,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_data_base_url() -> String {
    "https://data.alpaca.markets".into()
}

fn default_data_feed() -> String {
    "iex".into()
}

fn default_audit_log_path() -> String {
    "trade_log.csv".into()
}

fn default_equities() -> Vec<String> {
    [
        "AAPL", "MSFT", "AMZN", "GOOG", "META", "NVDA", "TSLA", "BRK.B", "UNH", "V", "JPM",
        "XOM", "MA", "LLY", "AVGO", "HD", "PG", "CVX", "COST", "ABBV", "PEP", "MRK", "ADBE",
        "KO", "WMT", "BAC", "MCD", "CSCO", "ACN", "ABT", "DHR", "TMO", "LIN", "VZ", "DIS",
        "NKE", "TXN", "NEE", "ORCL", "PM", "AMGN", "MDT", "CRM", "HON", "UNP", "QCOM", "BMY",
        "LOW", "MS", "SPY", "QQQ", "VTI", "ARKK", "DIA", "IWM", "XLK", "XLF", "XLE", "XLV",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_crypto() -> Vec<String> {
    [
        "BTC/USD", "ETH/USD", "SOL/USD", "DOGE/USD", "LTC/USD", "AVAX/USD", "BCH/USD",
        "DOT/USD",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_timeframe() -> String {
    "1Min".into()
}

fn default_bar_limit() -> u32 {
    1000
}

fn default_bar_max_pages() -> u32 {
    10
}

fn default_policy() -> SignalPolicy {
    SignalPolicy::Breakout
}

fn default_investment_cap() -> InvestmentCap {
    InvestmentCap::Fixed { usd: 10_000.0 }
}

fn default_lookback() -> usize {
    20
}

fn default_entry_rel_volume() -> f64 {
    1.5
}

fn default_exit_rel_volume() -> f64 {
    0.5
}

fn default_min_strength() -> f64 {
    0.005
}

fn default_max_cash_fraction() -> f64 {
    0.2
}

fn default_strength_multiplier() -> f64 {
    2.0
}

fn default_fast_window() -> usize {
    5
}

fn default_slow_window() -> usize {
    15
}

fn default_daily_profit_target() -> f64 {
    0.01
}

fn default_loop_interval() -> u64 {
    90
}

fn default_market_closed_poll() -> u64 {
    30
}

fn default_liquidate_window() -> u64 {
    15
}

fn default_halted_poll() -> u64 {
    60
}

fn default_account_retry_attempts() -> u32 {
    4
}

fn default_account_retry_backoff_ms() -> u64 {
    3_000
}

fn default_timezone() -> String {
    "America/New_York".into()
}

fn default_open() -> String {
    "09:30".into()
}

fn default_close() -> String {
    "16:30".into()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            paper: true,
            trading_base_url: String::new(),
            data_base_url: default_data_base_url(),
            data_feed: default_data_feed(),
            dry_run: false,
            universe: UniverseConfig::default(),
            bars: BarsConfig::default(),
            strategy: StrategyConfig::default(),
            risk: RiskConfig::default(),
            timing: TimingConfig::default(),
            market_hours: MarketHoursConfig::default(),
            control: ControlConfig::default(),
            audit_log_path: default_audit_log_path(),
        }
    }
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            equities: default_equities(),
            crypto: default_crypto(),
        }
    }
}

impl Default for BarsConfig {
    fn default() -> Self {
        Self {
            timeframe: default_timeframe(),
            limit: default_bar_limit(),
            max_pages: default_bar_max_pages(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            breakout: BreakoutConfig::default(),
            sma: SmaConfig::default(),
            investment_cap: default_investment_cap(),
        }
    }
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self {
            lookback: default_lookback(),
            entry_rel_volume: default_entry_rel_volume(),
            exit_rel_volume: default_exit_rel_volume(),
            min_strength: default_min_strength(),
            max_cash_fraction: default_max_cash_fraction(),
            strength_multiplier: default_strength_multiplier(),
        }
    }
}

impl Default for SmaConfig {
    fn default() -> Self {
        Self {
            fast_window: default_fast_window(),
            slow_window: default_slow_window(),
            require_profit_to_exit: false,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            daily_profit_target: default_daily_profit_target(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            loop_interval_secs: default_loop_interval(),
            market_closed_poll_secs: default_market_closed_poll(),
            liquidate_window_secs: default_liquidate_window(),
            halted_poll_secs: default_halted_poll(),
            account_retry_attempts: default_account_retry_attempts(),
            account_retry_backoff_ms: default_account_retry_backoff_ms(),
        }
    }
}

impl Default for MarketHoursConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            open: default_open(),
            close: default_close(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            stdin_enabled: true,
            control_file: None,
        }
    }
}
