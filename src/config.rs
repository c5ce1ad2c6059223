//! Configuration loader: merges .env, config.toml and environment overrides.

use std::path::Path;

use common::config::BotConfig;
use common::Error;

fn parse_bool(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    lowered != "0" && lowered != "false" && lowered != "no" && lowered != "off"
}

fn parse_positive_f64(raw: &str, env_name: &str) -> Result<f64, Error> {
    let parsed = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| Error::Config(format!("{env_name} must be a number > 0")))?;
    if !parsed.is_finite() || parsed <= 0.0 {
        return Err(Error::Config(format!("{env_name} must be a number > 0")));
    }
    Ok(parsed)
}

/// `AAPL, msft ,BTC/USD` -> equities and crypto pairs, upper-cased.
fn split_symbols(raw: &str) -> (Vec<String>, Vec<String>) {
    let mut equities = Vec::new();
    let mut crypto = Vec::new();
    for sym in raw.split(',').map(|s| s.trim().to_ascii_uppercase()) {
        if sym.is_empty() {
            continue;
        }
        if sym.contains('/') {
            crypto.push(sym);
        } else {
            equities.push(sym);
        }
    }
    (equities, crypto)
}

/// Apply environment overrides. `lookup` is `std::env::var` outside tests.
fn apply_env_overrides<F>(config: &mut BotConfig, lookup: F) -> Result<(), Error>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup("APCA_API_KEY_ID") {
        config.api_key = key.trim().to_string();
    }
    if let Some(secret) = lookup("APCA_API_SECRET_KEY") {
        config.api_secret = secret.trim().to_string();
    }
    if let Some(url) = lookup("APCA_API_BASE_URL") {
        config.trading_base_url = url.trim().to_string();
    }
    if let Some(url) = lookup("APCA_DATA_BASE_URL") {
        config.data_base_url = url.trim().to_string();
    }
    if let Some(raw) = lookup("BOT_SYMBOLS") {
        let (equities, crypto) = split_symbols(&raw);
        config.universe.equities = equities;
        config.universe.crypto = crypto;
    }
    if let Some(raw) = lookup("BOT_DRY_RUN") {
        config.dry_run = parse_bool(&raw);
    }
    if let Some(raw) = lookup("BOT_DAILY_PROFIT_TARGET") {
        config.risk.daily_profit_target = parse_positive_f64(&raw, "BOT_DAILY_PROFIT_TARGET")?;
    }
    Ok(())
}

pub fn validate_config(config: &BotConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if config.api_key.trim().is_empty() {
        issues.push("APCA_API_KEY_ID is required (set in .env or environment)".into());
    }
    if config.api_secret.trim().is_empty() {
        issues.push("APCA_API_SECRET_KEY is required (set in .env or environment)".into());
    }
    if config.data_base_url.trim().is_empty() {
        issues.push("data_base_url must not be empty".into());
    }
    if config.all_symbols().is_empty() {
        issues.push("universe must contain at least one symbol".into());
    }
    if let Some(bad) = config.universe.crypto.iter().find(|s| !s.contains('/')) {
        issues.push(format!("universe.crypto entry '{}' must be BASE/QUOTE", bad));
    }
    if let Some(bad) = config.universe.equities.iter().find(|s| s.contains('/')) {
        issues.push(format!("universe.equities entry '{}' looks like a crypto pair", bad));
    }

    if config.bars.timeframe.trim().is_empty() {
        issues.push("bars.timeframe must not be empty".into());
    }
    if config.bars.limit == 0 {
        issues.push("bars.limit must be > 0".into());
    }
    if config.bars.max_pages == 0 {
        issues.push("bars.max_pages must be > 0".into());
    }

    let breakout = &config.strategy.breakout;
    if breakout.lookback == 0 {
        issues.push("strategy.breakout.lookback must be > 0".into());
    }
    if breakout.entry_rel_volume <= 0.0 {
        issues.push("strategy.breakout.entry_rel_volume must be > 0".into());
    }
    if breakout.exit_rel_volume < 0.0 {
        issues.push("strategy.breakout.exit_rel_volume must be >= 0".into());
    }
    if breakout.min_strength < 0.0 {
        issues.push("strategy.breakout.min_strength must be >= 0".into());
    }
    if breakout.max_cash_fraction <= 0.0 || breakout.max_cash_fraction > 1.0 {
        issues.push("strategy.breakout.max_cash_fraction must be in (0,1]".into());
    }
    if breakout.strength_multiplier <= 0.0 {
        issues.push("strategy.breakout.strength_multiplier must be > 0".into());
    }

    let sma = &config.strategy.sma;
    if sma.fast_window == 0 || sma.slow_window == 0 {
        issues.push("strategy.sma windows must be > 0".into());
    }
    if sma.fast_window >= sma.slow_window {
        issues.push("strategy.sma.fast_window must be < strategy.sma.slow_window".into());
    }
    match config.strategy.investment_cap {
        common::config::InvestmentCap::Fixed { usd } if usd <= 0.0 => {
            issues.push("strategy.investment_cap.usd must be > 0".into());
        }
        common::config::InvestmentCap::CashFraction { fraction }
            if fraction <= 0.0 || fraction > 1.0 =>
        {
            issues.push("strategy.investment_cap.fraction must be in (0,1]".into());
        }
        _ => {}
    }

    if config.risk.daily_profit_target <= 0.0 {
        issues.push("risk.daily_profit_target must be > 0".into());
    }

    if config.timing.loop_interval_secs == 0 {
        issues.push("timing.loop_interval_secs must be > 0".into());
    }
    if config.timing.market_closed_poll_secs == 0 {
        issues.push("timing.market_closed_poll_secs must be > 0".into());
    }
    if config.timing.halted_poll_secs == 0 {
        issues.push("timing.halted_poll_secs must be > 0".into());
    }
    if config.timing.account_retry_attempts == 0 {
        issues.push("timing.account_retry_attempts must be > 0".into());
    }

    if let Err(e) = strategy::MarketHours::from_config(&config.market_hours) {
        issues.push(format!("market_hours: {}", e));
    }

    if config.audit_log_path.trim().is_empty() {
        issues.push("audit_log_path must not be empty".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Load bot configuration from environment and optional config file.
pub fn load_config() -> Result<BotConfig, Error> {
    // 1. .env from the working directory or its parents.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Defaults, replaced by config.toml when present.
    let mut config = BotConfig::default();
    let config_path = Path::new("config.toml");
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path)
            .map_err(|e| Error::Config(format!("Failed to read config.toml: {}", e)))?;
        config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config.toml: {}", e)))?;
    }

    // 3. Environment wins.
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    validate_config(&config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn with_credentials() -> BotConfig {
        BotConfig {
            api_key: "PKTEST".into(),
            api_secret: "secret".into(),
            ..BotConfig::default()
        }
    }

    #[test]
    fn test_env_overrides_apply() {
        let mut cfg = BotConfig::default();
        apply_env_overrides(
            &mut cfg,
            env(&[
                ("APCA_API_KEY_ID", " PKTEST "),
                ("APCA_API_SECRET_KEY", "shh"),
                ("APCA_API_BASE_URL", "https://example.test/"),
                ("BOT_SYMBOLS", "aapl, msft,,btc/usd"),
                ("BOT_DRY_RUN", "yes"),
                ("BOT_DAILY_PROFIT_TARGET", "0.02"),
            ]),
        )
        .unwrap();

        assert_eq!(cfg.api_key, "PKTEST");
        assert_eq!(cfg.universe.equities, vec!["AAPL", "MSFT"]);
        assert_eq!(cfg.universe.crypto, vec!["BTC/USD"]);
        assert!(cfg.dry_run);
        assert_eq!(cfg.risk.daily_profit_target, 0.02);
        assert_eq!(cfg.resolved_trading_url(), "https://example.test");
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_bad_profit_target_env_rejected() {
        let mut cfg = BotConfig::default();
        let err = apply_env_overrides(&mut cfg, env(&[("BOT_DAILY_PROFIT_TARGET", "-1")]))
            .unwrap_err();
        assert!(err.to_string().contains("BOT_DAILY_PROFIT_TARGET"));
    }

    #[test]
    fn test_dry_run_false_values() {
        for raw in ["0", "false", "No", "off"] {
            let mut cfg = BotConfig::default();
            cfg.dry_run = true;
            apply_env_overrides(&mut cfg, env(&[("BOT_DRY_RUN", raw)])).unwrap();
            assert!(!cfg.dry_run, "{raw} should disable dry run");
        }
    }

    #[test]
    fn test_missing_credentials_reported() {
        let err = validate_config(&BotConfig::default()).unwrap_err().to_string();
        assert!(err.contains("APCA_API_KEY_ID"));
        assert!(err.contains("APCA_API_SECRET_KEY"));
    }

    #[test]
    fn test_validation_collects_every_issue() {
        let mut cfg = with_credentials();
        cfg.universe.equities.clear();
        cfg.universe.crypto.clear();
        cfg.strategy.sma.fast_window = 20;
        cfg.timing.account_retry_attempts = 0;
        cfg.market_hours.timezone = "Nowhere/Land".into();
        cfg.bars.max_pages = 0;

        let err = validate_config(&cfg).unwrap_err().to_string();
        assert!(err.contains("bars.max_pages"));
        assert!(err.contains("at least one symbol"));
        assert!(err.contains("fast_window"));
        assert!(err.contains("account_retry_attempts"));
        assert!(err.contains("market_hours"));
    }

    #[test]
    fn test_misfiled_symbols_rejected() {
        let mut cfg = with_credentials();
        cfg.universe.crypto = vec!["BTCUSD".into()];
        let err = validate_config(&cfg).unwrap_err().to_string();
        assert!(err.contains("BASE/QUOTE"));
    }

    #[test]
    fn test_defaults_with_credentials_are_valid() {
        assert!(validate_config(&with_credentials()).is_ok());
    }
}
