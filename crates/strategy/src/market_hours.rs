//! Exchange trading window.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use common::config::MarketHoursConfig;
use common::Error;

/// Daily window in exchange-local time. Both bounds are inclusive.
#[derive(Debug, Clone, Copy)]
pub struct MarketHours {
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
}

impl MarketHours {
    pub fn new(tz: Tz, open: NaiveTime, close: NaiveTime) -> Result<Self, Error> {
        if open >= close {
            return Err(Error::Config(format!(
                "market open {} must be before close {}",
                open, close
            )));
        }
        Ok(Self { tz, open, close })
    }

    pub fn from_config(cfg: &MarketHoursConfig) -> Result<Self, Error> {
        let tz: Tz = cfg
            .timezone
            .parse()
            .map_err(|_| Error::Config(format!("unknown time zone '{}'", cfg.timezone)))?;
        Self::new(tz, parse_hhmm(&cfg.open)?, parse_hhmm(&cfg.close)?)
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz).time();
        local >= self.open && local <= self.close
    }

    /// Calendar date at the exchange.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }
}

fn parse_hhmm(raw: &str) -> Result<NaiveTime, Error> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|e| Error::Config(format!("invalid HH:MM time '{}': {}", raw, e)))
}
