//! Append-only event journal.
//!
//! Each event is one JSON object per line, tagged by `kind` and stamped
//! with `ts`. Files are named `events-YYYY-MM-DD.jsonl` after the UTC date
//! of the event, so a long-running process rolls over at midnight UTC.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use common::config::SignalPolicy;
use common::{Action, AssetClass, Error};
use serde::Serialize;
use tracing::warn;

use crate::governor::{CyclePhase, CycleSummary, LiquidationReport};

const JOURNAL_SUBDIR: &str = "breakout-bot";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Live,
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEvent {
    BotStart {
        mode: RunMode,
        paper: bool,
        policy: SignalPolicy,
        symbols: usize,
        daily_profit_target: f64,
    },
    BaselineLatched {
        date: NaiveDate,
        start_equity: f64,
    },
    AccountDegraded {
        cycle: u64,
        attempts: u32,
    },
    CycleStart {
        cycle: u64,
        cash: f64,
        equity: f64,
        degraded: bool,
    },
    BarsFetchFailed {
        cycle: u64,
        asset_class: AssetClass,
    },
    Decision {
        cycle: u64,
        symbol: String,
        action: Action,
        quantity: i64,
        reason: String,
    },
    OrderSubmitted {
        symbol: String,
        action: Action,
        quantity: i64,
        order_id: String,
    },
    OrderFailed {
        symbol: String,
        action: Action,
        quantity: i64,
        error: String,
    },
    TargetReached {
        cycle: u64,
        daily_profit: f64,
        ratio: f64,
        target: f64,
    },
    CycleSummary(CycleSummary),
    LiquidateAll {
        #[serde(flatten)]
        report: LiquidationReport,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    BotShutdown {
        reason: String,
        phase: CyclePhase,
        halted: bool,
    },
}

#[derive(Serialize)]
struct JournalLine<'a> {
    ts: String,
    #[serde(flatten)]
    event: &'a JournalEvent,
}

/// Where the journal lives: `TRADES_DIR` when set, else `TRADES/` at the
/// nearest ancestor of `cwd` holding a `.git`, else `TRADES/` under `cwd`.
pub fn journal_dir(trades_dir: Option<&str>, cwd: &Path) -> PathBuf {
    if let Some(dir) = trades_dir.map(str::trim).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir).join(JOURNAL_SUBDIR);
    }
    let root = cwd
        .ancestors()
        .find(|p| p.join(".git").is_dir())
        .unwrap_or(cwd);
    root.join("TRADES").join(JOURNAL_SUBDIR)
}

pub fn default_journal_dir() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    journal_dir(std::env::var("TRADES_DIR").ok().as_deref(), &cwd)
}

pub struct TradeJournal {
    dir: PathBuf,
    current: Option<(NaiveDate, BufWriter<File>)>,
}

impl TradeJournal {
    pub fn open(dir: PathBuf) -> Result<Self, Error> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, current: None })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("events-{}.jsonl", date.format("%Y-%m-%d")))
    }

    fn writer_for(&mut self, date: NaiveDate) -> Result<&mut BufWriter<File>, Error> {
        if !matches!(&self.current, Some((day, _)) if *day == date) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.file_for(date))?;
            self.current = Some((date, BufWriter::new(file)));
        }
        match self.current.as_mut() {
            Some((_, writer)) => Ok(writer),
            None => Err(Error::Other("journal writer unavailable".into())),
        }
    }

    /// Append `event` stamped at `at`.
    pub fn append(&mut self, at: DateTime<Utc>, event: &JournalEvent) -> Result<(), Error> {
        let line = serde_json::to_string(&JournalLine {
            ts: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
        })?;
        let writer = self.writer_for(at.date_naive())?;
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }

    /// Append `event` stamped now. Failures are logged and swallowed so the
    /// trading loop never stops on a journal error.
    pub fn record(&mut self, event: &JournalEvent) {
        if let Err(e) = self.append(Utc::now(), event) {
            warn!("journal write failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn read_lines(path: PathBuf) -> Vec<serde_json::Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_events_are_tagged_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = TradeJournal::open(dir.path().join("j")).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap();

        journal
            .append(
                at,
                &JournalEvent::Decision {
                    cycle: 3,
                    symbol: "AAPL".into(),
                    action: Action::Buy,
                    quantity: 18,
                    reason: "breakout".into(),
                },
            )
            .unwrap();
        journal
            .append(
                at,
                &JournalEvent::BarsFetchFailed {
                    cycle: 3,
                    asset_class: AssetClass::Crypto,
                },
            )
            .unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let lines = read_lines(journal.file_for(date));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "decision");
        assert_eq!(lines[0]["action"], "buy");
        assert_eq!(lines[0]["quantity"], 18);
        assert_eq!(lines[0]["ts"], "2024-03-04T15:00:00.000Z");
        assert_eq!(lines[1]["kind"], "bars_fetch_failed");
        assert_eq!(lines[1]["asset_class"], "crypto");
    }

    #[test]
    fn test_liquidation_report_is_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = TradeJournal::open(dir.path().to_path_buf()).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap();
        let report = LiquidationReport {
            positions: 3,
            submitted: 2,
            failed: 0,
            skipped_fractional: 1,
        };
        journal
            .append(at, &JournalEvent::LiquidateAll { report, error: None })
            .unwrap();

        let line = &read_lines(journal.file_for(at.date_naive()))[0];
        assert_eq!(line["kind"], "liquidate_all");
        assert_eq!(line["submitted"], 2);
        assert!(line.get("error").is_none());
    }

    #[test]
    fn test_file_rolls_over_at_utc_midnight() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = TradeJournal::open(dir.path().to_path_buf()).unwrap();
        let before = Utc.with_ymd_and_hms(2024, 3, 4, 23, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 1).unwrap();
        let event = JournalEvent::AccountDegraded {
            cycle: 1,
            attempts: 3,
        };

        journal.append(before, &event).unwrap();
        journal.append(after, &event).unwrap();

        assert_eq!(read_lines(journal.file_for(before.date_naive())).len(), 1);
        assert_eq!(read_lines(journal.file_for(after.date_naive())).len(), 1);
    }

    #[test]
    fn test_journal_dir_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        let nested = repo.join("a").join("b");
        fs::create_dir_all(repo.join(".git")).unwrap();
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(
            journal_dir(Some(" /var/trades "), &nested),
            PathBuf::from("/var/trades").join("breakout-bot")
        );
        assert_eq!(
            journal_dir(Some(""), &nested),
            repo.join("TRADES").join("breakout-bot")
        );

        let loose = dir.path().join("loose");
        fs::create_dir_all(&loose).unwrap();
        assert_eq!(
            journal_dir(None, &loose),
            loose.join("TRADES").join("breakout-bot")
        );
    }
}
