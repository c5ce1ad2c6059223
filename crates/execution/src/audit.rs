//! Append-only CSV audit log of submitted orders.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use common::{Action, Error};

pub const AUDIT_HEADER: [&str; 3] = ["timestamp", "symbol", "action"];

pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

impl AuditLog {
    /// Open for append, writing the header if the file is new or empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let needs_header = std::fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(AUDIT_HEADER)?;
            writer.flush()?;
        }

        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    pub fn append(&self, timestamp: DateTime<Utc>, symbol: &str, action: Action) -> Result<(), Error> {
        let ts = timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| Error::Other("audit log lock poisoned".into()))?;
        writer.write_record([ts.as_str(), symbol, action.label()])?;
        writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_creates_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("trade_log.csv");
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap();

        let log = AuditLog::open(&path).unwrap();
        log.append(ts, "AAPL", Action::Buy).unwrap();
        drop(log);

        let log = AuditLog::open(&path).unwrap();
        log.append(ts, "BTC/USD", Action::Sell).unwrap();

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec!["timestamp", "symbol", "action"]);
        assert_eq!(rows[1], vec!["2024-03-04T15:00:00Z", "AAPL", "buy"]);
        assert_eq!(rows[2][1], "BTC/USD");
        assert_eq!(rows[2][2], "sell");
    }

    #[test]
    fn test_existing_file_keeps_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trade_log.csv");
        std::fs::write(&path, "timestamp,symbol,action\n2024-01-01T00:00:00Z,MSFT,buy\n").unwrap();

        let log = AuditLog::open(&path).unwrap();
        log.append(Utc::now(), "MSFT", Action::Sell).unwrap();

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][1], "MSFT");
    }
}
