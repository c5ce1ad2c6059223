//! Operator command channel.
//!
//! Commands arrive from stdin, SIGUSR1 (unix) or a control file and are
//! queued on one mpsc channel. The governor only listens during its
//! post-cycle window; commands sent mid-cycle wait for the next window.

use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use common::config::ControlConfig;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const CONTROL_FILE_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    LiquidateAll,
}

pub fn parse_command(line: &str) -> Option<ControlCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "s" | "sell" | "liquidate" => Some(ControlCommand::LiquidateAll),
        _ => None,
    }
}

pub struct ControlChannel {
    rx: mpsc::Receiver<ControlCommand>,
}

impl ControlChannel {
    pub fn new(rx: mpsc::Receiver<ControlCommand>) -> Self {
        Self { rx }
    }

    /// Start every configured command source.
    pub fn spawn(cfg: &ControlConfig) -> Self {
        let (tx, rx) = mpsc::channel(8);

        if cfg.stdin_enabled {
            let stdin_tx = tx.clone();
            match std::thread::Builder::new()
                .name("control-stdin".into())
                .spawn(move || forward_lines(std::io::stdin().lock(), stdin_tx))
            {
                Ok(_) => info!("Control: type 's' + Enter to liquidate all positions"),
                Err(e) => warn!("stdin control reader unavailable: {}", e),
            }
        }

        #[cfg(unix)]
        tokio::spawn(watch_sigusr1(tx.clone()));

        if let Some(path) = cfg.control_file.as_ref().filter(|p| !p.trim().is_empty()) {
            let path = PathBuf::from(path);
            info!("Control: liquidate when {} appears", path.display());
            tokio::spawn(watch_control_file(path, tx.clone()));
        }

        Self::new(rx)
    }

    /// Wait up to `window` for a liquidate command.
    pub async fn wait_for_liquidate(&mut self, window: Duration) -> bool {
        match timeout(window, self.rx.recv()).await {
            Ok(Some(ControlCommand::LiquidateAll)) => true,
            Ok(None) => {
                // Every source is gone; keep the cadence of the window.
                sleep(window).await;
                false
            }
            Err(_) => false,
        }
    }
}

/// Forward commands read from `input` until EOF.
///
/// Blocking. Runs on its own detached thread so a pending read never holds
/// up runtime shutdown.
fn forward_lines<R: BufRead>(input: R, tx: mpsc::Sender<ControlCommand>) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("stdin read failed, control reader exiting: {}", e);
                return;
            }
        };
        match parse_command(&line) {
            Some(cmd) => {
                info!("Control: {:?} requested from stdin", cmd);
                if tx.blocking_send(cmd).is_err() {
                    return;
                }
            }
            None if line.trim().is_empty() => {}
            None => warn!("Control: unknown command '{}'", line.trim()),
        }
    }
    debug!("stdin closed, control reader exiting");
}

#[cfg(unix)]
async fn watch_sigusr1(tx: mpsc::Sender<ControlCommand>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut stream = match signal(SignalKind::user_defined1()) {
        Ok(s) => s,
        Err(e) => {
            warn!("SIGUSR1 handler unavailable: {}", e);
            return;
        }
    };
    while stream.recv().await.is_some() {
        info!("Control: liquidate requested via SIGUSR1");
        if tx.send(ControlCommand::LiquidateAll).await.is_err() {
            return;
        }
    }
}

async fn watch_control_file(path: PathBuf, tx: mpsc::Sender<ControlCommand>) {
    loop {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Could not remove control file {}: {}", path.display(), e);
            }
            info!("Control: liquidate requested via {}", path.display());
            if tx.send(ControlCommand::LiquidateAll).await.is_err() {
                return;
            }
        }
        sleep(CONTROL_FILE_POLL).await;
    }
}
