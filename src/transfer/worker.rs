//! Stale Transfer Scanner
//!
//! Background worker that reports transfers stuck in IN_PROGRESS.
//! It never resumes them: redelivery by the queue is the only retry path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::StaleConfig;

use super::db::TransferLog;
use super::error::TransferError;
use super::types::TransferRecord;

/// Configuration for the stale scanner
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// How often to scan
    pub scan_interval: Duration,
    /// How long a transfer must sit in IN_PROGRESS to be reported
    pub stale_threshold: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
        }
    }
}

impl From<&StaleConfig> for ScannerConfig {
    fn from(config: &StaleConfig) -> Self {
        Self {
            scan_interval: Duration::from_secs(config.scan_interval_secs),
            stale_threshold: Duration::from_secs(config.threshold_secs),
        }
    }
}

pub struct StaleTransferScanner {
    log: Arc<dyn TransferLog>,
    clock: Arc<dyn Clock>,
    config: ScannerConfig,
}

impl StaleTransferScanner {
    pub fn new(log: Arc<dyn TransferLog>, clock: Arc<dyn Clock>, config: ScannerConfig) -> Self {
        Self { log, clock, config }
    }

    /// Run the scanner loop until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            "Starting stale transfer scanner"
        );

        while !*shutdown.borrow() {
            if let Err(e) = self.scan().await {
                error!(error = %e, "Stale transfer scan failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.scan_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Run a single scan, returning the stale transfers found
    pub async fn scan(&self) -> Result<Vec<TransferRecord>, TransferError> {
        let threshold = chrono::Duration::from_std(self.config.stale_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let cutoff = self.clock.now() - threshold;

        let stale = self.log.find_stale(cutoff).await?;
        if stale.is_empty() {
            debug!("No stale transfers found");
            return Ok(stale);
        }

        for transfer in &stale {
            warn!(
                transfer_id = %transfer.transfer_id,
                status = %transfer.status,
                last_updated = %transfer.last_updated,
                "Transfer stuck in progress"
            );
        }
        info!(count = stale.len(), "Found stale transfers");

        Ok(stale)
    }
}
