//! Bundle reporter — snapshots log files into report bundles.
//!
//! Each configured log file is one log store. Composing a report spawns a
//! task on the tokio runtime that captures the tail of every file and
//! writes a [`ReportBundle`] to the output directory, so the UI thread
//! never waits on disk.

pub mod bundle;

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::reporter::BugReporter;

pub use bundle::{LogExcerpt, ReportBundle, read_bundle, write_bundle};

/// Default number of bytes captured from the end of each log.
pub const DEFAULT_TAIL_BYTES: u64 = 64 * 1024;

/// Report bundle errors.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("MessagePack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("MessagePack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Where and how much to capture.
#[derive(Debug, Clone)]
pub struct BundleConfig {
    pub logs: Vec<PathBuf>,
    pub out_dir: PathBuf,
    pub tail_bytes: u64,
    /// Recorded in each bundle; the display form of the trigger.
    pub trigger: String,
}

/// A [`BugReporter`] whose log stores are files on disk.
pub struct BundleReporter {
    config: BundleConfig,
    runtime: Handle,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl BundleReporter {
    pub fn new(config: BundleConfig, runtime: Handle) -> Self {
        Self {
            config,
            runtime,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    /// Capture every log store and write one bundle.
    pub async fn capture(&self) -> Result<PathBuf, ReportError> {
        capture(self.config.clone()).await
    }

    /// Wait for every report composed so far to be written.
    pub async fn flush(&self) {
        let pending = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        for task in pending {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "report task failed");
            }
        }
    }
}

impl BugReporter for BundleReporter {
    fn log_store_count(&self) -> usize {
        self.config.logs.len()
    }

    fn compose_bug_report(&self) {
        let config = self.config.clone();
        let task = self.runtime.spawn(async move {
            match capture(config).await {
                Ok(path) => tracing::info!(path = %path.display(), "bug report written"),
                Err(e) => tracing::error!(error = %e, "bug report failed"),
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|t| !t.is_finished());
        pending.push(task);
    }
}

async fn capture(config: BundleConfig) -> Result<PathBuf, ReportError> {
    let mut logs = Vec::with_capacity(config.logs.len());
    for path in &config.logs {
        logs.push(bundle::capture_tail(path, config.tail_bytes).await);
    }

    let bundle = ReportBundle::new(config.trigger, logs);
    tracing::debug!(id = %bundle.id, logs = bundle.logs.len(), "bundle captured");
    write_bundle(&config.out_dir, &bundle).await
}
