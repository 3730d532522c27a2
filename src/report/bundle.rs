//! Report bundle format.
//!
//! One bundle per composed report, stored as a single MessagePack map
//! (`rmp_serde::to_vec_named`) in `bugreport-<created_ms>-<id>.msgpack`.
//! Log tails are raw bytes; nothing is assumed about their encoding.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;

use super::ReportError;

/// A captured bug report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportBundle {
    pub id: Uuid,
    /// Unix epoch milliseconds when the report was composed.
    pub created_ms: u64,
    /// Display form of the trigger that fired.
    pub trigger: String,
    pub host: String,
    pub logs: Vec<LogExcerpt>,
}

/// The tail of one log store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogExcerpt {
    pub path: String,
    /// File size at capture time.
    pub size: u64,
    /// True when `tail` starts after the beginning of the file.
    pub truncated: bool,
    #[serde(with = "serde_bytes")]
    pub tail: Vec<u8>,
    /// Set when the file could not be read; `tail` is then empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReportBundle {
    pub fn new(trigger: String, logs: Vec<LogExcerpt>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_ms: epoch_millis(),
            trigger,
            host: host_name(),
            logs,
        }
    }

    pub fn file_name(&self) -> String {
        format!("bugreport-{}-{}.msgpack", self.created_ms, self.id)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ReportError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ReportError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Capture the last `tail_bytes` of `path`.
///
/// Never fails: an unreadable file becomes an excerpt carrying the error,
/// so one bad log store doesn't lose the others.
pub async fn capture_tail(path: &Path, tail_bytes: u64) -> LogExcerpt {
    match read_tail(path, tail_bytes).await {
        Ok((size, tail)) => LogExcerpt {
            path: path.display().to_string(),
            size,
            truncated: size > tail.len() as u64,
            tail,
            error: None,
        },
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "log store unreadable");
            LogExcerpt {
                path: path.display().to_string(),
                size: 0,
                truncated: false,
                tail: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    }
}

async fn read_tail(path: &Path, tail_bytes: u64) -> Result<(u64, Vec<u8>), std::io::Error> {
    let mut file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    let start = size.saturating_sub(tail_bytes);
    file.seek(std::io::SeekFrom::Start(start)).await?;

    let mut tail = Vec::new();
    file.take(tail_bytes).read_to_end(&mut tail).await?;
    Ok((size, tail))
}

/// Write `bundle` into `dir`, creating the directory if needed.
pub async fn write_bundle(dir: &Path, bundle: &ReportBundle) -> Result<PathBuf, ReportError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(bundle.file_name());
    tokio::fs::write(&path, bundle.encode()?).await?;
    Ok(path)
}

/// Read a bundle written by [`write_bundle`].
pub async fn read_bundle(path: &Path) -> Result<ReportBundle, ReportError> {
    let bytes = tokio::fs::read(path).await?;
    ReportBundle::decode(&bytes)
}

/// Print a bundle summary to stdout, followed by each log tail.
pub fn print_bundle(bundle: &ReportBundle) {
    println!("id:       {}", bundle.id);
    println!("created:  {}", bundle.created_ms);
    println!("trigger:  {}", bundle.trigger);
    println!("host:     {}", bundle.host);
    println!();

    if bundle.logs.is_empty() {
        println!("No log stores captured");
        return;
    }

    println!("{:<48} {:>10} {:>10} FLAGS", "PATH", "SIZE", "CAPTURED");
    println!("{}", "-".repeat(80));
    for log in &bundle.logs {
        println!(
            "{:<48} {:>10} {:>10} {}",
            log.path,
            log.size,
            log.tail.len(),
            format_flags(log),
        );
    }

    for log in bundle.logs.iter().filter(|l| !l.tail.is_empty()) {
        println!();
        println!("==> {} <==", log.path);
        print!("{}", String::from_utf8_lossy(&log.tail));
        if !log.tail.ends_with(b"\n") {
            println!();
        }
    }
}

fn format_flags(log: &LogExcerpt) -> String {
    match (&log.error, log.truncated) {
        (Some(e), _) => format!("error: {e}"),
        (None, true) => "truncated".into(),
        (None, false) => "-".into(),
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

fn host_name() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".into())
}
