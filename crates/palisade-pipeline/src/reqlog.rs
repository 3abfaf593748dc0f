//! Append-only structured request log (JSONL).
//!
//! Privacy invariant: records carry lengths, hashes, layer names, and
//! model accounting — never the message text, the response text, or a raw
//! ip. The record type has no field that could hold them.

use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::trace::ModelCallRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub request_id: String,
    pub client_ip_hash: String,
    pub input_length: usize,
    pub layers_passed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_at_layer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_matched: Option<String>,
    pub response_time_ms: u64,
    pub model_calls: Vec<ModelCallRecord>,
}

pub struct RequestLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RequestLog {
    /// Open (creating parent directories) the log at `path`.
    pub fn new(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Append one record. Log failures are reported to tracing and
    /// swallowed — a broken log disk must not take chat down.
    pub async fn write(&self, record: &LogRecord) {
        let _guard = self.lock.lock().await;
        if let Err(e) = self.append(record) {
            warn!(error = %e, "request log write failed");
        }
    }

    fn append(&self, record: &LogRecord) -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(record)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Read every record back. Used by the admin analytics endpoint and
    /// tests; the hot path only appends.
    pub fn read_all(&self) -> std::io::Result<Vec<LogRecord>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}
