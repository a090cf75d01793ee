//! Append-only decision log.

use crate::org::OrgId;
use crate::scoring::Action;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// One logged decision. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub org_id: OrgId,
    pub action: Action,
    /// Full decision payload.
    pub reason: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum DecisionLogError {
    #[error("decision log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode decision log entry: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("decision log backend error: {0}")]
    Backend(String),
}

/// Sink for decision log entries.
#[async_trait]
pub trait DecisionLog: Send + Sync {
    async fn append(&self, entry: DecisionLogEntry) -> Result<(), DecisionLogError>;
}

/// In-process log, inspectable through [`MemoryDecisionLog::entries`].
#[derive(Debug, Default)]
pub struct MemoryDecisionLog {
    entries: Mutex<Vec<DecisionLogEntry>>,
}

impl MemoryDecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<DecisionLogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DecisionLog for MemoryDecisionLog {
    async fn append(&self, entry: DecisionLogEntry) -> Result<(), DecisionLogError> {
        self.entries
            .lock()
            .map_err(|_| DecisionLogError::Backend("decision log lock poisoned".to_string()))?
            .push(entry);
        Ok(())
    }
}

/// Log that emits each entry as a `tracing` event and keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDecisionLog;

#[async_trait]
impl DecisionLog for TracingDecisionLog {
    async fn append(&self, entry: DecisionLogEntry) -> Result<(), DecisionLogError> {
        let reason = serde_json::to_string(&entry.reason)?;
        info!(
            target: "decision_log",
            org_id = entry.org_id,
            action = %entry.action,
            created_at = %entry.created_at.to_rfc3339(),
            reason = %reason,
            "Decision recorded"
        );
        Ok(())
    }
}

/// JSON-lines file log, one entry per line.
pub struct JsonlDecisionLog {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlDecisionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DecisionLog for JsonlDecisionLog {
    async fn append(&self, entry: DecisionLogEntry) -> Result<(), DecisionLogError> {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn entry(action: Action) -> DecisionLogEntry {
        DecisionLogEntry {
            org_id: 1,
            action,
            reason: json!({"action": action.as_str(), "risk_score": 0.1}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_log_appends_in_order() {
        let log = MemoryDecisionLog::new();
        assert!(log.is_empty());

        log.append(entry(Action::Allow)).await.unwrap();
        log.append(entry(Action::Deny)).await.unwrap();

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, Action::Allow);
        assert_eq!(entries[1].action, Action::Deny);
    }

    #[tokio::test]
    async fn test_tracing_log_accepts_entries() {
        let log = TracingDecisionLog;
        for _ in 0..3 {
            log.append(entry(Action::Deny)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_jsonl_log_writes_one_line_per_entry() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("logs").join("decisions.jsonl");
        let log = JsonlDecisionLog::new(&path);

        log.append(entry(Action::Flag)).await.unwrap();
        log.append(entry(Action::Deny)).await.unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: DecisionLogEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.action, Action::Flag);
        assert_eq!(first.org_id, 1);
        assert_eq!(first.reason["risk_score"], json!(0.1));
    }
}
