//! Append-only transaction log of install actions.
//!
//! One JSON Lines file per archive log id under `<state>/logs/`. The log
//! records what happened for manual recovery; nothing replays it.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};
use crate::types::{DependencyKey, safe_file_stem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxAction {
    Created,
    Updated,
    Skipped,
    Failed,
    PackageStarted,
    PackageSucceeded,
    PackageAborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEntry {
    pub archive_log_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_log_id: Option<String>,
    pub txn: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<DependencyKey>,
    pub action: TxAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransactionLog {
    path: PathBuf,
}

impl TransactionLog {
    pub fn open(dir: &Path, archive_log_id: &str) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| DeployError::io(dir, e))?;
        Ok(Self {
            path: dir.join(format!("{}.jsonl", safe_file_stem(archive_log_id))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &TxEntry) -> Result<()> {
        let mut line =
            serde_json::to_vec(entry).map_err(|e| DeployError::serialization(&self.path, e))?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| DeployError::io(&self.path, e))?;
        file.write_all(&line)
            .map_err(|e| DeployError::io(&self.path, e))
    }

    pub fn entries(&self) -> Result<Vec<TxEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| DeployError::io(&self.path, e))?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| DeployError::serialization(&self.path, e))
            })
            .collect()
    }
}

/// Log id for one import of the archive named `archive_stem`.
pub fn new_archive_log_id(archive_stem: &str) -> String {
    format!(
        "{}-{}",
        safe_file_stem(archive_stem),
        Utc::now().format("%Y%m%d%H%M%S%3f")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(txn: u64, action: TxAction) -> TxEntry {
        TxEntry {
            archive_log_id: "a-1".into(),
            package_log_id: Some("a-1-1".into()),
            txn,
            timestamp: Utc::now(),
            key: Some(DependencyKey::new("Acl", "1")),
            action,
            target_id: Some("40".into()),
            message: None,
        }
    }

    #[test]
    fn entries_are_read_back_in_order() {
        let temp = TempDir::new().unwrap();
        let log = TransactionLog::open(temp.path(), "a-1").unwrap();
        log.append(&entry(1, TxAction::PackageStarted)).unwrap();
        log.append(&entry(2, TxAction::Created)).unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, TxAction::PackageStarted);
        assert_eq!(entries[1].txn, 2);
    }

    #[test]
    fn action_serializes_snake_case() {
        let json = serde_json::to_string(&TxAction::PackageAborted).unwrap();
        assert_eq!(json, "\"package_aborted\"");
    }
}
