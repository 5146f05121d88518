//! Completed-download history and phase notifications.

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::jobs::{JobResult, OperationState};

/// One finished download.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub filename: String,
    pub source_url: String,
    pub file_path: PathBuf,
    pub file_size: Option<u64>,
    pub upload_url: Option<String>,
    pub timestamp: DateTime<Local>,
}

impl HistoryRecord {
    /// Build a record from a successful job result, stamped now.
    pub fn from_result(source_url: &str, result: &JobResult) -> Option<Self> {
        let path = result.output_path.clone()?;
        Some(Self {
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            source_url: source_url.to_string(),
            file_path: path,
            file_size: result.file_size,
            upload_url: result.share_url.clone(),
            timestamp: Local::now(),
        })
    }
}

/// Write-only sink for job notifications. Nothing reads it back mid-job.
pub trait HistorySink: Send + Sync {
    fn phase_changed(&self, job_id: &str, from: OperationState, to: OperationState);
    fn completed(&self, record: HistoryRecord);
}

/// Sink that only logs; used in tests and when no history file is wanted.
pub struct LogOnlySink;

impl HistorySink for LogOnlySink {
    fn phase_changed(&self, job_id: &str, from: OperationState, to: OperationState) {
        tracing::debug!("job {job_id}: {from} -> {to}");
    }

    fn completed(&self, record: HistoryRecord) {
        tracing::info!("completed: {}", record.filename);
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    history: Vec<HistoryRecord>,
}

/// History persisted as `{"history": [...]}`, newest first.
pub struct JsonHistory {
    path: PathBuf,
    records: Mutex<Vec<HistoryRecord>>,
}

impl JsonHistory {
    /// Open the file; an unreadable or corrupt file starts an empty history.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(s) => match serde_json::from_str::<HistoryFile>(&s) {
                Ok(f) => f.history,
                Err(e) => {
                    tracing::warn!("history file unreadable, starting fresh: {e}");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self {
            path,
            records: Mutex::new(records),
        }
    }

    pub fn records(&self) -> Vec<HistoryRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn find_by_source(&self, source_url: &str) -> Option<HistoryRecord> {
        self.records()
            .into_iter()
            .find(|r| r.source_url == source_url)
    }

    pub fn clear(&self) -> Result<()> {
        if let Ok(mut r) = self.records.lock() {
            r.clear();
        }
        self.save()
    }

    fn add(&self, record: HistoryRecord) -> Result<()> {
        if let Ok(mut r) = self.records.lock() {
            r.insert(0, record);
        }
        self.save()
    }

    fn save(&self) -> Result<()> {
        let file = HistoryFile {
            history: self.records(),
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistorySink for JsonHistory {
    fn phase_changed(&self, job_id: &str, from: OperationState, to: OperationState) {
        tracing::info!("job {job_id}: {from} -> {to}");
    }

    fn completed(&self, record: HistoryRecord) {
        if let Err(e) = self.add(record) {
            tracing::error!("failed to persist history: {e}");
        }
    }
}
