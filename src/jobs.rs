//! Job model and lifecycle states.

use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf};
use uuid::Uuid;

/// Lifecycle state of one job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Accepted but not started.
    Idle,
    /// Asking the downloader for video metadata.
    FetchingMetadata,
    /// Downloading media.
    Downloading,
    /// Transcoding into the target container.
    Converting,
    /// Uploading the result.
    Uploading,
    /// Finished successfully.
    Completed,
    /// Stopped by the user.
    Cancelled,
    /// Failed (see the job's error text).
    Error,
}

impl OperationState {
    pub const ALL: [OperationState; 8] = [
        OperationState::Idle,
        OperationState::FetchingMetadata,
        OperationState::Downloading,
        OperationState::Converting,
        OperationState::Uploading,
        OperationState::Completed,
        OperationState::Cancelled,
        OperationState::Error,
    ];

    pub fn is_active(self) -> bool {
        matches!(
            self,
            OperationState::FetchingMetadata
                | OperationState::Downloading
                | OperationState::Converting
                | OperationState::Uploading
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Cancelled | OperationState::Error
        )
    }

    /// Stable lowercase name, also used as the progress phase label.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationState::Idle => "idle",
            OperationState::FetchingMetadata => "fetching_metadata",
            OperationState::Downloading => "downloading",
            OperationState::Converting => "converting",
            OperationState::Uploading => "uploading",
            OperationState::Completed => "completed",
            OperationState::Cancelled => "cancelled",
            OperationState::Error => "error",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which optional phases a job runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobToggles {
    pub convert: bool,
    pub upload: bool,
}

impl Default for JobToggles {
    fn default() -> Self {
        Self {
            convert: true,
            upload: false,
        }
    }
}

/// One user request, owned by the workflow that drives it.
#[derive(Clone, Debug)]
pub struct Job {
    /// Short stable id, also used in container names.
    pub id: String,
    /// Source video URL.
    pub url: String,
    /// Title learned from metadata (empty until fetched).
    pub title: String,
    /// Optional user-chosen output name.
    pub custom_name: Option<String>,
    /// Current lifecycle state.
    pub state: OperationState,
    /// Progress of the current phase (0-100).
    pub progress: f64,
    /// Human readable status line.
    pub status: String,
    /// Error text once the job failed.
    pub error: Option<String>,
    /// Final output file.
    pub output_path: Option<PathBuf>,
    /// Share URL returned by the upload endpoint.
    pub share_url: Option<String>,
    /// Size of the final output file.
    pub file_size: Option<u64>,
    pub include_conversion: bool,
    pub include_upload: bool,
}

impl Job {
    /// Create an idle job with a fresh 8-char id.
    pub fn new(url: impl Into<String>, custom_name: Option<String>, toggles: JobToggles) -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self {
            id,
            url: url.into(),
            title: String::new(),
            custom_name,
            state: OperationState::Idle,
            progress: 0.0,
            status: String::new(),
            error: None,
            output_path: None,
            share_url: None,
            file_size: None,
            include_conversion: toggles.convert,
            include_upload: toggles.upload,
        }
    }

    /// Title if known, else the custom name, else a shortened URL.
    pub fn display_name(&self) -> String {
        if !self.title.is_empty() {
            self.title.clone()
        } else if let Some(name) = self.custom_name.as_ref().filter(|n| !n.is_empty()) {
            name.clone()
        } else if self.url.chars().count() > 40 {
            format!("{}...", self.url.chars().take(40).collect::<String>())
        } else {
            self.url.clone()
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Observable view pushed to the front end.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            name: self.display_name(),
            state: self.state,
            progress: self.progress,
            status: self.status.clone(),
            error: self.error.clone(),
        }
    }
}

/// What a front end sees of a running job.
#[derive(Clone, Debug, PartialEq)]
pub struct JobSnapshot {
    pub id: String,
    pub name: String,
    pub state: OperationState,
    pub progress: f64,
    pub status: String,
    pub error: Option<String>,
}

/// Final outcome of one job.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobResult {
    pub success: bool,
    pub cancelled: bool,
    pub output_path: Option<PathBuf>,
    pub share_url: Option<String>,
    pub file_size: Option<u64>,
    pub error: Option<String>,
}

impl JobResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            error: Some("Cancelled".into()),
            ..Self::default()
        }
    }
}
