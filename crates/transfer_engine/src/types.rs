use std::fmt;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

pub type JobId = String;

/// Server-assigned identifier of one chunked upload session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileId(pub String);

impl FileId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureKind {
    #[error("chunk {chunk_index} failed after {attempts} attempt(s): {message}")]
    Transport {
        chunk_index: u32,
        attempts: u32,
        message: String,
    },
    #[error("upload validation failed: {0}")]
    Validation(String),
    #[error("commit failed: {0}")]
    Commit(String),
    #[error("pack job could not be started: {0}")]
    JobStart(String),
    #[error("pack job failed: {0}")]
    JobFailed(String),
    #[error("estimated size {estimated_bytes} bytes exceeds the {limit_bytes} byte limit")]
    SizeExceeded { estimated_bytes: u64, limit_bytes: u64 },
}

impl FailureKind {
    /// Text suitable for showing in a popup.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport { message, .. } => format!("Upload failed: {message}"),
            Self::Validation(message)
            | Self::Commit(message)
            | Self::JobStart(message)
            | Self::JobFailed(message) => message.clone(),
            Self::SizeExceeded { .. } => self.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The operation observed its abort signal. Never shown as an error.
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Failed(#[from] FailureKind),
}

impl TransferError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Failure to build the engine's clients or runtime.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Sending,
    Validating,
    Committing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_sent: u64,
    pub total_bytes: u64,
    pub percent: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    FileIdAssigned(FileId),
    Progress(TransferProgress),
    Stage(UploadStage),
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: UploadEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(UploadEvent) + Send + Sync,
{
    fn emit(&self, event: UploadEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LevelRecord {
    pub id: u64,
    #[serde(default, rename = "dlLink")]
    pub dl_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LevelFile {
    pub name: String,
    #[serde(default, alias = "fullPath")]
    pub path: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl LevelFile {
    pub fn path_or_name(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub dl_link: String,
    pub level: Option<LevelRecord>,
    pub level_files: Vec<LevelFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLink {
    pub url: String,
    pub job_id: Option<JobId>,
    pub expires_at: Option<String>,
}

/// Reply to a start-or-fetch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStart {
    /// A valid artifact already exists.
    Ready(DownloadLink),
    Enqueued { job_id: JobId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Zipping,
    Uploading,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    #[serde(rename = "downloadId", alias = "jobId")]
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(default, deserialize_with = "percent_from_number")]
    pub progress_percent: u8,
    #[serde(default, rename = "currentLevel", alias = "currentItem")]
    pub current_item: Option<String>,
    #[serde(default, rename = "processedLevels", alias = "processedItems")]
    pub processed_items: Option<u32>,
    #[serde(default, rename = "totalLevels", alias = "totalItems")]
    pub total_items: Option<u32>,
    #[serde(default, rename = "error", alias = "errorMessage")]
    pub error_message: Option<String>,
    #[serde(default, rename = "url", alias = "resultUrl")]
    pub result_url: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

fn percent_from_number<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0);
    if value.is_nan() {
        return Ok(0);
    }
    Ok(value.clamp(0.0, 100.0).floor() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_event_accepts_wire_names_and_fractional_percent() {
        let event: JobProgressEvent = serde_json::from_str(
            r#"{"downloadId":"d-1","status":"processing","progressPercent":41.7,
                "currentLevel":"Song A","processedLevels":3,"totalLevels":9}"#,
        )
        .unwrap();
        assert_eq!(event.job_id, "d-1");
        assert_eq!(event.status, JobStatus::Processing);
        assert_eq!(event.progress_percent, 41);
        assert_eq!(event.current_item.as_deref(), Some("Song A"));
        assert_eq!(event.total_items, Some(9));
        assert!(event.result_url.is_none());
    }

    #[test]
    fn percent_is_clamped() {
        let event: JobProgressEvent =
            serde_json::from_str(r#"{"downloadId":"d","status":"zipping","progressPercent":140}"#)
                .unwrap();
        assert_eq!(event.progress_percent, 100);
    }

    #[test]
    fn transport_message_names_chunk() {
        let failure = FailureKind::Transport {
            chunk_index: 3,
            attempts: 4,
            message: "connection reset".into(),
        };
        assert_eq!(
            failure.to_string(),
            "chunk 3 failed after 4 attempt(s): connection reset"
        );
        assert!(TransferError::Cancelled.is_cancelled());
    }
}
