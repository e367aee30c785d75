use std::fmt;

/// Server-side identifier of an archive-generation job (`downloadId`).
pub type JobId = String;

/// Monotonic counter identifying one confirm attempt of a pack popup.
///
/// Replies tagged with an older attempt are stale and ignored.
pub type AttemptId = u64;

/// Identifier of one upload session within a single upload popup.
pub type SessionId = u64;

/// What the popup renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Confirm,
    Processing,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupErrorKind {
    /// Chunk send failed after retries; restart the whole session.
    Transport,
    /// Server refused to reassemble the chunks; re-upload required.
    Validation,
    /// Bytes arrived but the follow-up metadata call was rejected.
    Commit,
    /// Request to begin or find a job failed.
    JobStart,
    /// Server reported the job itself failed.
    JobFailed,
    /// Pre-flight size check rejected the request locally.
    SizeExceeded,
}

/// Error surfaced to the user in the confirm phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupError {
    pub kind: PopupErrorKind,
    pub message: String,
}

impl PopupError {
    pub fn new(kind: PopupErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for PopupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A progress notification for one job, already decoded by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobProgress {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub current_item: Option<String>,
    pub processed_items: Option<u32>,
    pub total_items: Option<u32>,
    pub error_message: Option<String>,
    pub result_url: Option<String>,
    pub expires_at: Option<String>,
}

impl JobProgress {
    /// Bare event with only the required fields set.
    pub fn new(job_id: impl Into<JobId>, status: JobStatus, progress_percent: u8) -> Self {
        Self {
            job_id: job_id.into(),
            status,
            progress_percent,
            current_item: None,
            processed_items: None,
            total_items: None,
            error_message: None,
            result_url: None,
            expires_at: None,
        }
    }
}

/// A downloadable archive link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLink {
    pub url: String,
    pub job_id: Option<JobId>,
    pub expires_at: Option<String>,
}

impl DownloadLink {
    /// Accepts only absolute http(s) links.
    pub fn parse(
        url: &str,
        job_id: Option<JobId>,
        expires_at: Option<String>,
    ) -> Option<DownloadLink> {
        let parsed = url::Url::parse(url).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }
        Some(DownloadLink {
            url: parsed.to_string(),
            job_id,
            expires_at,
        })
    }
}

/// The two shapes a job-start reply may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStartReply {
    /// The archive already exists; no waiting needed.
    Cached {
        url: String,
        job_id: Option<JobId>,
        expires_at: Option<String>,
    },
    /// A job was enqueued; completion arrives over the progress channel.
    Enqueued { job_id: JobId },
}

/// Where a live session is. Finished sessions are dropped, not kept with a
/// terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Sending,
    Validating,
    Committing,
}

/// Server-side stage reached after all chunks are acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Validating,
    Committing,
}

/// A level file found inside an uploaded archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelFileEntry {
    pub path: String,
    pub name: String,
    pub size_bytes: Option<u64>,
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub dl_link: String,
    pub level_files: Vec<LevelFileEntry>,
}
