use std::path::PathBuf;

use crate::{AttemptId, JobId, SessionId};

/// Which progress events a popup's channel subscription lets through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFilter {
    /// Nothing is relevant.
    Detached,
    /// The start reply has not confirmed which job is ours yet.
    AcceptAll,
    Only(JobId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackEffect {
    /// Subscribe this popup to the shared progress channel.
    OpenChannel,
    /// Drop the subscription; the shared connection closes with its last subscriber.
    CloseChannel,
    /// Update the subscription's relevance filter in place.
    SetJobFilter(JobFilter),
    /// Issue start-or-fetch for the popup's context, proposing `proposed_job_id`
    /// as the new job's id.
    StartJob {
        attempt: AttemptId,
        proposed_job_id: JobId,
    },
    /// One-time success notification.
    NotifyReady { url: String },
    OpenLink { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEffect {
    StartUpload {
        session: SessionId,
        path: PathBuf,
        file_name: String,
        total_bytes: u64,
    },
    /// Abort every HTTP call tied to the session's signal.
    AbortUpload { session: SessionId },
    AskCloseConfirmation,
    AskDeleteConfirmation,
    SelectTargetLevel { path: String },
    DeleteCurrentFile,
    /// One-time success notification.
    NotifyUploaded { dl_link: String },
    /// The popup closed itself; the host should dismiss it.
    Dismiss,
}
