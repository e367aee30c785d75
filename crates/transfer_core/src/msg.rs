use std::path::PathBuf;

use crate::{
    AttemptId, JobId, JobProgress, JobStartReply, PopupError, SessionId, SizeSummary, UploadReceipt,
    UploadStage,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackMsg {
    /// Popup became visible for a pack or folder with this size estimate.
    Opened { size: SizeSummary },
    /// User clicked "Generate Download". The host mints `proposed_job_id` so the
    /// channel can watch it before the start call returns.
    ConfirmClicked { proposed_job_id: JobId },
    /// The start-or-fetch call for `attempt` returned.
    JobStartResolved {
        attempt: AttemptId,
        result: Result<JobStartReply, PopupError>,
    },
    /// An event arrived on the shared progress channel.
    ProgressReceived(JobProgress),
    /// User abandoned the current attempt; the popup stays open.
    CancelClicked,
    /// User clicked "Download" in the ready phase.
    DownloadClicked,
    /// Popup dismissed.
    Closed,
    /// Fallback for placeholder wiring.
    NoOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadMsg {
    /// Popup became visible; `has_current_file` reflects the level's existing upload.
    Opened { has_current_file: bool },
    /// User picked a file to upload.
    FileSelected {
        path: PathBuf,
        file_name: String,
        total_bytes: u64,
    },
    /// Server assigned the upload handle on the first chunk.
    FileIdAssigned { session: SessionId, file_id: String },
    /// A chunk was acknowledged; `bytes_sent` counts acknowledged bytes.
    ChunkAcknowledged { session: SessionId, bytes_sent: u64 },
    /// All chunks are in and the session moved to a server-side stage.
    StageChanged {
        session: SessionId,
        stage: UploadStage,
    },
    UploadCommitted {
        session: SessionId,
        receipt: UploadReceipt,
    },
    UploadFailed {
        session: SessionId,
        error: PopupError,
    },
    /// The engine observed the abort; never carries an error.
    UploadCancelled { session: SessionId },
    /// User clicked cancel while a session is active.
    CancelClicked,
    /// User tried to close the popup.
    CloseRequested,
    /// User confirmed closing despite an active upload.
    CloseConfirmed,
    /// User kept the popup open.
    CloseDismissed,
    /// User highlighted a level file from the uploaded archive.
    LevelHighlighted { path: String },
    /// User clicked "Select Level".
    SelectLevelClicked,
    TargetLevelResolved { result: Result<String, PopupError> },
    /// User clicked "Delete Current Level".
    DeleteClicked,
    DeleteConfirmed,
    DeleteDismissed,
    DeleteResolved { result: Result<(), PopupError> },
    /// Fallback for placeholder wiring.
    NoOp,
}
