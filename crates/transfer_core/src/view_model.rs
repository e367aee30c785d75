use crate::{DownloadLink, Phase, PopupError, UploadStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackViewModel {
    pub open: bool,
    pub phase: Phase,
    pub size_label: String,
    pub estimate_note: Option<String>,
    pub exceeds_limit: bool,
    pub can_confirm: bool,
    pub error: Option<PopupError>,
    /// Present only once a progress event for the tracked job has been applied.
    pub progress_bar: Option<ProgressBarView>,
    pub link: Option<DownloadLink>,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressBarView {
    pub percent: u8,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadViewModel {
    pub open: bool,
    pub phase: Phase,
    pub progress: Option<UploadProgressView>,
    pub error: Option<PopupError>,
    pub awaiting_close_confirmation: bool,
    pub awaiting_delete_confirmation: bool,
    pub can_delete: bool,
    pub dl_link: Option<String>,
    pub level_files: Vec<LevelFileRow>,
    pub can_select: bool,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProgressView {
    pub file_name: String,
    pub status: UploadStatus,
    pub bytes_sent: u64,
    pub total_bytes: u64,
    pub percent: u8,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelFileRow {
    pub path: String,
    pub name: String,
    pub size_label: Option<String>,
    pub highlighted: bool,
    pub is_target: bool,
}
