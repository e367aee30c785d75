//! Transfer core: pure popup state machines and view-model helpers.
//!
//! Nothing in this crate performs I/O. Hosts feed engine results in as
//! messages and execute the returned effects.
mod effect;
mod merge;
mod msg;
mod pack;
mod size;
mod state;
mod update;
mod upload;
mod view_model;

pub use effect::{JobFilter, PackEffect, UploadEffect};
pub use merge::{Completion, CompletionSlot, CompletionSource, Offer};
pub use msg::{PackMsg, UploadMsg};
pub use pack::{PackDownloadState, MAX_PACK_DOWNLOAD_BYTES};
pub use size::{
    format_estimated_size, format_file_size, summarize_folder_size, summarize_pack_size,
    EstimateLabel, PackItem, SizeSummary,
};
pub use state::{
    AttemptId, DownloadLink, JobId, JobProgress, JobStartReply, JobStatus, LevelFileEntry, Phase,
    PopupError, PopupErrorKind, SessionId, UploadReceipt, UploadStage, UploadStatus,
};
pub use update::{update_pack, update_upload};
pub use upload::{LevelUploadState, UploadSession, MAX_UPLOAD_BYTES};
pub use view_model::{
    LevelFileRow, PackViewModel, ProgressBarView, UploadProgressView, UploadViewModel,
};
