use transfer_core::{
    format_file_size, JobFilter, JobProgress, JobStartReply, JobStatus, LevelFileEntry, PackEffect,
    PackMsg, PopupError, PopupErrorKind, UploadEffect, UploadMsg, UploadReceipt, UploadStage,
};
use transfer_engine::{
    CommitReceipt, EngineEvent, EngineHandle, FailureKind, JobProgressEvent, JobStart,
    PackContext, PopupId, RelevanceFilter, TransferError, UploadEvent, UploadRequest,
};
use transfer_logging::{xfer_debug, xfer_info, xfer_warn};

/// Effects the engine cannot carry out; the interactive host handles them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAction {
    ConfirmClose,
    ConfirmDelete,
    Uploaded { dl_link: String },
    PackReady { url: String },
    OpenLink { url: String },
    Dismiss,
}

/// Executes core effects against the engine for one popup.
pub struct EffectRunner {
    engine: EngineHandle,
    popup: PopupId,
}

impl EffectRunner {
    pub fn new(engine: EngineHandle, popup: PopupId) -> Self {
        Self { engine, popup }
    }

    pub fn popup(&self) -> PopupId {
        self.popup
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn run_upload(&self, level_id: u64, effects: Vec<UploadEffect>) -> Vec<HostAction> {
        let mut actions = Vec::new();
        for effect in effects {
            match effect {
                UploadEffect::StartUpload {
                    session,
                    path,
                    file_name,
                    total_bytes,
                } => {
                    xfer_info!(
                        "StartUpload session={} level={} bytes={} path={:?}",
                        session,
                        level_id,
                        total_bytes,
                        path
                    );
                    self.engine.start_upload(
                        self.popup,
                        session,
                        UploadRequest {
                            level_id,
                            path,
                            file_name: Some(file_name),
                        },
                    );
                }
                UploadEffect::AbortUpload { session } => {
                    xfer_info!("AbortUpload session={session}");
                    self.engine.cancel_upload(self.popup);
                }
                UploadEffect::AskCloseConfirmation => actions.push(HostAction::ConfirmClose),
                UploadEffect::AskDeleteConfirmation => actions.push(HostAction::ConfirmDelete),
                UploadEffect::SelectTargetLevel { path } => {
                    self.engine.select_level(self.popup, level_id, path);
                }
                UploadEffect::DeleteCurrentFile => self.engine.delete_upload(self.popup, level_id),
                UploadEffect::NotifyUploaded { dl_link } => {
                    actions.push(HostAction::Uploaded { dl_link })
                }
                UploadEffect::Dismiss => {
                    self.engine.release(self.popup);
                    actions.push(HostAction::Dismiss);
                }
            }
        }
        actions
    }

    pub fn run_pack(
        &self,
        context: &PackContext,
        estimated_bytes: Option<u64>,
        effects: Vec<PackEffect>,
    ) -> Vec<HostAction> {
        let mut actions = Vec::new();
        for effect in effects {
            match effect {
                PackEffect::OpenChannel => self.engine.open_watch(self.popup),
                PackEffect::CloseChannel => {
                    self.engine.close_watch(self.popup);
                    actions.push(HostAction::Dismiss);
                }
                PackEffect::SetJobFilter(filter) => {
                    self.engine.set_filter(self.popup, relevance_filter(filter))
                }
                PackEffect::StartJob {
                    attempt,
                    proposed_job_id,
                } => {
                    xfer_info!(
                        "StartJob attempt={} pack={} proposed={}",
                        attempt,
                        context.pack_id,
                        proposed_job_id
                    );
                    self.engine.start_job(
                        self.popup,
                        attempt,
                        context.clone(),
                        estimated_bytes,
                        proposed_job_id,
                    );
                }
                PackEffect::NotifyReady { url } => actions.push(HostAction::PackReady { url }),
                PackEffect::OpenLink { url } => actions.push(HostAction::OpenLink { url }),
            }
        }
        actions
    }
}

pub fn relevance_filter(filter: JobFilter) -> RelevanceFilter {
    match filter {
        JobFilter::Detached => RelevanceFilter::Detached,
        JobFilter::AcceptAll => RelevanceFilter::AcceptAll,
        JobFilter::Only(job_id) => RelevanceFilter::Only(job_id),
    }
}

/// Translates an engine event into an upload-popup message. Events for other
/// popups and pack events map to `None`.
pub fn upload_msg(popup: PopupId, event: EngineEvent) -> Option<UploadMsg> {
    match event {
        EngineEvent::Upload {
            popup: from,
            session,
            event,
        } if from == popup => match event {
            UploadEvent::FileIdAssigned(file_id) => Some(UploadMsg::FileIdAssigned {
                session,
                file_id: file_id.0,
            }),
            UploadEvent::Progress(progress) => Some(UploadMsg::ChunkAcknowledged {
                session,
                bytes_sent: progress.bytes_sent,
            }),
            UploadEvent::Stage(stage) => map_stage(stage).map(|stage| UploadMsg::StageChanged {
                session,
                stage,
            }),
        },
        EngineEvent::UploadFinished {
            popup: from,
            session,
            result,
        } if from == popup => Some(match result {
            Ok(receipt) => UploadMsg::UploadCommitted {
                session,
                receipt: map_receipt(receipt),
            },
            Err(TransferError::Cancelled) => UploadMsg::UploadCancelled { session },
            Err(TransferError::Failed(failure)) => {
                xfer_warn!("upload session {session} failed: {failure}");
                UploadMsg::UploadFailed {
                    session,
                    error: popup_error(&failure),
                }
            }
        }),
        EngineEvent::TargetLevelSelected {
            popup: from,
            result,
        } if from == popup => Some(UploadMsg::TargetLevelResolved {
            result: result.map_err(|err| transfer_error(&err, PopupErrorKind::Commit)),
        }),
        EngineEvent::UploadDeleted {
            popup: from,
            result,
        } if from == popup => Some(UploadMsg::DeleteResolved {
            result: result.map_err(|err| transfer_error(&err, PopupErrorKind::Commit)),
        }),
        other => {
            xfer_debug!("upload popup {popup} ignores {other:?}");
            None
        }
    }
}

/// Translates an engine event into a pack-popup message.
pub fn pack_msg(popup: PopupId, event: EngineEvent) -> Option<PackMsg> {
    match event {
        EngineEvent::JobStartResolved {
            popup: from,
            attempt,
            result,
        } if from == popup => Some(PackMsg::JobStartResolved {
            attempt,
            result: match result {
                Ok(JobStart::Ready(link)) => Ok(JobStartReply::Cached {
                    url: link.url,
                    job_id: link.job_id,
                    expires_at: link.expires_at,
                }),
                Ok(JobStart::Enqueued { job_id }) => Ok(JobStartReply::Enqueued { job_id }),
                Err(err) => Err(transfer_error(&err, PopupErrorKind::JobStart)),
            },
        }),
        EngineEvent::JobProgress { popup: from, event } if from == popup => {
            Some(PackMsg::ProgressReceived(map_progress(event)))
        }
        _ => None,
    }
}

fn map_stage(stage: transfer_engine::UploadStage) -> Option<UploadStage> {
    match stage {
        transfer_engine::UploadStage::Sending => None,
        transfer_engine::UploadStage::Validating => Some(UploadStage::Validating),
        transfer_engine::UploadStage::Committing => Some(UploadStage::Committing),
    }
}

fn map_status(status: transfer_engine::JobStatus) -> JobStatus {
    match status {
        transfer_engine::JobStatus::Queued => JobStatus::Queued,
        transfer_engine::JobStatus::Processing => JobStatus::Processing,
        transfer_engine::JobStatus::Zipping => JobStatus::Zipping,
        transfer_engine::JobStatus::Uploading => JobStatus::Uploading,
        transfer_engine::JobStatus::Completed => JobStatus::Completed,
        transfer_engine::JobStatus::Failed => JobStatus::Failed,
    }
}

fn map_progress(event: JobProgressEvent) -> JobProgress {
    JobProgress {
        job_id: event.job_id,
        status: map_status(event.status),
        progress_percent: event.progress_percent,
        current_item: event.current_item,
        processed_items: event.processed_items,
        total_items: event.total_items,
        error_message: event.error_message,
        result_url: event.result_url,
        expires_at: event.expires_at,
    }
}

fn map_receipt(receipt: CommitReceipt) -> UploadReceipt {
    UploadReceipt {
        dl_link: receipt.dl_link,
        level_files: receipt
            .level_files
            .into_iter()
            .map(|file| LevelFileEntry {
                path: file.path_or_name().to_string(),
                name: file.name,
                size_bytes: file.size,
            })
            .collect(),
    }
}

pub fn popup_error(failure: &FailureKind) -> PopupError {
    match failure {
        FailureKind::Transport { .. } => {
            PopupError::new(PopupErrorKind::Transport, failure.user_message())
        }
        FailureKind::Validation(message) => PopupError::new(PopupErrorKind::Validation, message),
        FailureKind::Commit(message) => PopupError::new(PopupErrorKind::Commit, message),
        FailureKind::JobStart(message) => PopupError::new(PopupErrorKind::JobStart, message),
        FailureKind::JobFailed(message) => PopupError::new(PopupErrorKind::JobFailed, message),
        FailureKind::SizeExceeded {
            estimated_bytes,
            limit_bytes,
        } => PopupError::new(
            PopupErrorKind::SizeExceeded,
            format!(
                "Estimated size {} exceeds the {} download limit.",
                format_file_size(*estimated_bytes),
                format_file_size(*limit_bytes)
            ),
        ),
    }
}

fn transfer_error(err: &TransferError, cancelled_kind: PopupErrorKind) -> PopupError {
    match err {
        TransferError::Failed(failure) => popup_error(failure),
        TransferError::Cancelled => PopupError::new(cancelled_kind, "Request was cancelled."),
    }
}
