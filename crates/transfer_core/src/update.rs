use crate::merge::CompletionSource;
use crate::{
    DownloadLink, JobFilter, JobStartReply, LevelUploadState, PackDownloadState, PackEffect,
    PackMsg, Phase, PopupError, PopupErrorKind, UploadEffect, UploadMsg,
};

const MISSING_LINK: &str = "Download link was not returned by the server.";

/// Pure update function for the pack-download popup.
pub fn update_pack(
    mut state: PackDownloadState,
    msg: PackMsg,
) -> (PackDownloadState, Vec<PackEffect>) {
    let mut effects = Vec::new();
    match msg {
        PackMsg::Opened { size } => {
            if state.open(size) {
                effects.push(PackEffect::OpenChannel);
                effects.push(PackEffect::SetJobFilter(JobFilter::Detached));
            }
        }
        PackMsg::ConfirmClicked { proposed_job_id } => {
            if state.is_open() && state.phase() == Phase::Confirm {
                if state.exceeds_ceiling() {
                    // Rejected locally; start-or-fetch is never issued.
                    state.reject_oversized();
                } else {
                    state.begin_attempt(proposed_job_id, &mut effects);
                }
            }
        }
        PackMsg::JobStartResolved { attempt, result } => {
            if state.is_current(attempt) {
                state.start_answered();
                match result {
                    Ok(JobStartReply::Cached {
                        url,
                        job_id,
                        expires_at,
                    }) => match DownloadLink::parse(&url, job_id, expires_at) {
                        Some(link) => state.settle(link, CompletionSource::Response, &mut effects),
                        None => state.fail(
                            PopupError::new(PopupErrorKind::JobStart, MISSING_LINK),
                            &mut effects,
                        ),
                    },
                    Ok(JobStartReply::Enqueued { job_id }) => state.track(job_id, &mut effects),
                    Err(error) => state.fail(error, &mut effects),
                }
            }
        }
        PackMsg::ProgressReceived(event) => state.receive(event, &mut effects),
        PackMsg::CancelClicked => {
            // UI-local: the server-side job keeps running and can be fetched later.
            if state.is_open() && state.phase() != Phase::Confirm {
                state.reset_attempt();
                effects.push(PackEffect::SetJobFilter(JobFilter::Detached));
            }
        }
        PackMsg::DownloadClicked => {
            if state.phase() == Phase::Ready {
                if let Some(link) = state.link() {
                    effects.push(PackEffect::OpenLink {
                        url: link.url.clone(),
                    });
                }
            }
        }
        PackMsg::Closed => {
            if state.close() {
                effects.push(PackEffect::SetJobFilter(JobFilter::Detached));
                effects.push(PackEffect::CloseChannel);
            }
        }
        PackMsg::NoOp => {}
    }

    (state, effects)
}

/// Pure update function for the level-upload popup.
pub fn update_upload(
    mut state: LevelUploadState,
    msg: UploadMsg,
) -> (LevelUploadState, Vec<UploadEffect>) {
    let mut effects = Vec::new();
    match msg {
        UploadMsg::Opened { has_current_file } => {
            state.open(has_current_file);
        }
        UploadMsg::FileSelected {
            path,
            file_name,
            total_bytes,
        } => state.start(path, file_name, total_bytes, &mut effects),
        UploadMsg::FileIdAssigned { session, file_id } => state.assign_file_id(session, file_id),
        UploadMsg::ChunkAcknowledged {
            session,
            bytes_sent,
        } => state.acknowledge(session, bytes_sent),
        UploadMsg::StageChanged { session, stage } => state.advance(session, stage),
        UploadMsg::UploadCommitted { session, receipt } => {
            state.complete(session, receipt, &mut effects)
        }
        UploadMsg::UploadFailed { session, error } => state.fail(session, error),
        UploadMsg::UploadCancelled { session } => state.cancelled(session),
        UploadMsg::CancelClicked => {
            state.abort(&mut effects);
        }
        UploadMsg::CloseRequested => state.request_close(&mut effects),
        UploadMsg::CloseConfirmed => state.confirm_close(&mut effects),
        UploadMsg::CloseDismissed => state.dismiss_close(),
        UploadMsg::LevelHighlighted { path } => state.highlight(path),
        UploadMsg::SelectLevelClicked => state.request_selection(&mut effects),
        UploadMsg::TargetLevelResolved { result } => state.resolve_selection(result, &mut effects),
        UploadMsg::DeleteClicked => state.request_delete(&mut effects),
        UploadMsg::DeleteConfirmed => state.confirm_delete(&mut effects),
        UploadMsg::DeleteDismissed => state.dismiss_delete(),
        UploadMsg::DeleteResolved { result } => state.resolve_delete(result, &mut effects),
        UploadMsg::NoOp => {}
    }

    (state, effects)
}
