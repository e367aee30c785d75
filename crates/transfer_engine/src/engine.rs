use std::collections::HashMap;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use transfer_logging::{xfer_debug, xfer_info};

use crate::{
    CancellationController, CommitReceipt, JobId, JobProgressEvent, JobRequester, JobStart,
    LatestBox, LevelFileClient, LevelUploader, PackContext, ProgressHub, ProgressSink,
    RelevanceFilter, SetupError, TransferError, TransferSettings, UploadEvent, UploadRequest,
};

/// Identifies one open popup. Commands and events for different popups never mix.
pub type PopupId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Upload {
        popup: PopupId,
        session: u64,
        event: UploadEvent,
    },
    UploadFinished {
        popup: PopupId,
        session: u64,
        result: Result<CommitReceipt, TransferError>,
    },
    JobStartResolved {
        popup: PopupId,
        attempt: u64,
        result: Result<JobStart, TransferError>,
    },
    JobProgress {
        popup: PopupId,
        event: JobProgressEvent,
    },
    TargetLevelSelected {
        popup: PopupId,
        result: Result<String, TransferError>,
    },
    UploadDeleted {
        popup: PopupId,
        result: Result<(), TransferError>,
    },
}

enum EngineCommand {
    StartUpload {
        popup: PopupId,
        session: u64,
        request: UploadRequest,
    },
    CancelUpload {
        popup: PopupId,
    },
    OpenWatch {
        popup: PopupId,
    },
    SetFilter {
        popup: PopupId,
        filter: RelevanceFilter,
    },
    CloseWatch {
        popup: PopupId,
    },
    StartJob {
        popup: PopupId,
        attempt: u64,
        context: PackContext,
        estimated_bytes: Option<u64>,
        proposed_id: JobId,
    },
    SelectLevel {
        popup: PopupId,
        level_id: u64,
        path: String,
    },
    DeleteUpload {
        popup: PopupId,
        level_id: u64,
    },
    Release {
        popup: PopupId,
    },
}

/// The engine's I/O components. Tests substitute fakes behind the traits.
#[derive(Clone)]
pub struct EngineParts {
    pub uploader: LevelUploader,
    pub requester: JobRequester,
    pub hub: ProgressHub,
    pub levels: LevelFileClient,
}

impl EngineParts {
    pub fn from_settings(settings: &TransferSettings) -> Result<Self, SetupError> {
        Ok(Self {
            uploader: LevelUploader::from_settings(settings)?,
            requester: JobRequester::from_settings(settings)?,
            hub: ProgressHub::from_settings(settings)?,
            levels: LevelFileClient::new(settings)?,
        })
    }
}

#[derive(Default)]
struct PopupSlot {
    cancel: CancellationController,
    filter: LatestBox<RelevanceFilter>,
    watch: Option<CancellationToken>,
}

impl PopupSlot {
    fn stop_watch(&mut self) {
        self.filter.set(RelevanceFilter::Detached);
        if let Some(token) = self.watch.take() {
            token.cancel();
        }
    }
}

/// Runs transfers on a background Tokio runtime. Commands go in through the
/// methods below; results come back through [`EngineHandle::try_recv`].
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    event_rx: mpsc::Receiver<EngineEvent>,
}

impl EngineHandle {
    pub fn new(settings: &TransferSettings) -> Result<Self, SetupError> {
        let parts = EngineParts::from_settings(settings)?;
        Ok(Self::spawn(build_runtime()?, parts))
    }

    pub fn with_parts(parts: EngineParts) -> Result<Self, SetupError> {
        Ok(Self::spawn(build_runtime()?, parts))
    }

    fn spawn(runtime: tokio::runtime::Runtime, parts: EngineParts) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        thread::spawn(move || {
            let _entered = runtime.enter();
            let mut popups: HashMap<PopupId, PopupSlot> = HashMap::new();
            while let Ok(command) = cmd_rx.recv() {
                dispatch(&runtime, &parts, &mut popups, command, &event_tx);
            }
            for slot in popups.values_mut() {
                slot.stop_watch();
            }
            xfer_debug!("engine command loop finished");
        });

        Self { cmd_tx, event_rx }
    }

    pub fn start_upload(&self, popup: PopupId, session: u64, request: UploadRequest) {
        self.send(EngineCommand::StartUpload {
            popup,
            session,
            request,
        });
    }

    pub fn cancel_upload(&self, popup: PopupId) {
        self.send(EngineCommand::CancelUpload { popup });
    }

    pub fn open_watch(&self, popup: PopupId) {
        self.send(EngineCommand::OpenWatch { popup });
    }

    pub fn set_filter(&self, popup: PopupId, filter: RelevanceFilter) {
        self.send(EngineCommand::SetFilter { popup, filter });
    }

    pub fn close_watch(&self, popup: PopupId) {
        self.send(EngineCommand::CloseWatch { popup });
    }

    pub fn start_job(
        &self,
        popup: PopupId,
        attempt: u64,
        context: PackContext,
        estimated_bytes: Option<u64>,
        proposed_id: impl Into<JobId>,
    ) {
        self.send(EngineCommand::StartJob {
            popup,
            attempt,
            context,
            estimated_bytes,
            proposed_id: proposed_id.into(),
        });
    }

    pub fn select_level(&self, popup: PopupId, level_id: u64, path: impl Into<String>) {
        self.send(EngineCommand::SelectLevel {
            popup,
            level_id,
            path: path.into(),
        });
    }

    pub fn delete_upload(&self, popup: PopupId, level_id: u64) {
        self.send(EngineCommand::DeleteUpload { popup, level_id });
    }

    /// Cancels whatever the popup still has running and forgets it.
    pub fn release(&self, popup: PopupId) {
        self.send(EngineCommand::Release { popup });
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    fn send(&self, command: EngineCommand) {
        let _ = self.cmd_tx.send(command);
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime, SetupError> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("transfer-engine")
        .build()?)
}

struct ChannelUploadSink {
    tx: mpsc::Sender<EngineEvent>,
    popup: PopupId,
    session: u64,
}

impl ProgressSink for ChannelUploadSink {
    fn emit(&self, event: UploadEvent) {
        let _ = self.tx.send(EngineEvent::Upload {
            popup: self.popup,
            session: self.session,
            event,
        });
    }
}

fn dispatch(
    runtime: &tokio::runtime::Runtime,
    parts: &EngineParts,
    popups: &mut HashMap<PopupId, PopupSlot>,
    command: EngineCommand,
    event_tx: &mpsc::Sender<EngineEvent>,
) {
    match command {
        EngineCommand::StartUpload {
            popup,
            session,
            request,
        } => {
            let signal = popups.entry(popup).or_default().cancel.acquire();
            let uploader = parts.uploader.clone();
            let tx = event_tx.clone();
            runtime.spawn(async move {
                let sink = ChannelUploadSink {
                    tx: tx.clone(),
                    popup,
                    session,
                };
                let result = uploader.upload_file(&request, &signal, &sink).await;
                let _ = tx.send(EngineEvent::UploadFinished {
                    popup,
                    session,
                    result,
                });
            });
        }
        EngineCommand::CancelUpload { popup } => {
            if let Some(slot) = popups.get_mut(&popup) {
                xfer_info!("cancelling upload for popup {popup}");
                slot.cancel.cancel();
            }
        }
        EngineCommand::OpenWatch { popup } => {
            let slot = popups.entry(popup).or_default();
            if slot.watch.is_some() {
                return;
            }
            let token = CancellationToken::new();
            slot.watch = Some(token.clone());
            let mut subscription = parts.hub.subscribe(slot.filter.clone());
            let tx = event_tx.clone();
            runtime.spawn(async move {
                loop {
                    let event = tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        event = subscription.next() => event,
                    };
                    let Some(event) = event else { break };
                    if tx.send(EngineEvent::JobProgress { popup, event }).is_err() {
                        break;
                    }
                }
            });
        }
        EngineCommand::SetFilter { popup, filter } => {
            xfer_debug!("popup {popup} filter -> {filter:?}");
            popups.entry(popup).or_default().filter.set(filter);
        }
        EngineCommand::CloseWatch { popup } => {
            if let Some(slot) = popups.get_mut(&popup) {
                slot.stop_watch();
            }
        }
        EngineCommand::StartJob {
            popup,
            attempt,
            context,
            estimated_bytes,
            proposed_id,
        } => {
            let requester = parts.requester.clone();
            let tx = event_tx.clone();
            runtime.spawn(async move {
                let result = requester
                    .start_or_fetch(&context, estimated_bytes, &proposed_id)
                    .await;
                let _ = tx.send(EngineEvent::JobStartResolved {
                    popup,
                    attempt,
                    result,
                });
            });
        }
        EngineCommand::SelectLevel {
            popup,
            level_id,
            path,
        } => {
            let levels = parts.levels.clone();
            let tx = event_tx.clone();
            runtime.spawn(async move {
                let result = levels
                    .select_level(level_id, &path)
                    .await
                    .map_err(TransferError::from);
                let _ = tx.send(EngineEvent::TargetLevelSelected { popup, result });
            });
        }
        EngineCommand::DeleteUpload { popup, level_id } => {
            let levels = parts.levels.clone();
            let tx = event_tx.clone();
            runtime.spawn(async move {
                let result = levels
                    .delete_upload(level_id)
                    .await
                    .map_err(TransferError::from);
                let _ = tx.send(EngineEvent::UploadDeleted { popup, result });
            });
        }
        EngineCommand::Release { popup } => {
            if let Some(mut slot) = popups.remove(&popup) {
                slot.stop_watch();
                slot.cancel.cancel();
            }
        }
    }
}
