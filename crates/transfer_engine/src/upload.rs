use std::path::PathBuf;

use tokio::io::AsyncRead;
use transfer_logging::{xfer_info, xfer_warn};

use crate::filename::upload_name;
use crate::{
    AbortSignal, ChunkTransport, CommitReceipt, CommitRequest, FailureKind, ProgressSink,
    SetupError, TransferError, TransferSettings, UploadEvent, UploadFinalizer, UploadStage,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub level_id: u64,
    pub path: PathBuf,
    /// Name recorded on the server; defaults to the file name of `path`.
    pub file_name: Option<String>,
}

/// Runs one upload session end to end: chunks, validate, commit.
#[derive(Clone)]
pub struct LevelUploader {
    transport: ChunkTransport,
    finalizer: UploadFinalizer,
}

impl LevelUploader {
    pub fn new(transport: ChunkTransport, finalizer: UploadFinalizer) -> Self {
        Self {
            transport,
            finalizer,
        }
    }

    pub fn from_settings(settings: &TransferSettings) -> Result<Self, SetupError> {
        Ok(Self::new(
            ChunkTransport::from_settings(settings)?,
            UploadFinalizer::from_settings(settings)?,
        ))
    }

    pub async fn upload_file(
        &self,
        request: &UploadRequest,
        signal: &AbortSignal,
        sink: &dyn ProgressSink,
    ) -> Result<CommitReceipt, TransferError> {
        let file = tokio::fs::File::open(&request.path)
            .await
            .map_err(|err| read_failure(&request.path, err))?;
        let total_bytes = file
            .metadata()
            .await
            .map_err(|err| read_failure(&request.path, err))?
            .len();
        let file_name = request
            .file_name
            .clone()
            .unwrap_or_else(|| upload_name(&request.path));
        self.upload(request.level_id, &file_name, file, total_bytes, signal, sink)
            .await
    }

    pub async fn upload<R>(
        &self,
        level_id: u64,
        file_name: &str,
        source: R,
        total_bytes: u64,
        signal: &AbortSignal,
        sink: &dyn ProgressSink,
    ) -> Result<CommitReceipt, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        xfer_info!("uploading {file_name} ({total_bytes} bytes) to level {level_id}");
        sink.emit(UploadEvent::Stage(UploadStage::Sending));
        let result = self
            .run(level_id, file_name, source, total_bytes, signal, sink)
            .await;
        match &result {
            Ok(_) => xfer_info!("upload of {file_name} finished"),
            Err(TransferError::Cancelled) => xfer_info!("upload of {file_name} cancelled"),
            Err(TransferError::Failed(failure)) => {
                xfer_warn!("upload of {file_name} failed: {failure}")
            }
        }
        result
    }

    async fn run<R>(
        &self,
        level_id: u64,
        file_name: &str,
        source: R,
        total_bytes: u64,
        signal: &AbortSignal,
        sink: &dyn ProgressSink,
    ) -> Result<CommitReceipt, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let file_id = self
            .transport
            .send(source, total_bytes, signal, sink)
            .await?;

        sink.emit(UploadEvent::Stage(UploadStage::Validating));
        self.finalizer.finalize(&file_id, signal).await?;
        if signal.is_aborted() {
            return Err(TransferError::Cancelled);
        }

        sink.emit(UploadEvent::Stage(UploadStage::Committing));
        self.finalizer
            .commit(
                &CommitRequest {
                    level_id,
                    file_id,
                    file_name: file_name.to_string(),
                    file_size: total_bytes,
                },
                signal,
            )
            .await
    }
}

fn read_failure(path: &std::path::Path, err: std::io::Error) -> TransferError {
    FailureKind::Transport {
        chunk_index: 0,
        attempts: 0,
        message: format!("could not read {}: {err}", path.display()),
    }
    .into()
}
