use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use transfer_logging::{xfer_debug, xfer_info, xfer_warn};
use url::Url;

use crate::http::{build_client, describe, error_message};
use crate::{
    AbortSignal, FailureKind, FileId, ProgressSink, SetupError, TransferError, TransferProgress,
    TransferSettings, UploadEvent,
};

/// Fixed-size split of a payload. Every chunk is `chunk_size` bytes except
/// possibly the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total_bytes: u64,
    chunk_size: u64,
    total_chunks: u32,
}

impl ChunkPlan {
    /// `None` for an empty payload or a zero chunk size.
    pub fn new(total_bytes: u64, chunk_size: u64) -> Option<Self> {
        if total_bytes == 0 || chunk_size == 0 {
            return None;
        }
        let total_chunks = u32::try_from(total_bytes.div_ceil(chunk_size)).ok()?;
        Some(Self {
            total_bytes,
            chunk_size,
            total_chunks,
        })
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn range(&self, index: u32) -> Range<u64> {
        let start = u64::from(index) * self.chunk_size;
        let end = (start + self.chunk_size).min(self.total_bytes);
        start.min(self.total_bytes)..end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// Absent only on the first chunk of a session.
    pub file_id: Option<FileId>,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkAck {
    pub file_id: Option<FileId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkSendError {
    /// Network trouble or a transient server status; worth another attempt.
    #[error("{0}")]
    Retryable(String),
    #[error("{0}")]
    Rejected(String),
    /// The server no longer knows the file id (expired or never existed).
    #[error("{0}")]
    UnknownFile(String),
}

#[async_trait::async_trait]
pub trait ChunkSink: Send + Sync {
    async fn send_chunk(&self, request: ChunkRequest) -> Result<ChunkAck, ChunkSendError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestChunkSink {
    client: reqwest::Client,
    url: Url,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkResponse {
    #[serde(default)]
    file_id: Option<String>,
}

impl ReqwestChunkSink {
    pub fn new(settings: &TransferSettings) -> Result<Self, SetupError> {
        let client = build_client(settings.connect_timeout, Some(settings.chunk_timeout))?;
        let url = settings.endpoint(&settings.endpoints.chunk)?;
        Ok(Self { client, url })
    }
}

#[async_trait::async_trait]
impl ChunkSink for ReqwestChunkSink {
    async fn send_chunk(&self, request: ChunkRequest) -> Result<ChunkAck, ChunkSendError> {
        let length = request.data.len() as u64;
        let part = Part::stream_with_length(request.data, length)
            .file_name(format!("chunk-{}", request.chunk_index))
            .mime_str("application/octet-stream")
            .map_err(|err| ChunkSendError::Rejected(err.to_string()))?;
        let form = Form::new().part("chunk", part);

        let mut builder = self
            .client
            .post(self.url.clone())
            .header("X-Chunk-Index", request.chunk_index.to_string())
            .header("X-Total-Chunks", request.total_chunks.to_string());
        if let Some(file_id) = &request.file_id {
            builder = builder.header("X-File-Id", file_id.as_str());
        }

        let response = builder
            .multipart(form)
            .send()
            .await
            .map_err(|err| ChunkSendError::Retryable(describe(&err)))?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            return Err(classify_status(status, message));
        }

        let text = response
            .text()
            .await
            .map_err(|err| ChunkSendError::Retryable(describe(&err)))?;
        let file_id = serde_json::from_str::<ChunkResponse>(&text)
            .ok()
            .and_then(|body| body.file_id)
            .filter(|id| !id.is_empty())
            .map(FileId);
        Ok(ChunkAck { file_id })
    }
}

fn classify_status(status: StatusCode, message: String) -> ChunkSendError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => ChunkSendError::UnknownFile(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ChunkSendError::Retryable(message)
        }
        status if status.is_server_error() => ChunkSendError::Retryable(message),
        _ => ChunkSendError::Rejected(message),
    }
}

/// Tracks acknowledged bytes so that reported progress never decreases and
/// 100% is reported exactly once, after the final acknowledgement.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProgressMeter {
    total: u64,
    sent: u64,
}

impl ProgressMeter {
    pub(crate) fn new(total: u64) -> Self {
        Self { total, sent: 0 }
    }

    pub(crate) fn advance(&mut self, acknowledged_up_to: u64) -> Option<TransferProgress> {
        let next = acknowledged_up_to.min(self.total);
        if next <= self.sent {
            return None;
        }
        self.sent = next;
        Some(TransferProgress {
            bytes_sent: next,
            total_bytes: self.total,
            percent: percent_of(next, self.total),
        })
    }
}

fn percent_of(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((u128::from(sent) * 100) / u128::from(total)) as u8
}

/// Splits a payload into fixed-size chunks and sends them one at a time,
/// retrying each chunk independently.
#[derive(Clone)]
pub struct ChunkTransport {
    sink: Arc<dyn ChunkSink>,
    chunk_size: u64,
    max_retries: u32,
    retry_backoff: Duration,
}

impl ChunkTransport {
    pub fn new(
        sink: Arc<dyn ChunkSink>,
        chunk_size: u64,
        max_retries: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            sink,
            chunk_size,
            max_retries,
            retry_backoff,
        }
    }

    pub fn from_settings(settings: &TransferSettings) -> Result<Self, SetupError> {
        Ok(Self::new(
            Arc::new(ReqwestChunkSink::new(settings)?),
            settings.chunk_size,
            settings.chunk_retries,
            settings.retry_backoff,
        ))
    }

    /// Streams `total_bytes` from `source` to the server and returns the file
    /// id the server assigned on the first chunk.
    pub async fn send<R>(
        &self,
        mut source: R,
        total_bytes: u64,
        signal: &AbortSignal,
        sink: &dyn ProgressSink,
    ) -> Result<FileId, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let plan = ChunkPlan::new(total_bytes, self.chunk_size).ok_or_else(|| {
            FailureKind::Validation("Cannot upload an empty file.".to_string())
        })?;
        let mut meter = ProgressMeter::new(total_bytes);
        let mut file_id: Option<FileId> = None;
        xfer_info!(
            "sending {} bytes in {} chunk(s) of {} bytes",
            total_bytes,
            plan.total_chunks(),
            self.chunk_size
        );

        for index in 0..plan.total_chunks() {
            if signal.is_aborted() {
                xfer_info!("upload aborted before chunk {index}");
                return Err(TransferError::Cancelled);
            }
            let range = plan.range(index);
            let mut buffer = vec![0u8; (range.end - range.start) as usize];
            signal
                .guard(source.read_exact(&mut buffer))
                .await?
                .map_err(|err| FailureKind::Transport {
                    chunk_index: index,
                    attempts: 0,
                    message: format!("could not read file: {err}"),
                })?;

            let request = ChunkRequest {
                chunk_index: index,
                total_chunks: plan.total_chunks(),
                file_id: file_id.clone(),
                data: Bytes::from(buffer),
            };
            let ack = self.send_with_retry(request, signal).await?;

            match (&file_id, ack.file_id) {
                (None, Some(assigned)) => {
                    xfer_debug!("server assigned file id {assigned}");
                    sink.emit(UploadEvent::FileIdAssigned(assigned.clone()));
                    file_id = Some(assigned);
                }
                (None, None) => {
                    return Err(FailureKind::Validation(
                        "Server did not assign a file id to the upload.".to_string(),
                    )
                    .into());
                }
                (Some(current), Some(echoed)) if *current != echoed => {
                    return Err(FailureKind::Validation(format!(
                        "Server switched upload session from {current} to {echoed}."
                    ))
                    .into());
                }
                _ => {}
            }

            if let Some(progress) = meter.advance(range.end) {
                sink.emit(UploadEvent::Progress(progress));
            }
        }

        // The plan is non-empty, so the first chunk either assigned an id or returned early.
        file_id.ok_or_else(|| {
            FailureKind::Validation("Server did not assign a file id to the upload.".to_string())
                .into()
        })
    }

    async fn send_with_retry(
        &self,
        request: ChunkRequest,
        signal: &AbortSignal,
    ) -> Result<ChunkAck, TransferError> {
        let chunk_index = request.chunk_index;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let outcome = signal.guard(self.sink.send_chunk(request.clone())).await?;
            match outcome {
                Ok(ack) => return Ok(ack),
                Err(ChunkSendError::Retryable(message)) if attempts <= self.max_retries => {
                    let wait = self.retry_backoff * attempts;
                    xfer_warn!(
                        "chunk {chunk_index} attempt {attempts} failed: {message}; retrying in {wait:?}"
                    );
                    signal.sleep(wait).await?;
                }
                Err(ChunkSendError::UnknownFile(message)) => {
                    return Err(FailureKind::Validation(message).into());
                }
                Err(ChunkSendError::Retryable(message) | ChunkSendError::Rejected(message)) => {
                    return Err(FailureKind::Transport {
                        chunk_index,
                        attempts,
                        message,
                    }
                    .into());
                }
            }
        }
    }
}
