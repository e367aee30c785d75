use std::sync::Arc;

use serde::{Deserialize, Serialize};
use transfer_logging::{xfer_debug, xfer_info, xfer_warn};
use url::Url;

use crate::filename::encode_filename;
use crate::http::{build_client, describe, error_message};
use crate::{
    AbortSignal, CommitReceipt, FailureKind, FileId, LevelFile, LevelRecord, SetupError,
    TransferError, TransferSettings,
};

const COMMIT_FALLBACK: &str = "Failed to upload level file";

/// Metadata bound to the destination level on commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub level_id: u64,
    pub file_id: FileId,
    pub file_name: String,
    pub file_size: u64,
}

#[async_trait::async_trait]
pub trait FinalizeApi: Send + Sync {
    async fn validate(&self, file_id: &FileId) -> Result<(), FailureKind>;
    async fn commit(&self, request: &CommitRequest) -> Result<CommitReceipt, FailureKind>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFinalizeApi {
    validate_client: reqwest::Client,
    commit_client: reqwest::Client,
    validate_url: Url,
    settings: TransferSettings,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateBody<'a> {
    file_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ValidateReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommitBody<'a> {
    file_id: &'a str,
    file_name: String,
    file_size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitReply {
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    level: Option<LevelRecord>,
    #[serde(default)]
    dl_link: Option<String>,
    #[serde(default)]
    level_files: Vec<LevelFile>,
}

fn default_true() -> bool {
    true
}

impl ReqwestFinalizeApi {
    pub fn new(settings: &TransferSettings) -> Result<Self, SetupError> {
        Ok(Self {
            validate_client: build_client(
                settings.connect_timeout,
                Some(settings.validate_timeout),
            )?,
            commit_client: build_client(settings.connect_timeout, Some(settings.commit_timeout))?,
            validate_url: settings.endpoint(&settings.endpoints.validate)?,
            settings: settings.clone(),
        })
    }
}

#[async_trait::async_trait]
impl FinalizeApi for ReqwestFinalizeApi {
    async fn validate(&self, file_id: &FileId) -> Result<(), FailureKind> {
        let response = self
            .validate_client
            .post(self.validate_url.clone())
            .json(&ValidateBody {
                file_id: file_id.as_str(),
            })
            .send()
            .await
            .map_err(|err| {
                FailureKind::Validation(format!("Failed to validate upload: {}", describe(&err)))
            })?;

        if !response.status().is_success() {
            return Err(FailureKind::Validation(error_message(response).await));
        }
        let reply: ValidateReply = response.json().await.map_err(|err| {
            FailureKind::Validation(format!("Unreadable validation reply: {err}"))
        })?;
        if reply.success {
            Ok(())
        } else {
            Err(FailureKind::Validation(
                reply
                    .error
                    .unwrap_or_else(|| "Upload validation failed".to_string()),
            ))
        }
    }

    async fn commit(&self, request: &CommitRequest) -> Result<CommitReceipt, FailureKind> {
        let url = self
            .settings
            .endpoint_for(&self.settings.endpoints.level_upload, &request.level_id.to_string())
            .map_err(|err| FailureKind::Commit(err.to_string()))?;
        let response = self
            .commit_client
            .post(url)
            .json(&CommitBody {
                file_id: request.file_id.as_str(),
                file_name: encode_filename(&request.file_name),
                file_size: request.file_size,
            })
            .send()
            .await
            .map_err(|err| FailureKind::Commit(format!("{COMMIT_FALLBACK}: {}", describe(&err))))?;

        if !response.status().is_success() {
            return Err(FailureKind::Commit(error_message(response).await));
        }
        let reply: CommitReply = response
            .json()
            .await
            .map_err(|err| FailureKind::Commit(format!("Unreadable commit reply: {err}")))?;
        if !reply.success {
            return Err(FailureKind::Commit(
                reply.error.unwrap_or_else(|| COMMIT_FALLBACK.to_string()),
            ));
        }

        let dl_link = reply
            .level
            .as_ref()
            .and_then(|level| level.dl_link.clone())
            .or(reply.dl_link)
            .filter(|link| !link.is_empty())
            .ok_or_else(|| {
                FailureKind::Commit("Server did not return a download link.".to_string())
            })?;
        Ok(CommitReceipt {
            dl_link,
            level: reply.level,
            level_files: reply.level_files,
        })
    }
}

/// Validates an assembled upload and binds it to its level. Both steps honor
/// the abort signal; an abort observed between them skips the commit.
#[derive(Clone)]
pub struct UploadFinalizer {
    api: Arc<dyn FinalizeApi>,
}

impl UploadFinalizer {
    pub fn new(api: Arc<dyn FinalizeApi>) -> Self {
        Self { api }
    }

    pub fn from_settings(settings: &TransferSettings) -> Result<Self, SetupError> {
        Ok(Self::new(Arc::new(ReqwestFinalizeApi::new(settings)?)))
    }

    pub async fn finalize(
        &self,
        file_id: &FileId,
        signal: &AbortSignal,
    ) -> Result<(), TransferError> {
        xfer_debug!("validating upload {file_id}");
        signal.guard(self.api.validate(file_id)).await??;
        xfer_info!("upload {file_id} validated");
        Ok(())
    }

    pub async fn commit(
        &self,
        request: &CommitRequest,
        signal: &AbortSignal,
    ) -> Result<CommitReceipt, TransferError> {
        if signal.is_aborted() {
            xfer_info!("upload {} cancelled after validation; not committing", request.file_id);
            return Err(TransferError::Cancelled);
        }
        match signal.guard(self.api.commit(request)).await? {
            Ok(receipt) => {
                xfer_info!(
                    "level {} committed with {} level file(s)",
                    request.level_id,
                    receipt.level_files.len()
                );
                Ok(receipt)
            }
            Err(failure) => {
                xfer_warn!("commit for level {} failed: {failure}", request.level_id);
                Err(failure.into())
            }
        }
    }
}
