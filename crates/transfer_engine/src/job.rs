use std::sync::Arc;

use serde::{Deserialize, Serialize};
use transfer_logging::{xfer_debug, xfer_info, xfer_warn};

use crate::http::{build_client, describe, error_message};
use crate::{
    AbortSignal, DownloadLink, FailureKind, JobId, JobProgressEvent, JobStart, JobStatus,
    RelevanceFilter, SetupError, Subscription, TransferError, TransferSettings,
};

const MISSING_LINK: &str = "Download link was not returned by the server.";
const GENERIC_FAILURE: &str = "Pack generation failed";

/// What to pack: a whole pack or one folder inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackContext {
    pub pack_id: String,
    pub folder_id: Option<u64>,
}

#[async_trait::async_trait]
pub trait JobApi: Send + Sync {
    /// `proposed_id` is a client-generated job id the server may adopt. The id
    /// in the reply is authoritative.
    async fn start_or_fetch(
        &self,
        context: &PackContext,
        proposed_id: &str,
    ) -> Result<JobStart, FailureKind>;
}

#[derive(Debug, Clone)]
pub struct ReqwestJobApi {
    client: reqwest::Client,
    settings: TransferSettings,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartBody<'a> {
    download_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    folder_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartReply {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    download_id: Option<String>,
    #[serde(default)]
    expires_at: Option<String>,
}

impl StartReply {
    fn into_job_start(self) -> Result<JobStart, FailureKind> {
        let job_id = self.download_id.filter(|id| !id.is_empty());
        match (self.url.filter(|url| !url.is_empty()), job_id) {
            (Some(url), job_id) => Ok(JobStart::Ready(DownloadLink {
                url,
                job_id,
                expires_at: self.expires_at,
            })),
            (None, Some(job_id)) => Ok(JobStart::Enqueued { job_id }),
            (None, None) => Err(FailureKind::JobStart(MISSING_LINK.to_string())),
        }
    }
}

impl ReqwestJobApi {
    /// No overall timeout: the server may hold the request while it decides
    /// between a cached artifact and a new job.
    pub fn new(settings: &TransferSettings) -> Result<Self, SetupError> {
        Ok(Self {
            client: build_client(settings.connect_timeout, None)?,
            settings: settings.clone(),
        })
    }
}

#[async_trait::async_trait]
impl JobApi for ReqwestJobApi {
    async fn start_or_fetch(
        &self,
        context: &PackContext,
        proposed_id: &str,
    ) -> Result<JobStart, FailureKind> {
        let url = self
            .settings
            .endpoint_for(&self.settings.endpoints.pack_download, &context.pack_id)
            .map_err(|err| FailureKind::JobStart(err.to_string()))?;
        let response = self
            .client
            .post(url)
            .json(&StartBody {
                download_id: proposed_id,
                folder_id: context.folder_id,
            })
            .send()
            .await
            .map_err(|err| FailureKind::JobStart(describe(&err)))?;
        if !response.status().is_success() {
            return Err(FailureKind::JobStart(error_message(response).await));
        }
        let reply: StartReply = response
            .json()
            .await
            .map_err(|err| FailureKind::JobStart(format!("Unreadable reply: {err}")))?;
        reply.into_job_start()
    }
}

/// Starts pack jobs after checking the size estimate against the ceiling.
#[derive(Clone)]
pub struct JobRequester {
    api: Arc<dyn JobApi>,
    max_bytes: u64,
}

impl JobRequester {
    pub fn new(api: Arc<dyn JobApi>, max_bytes: u64) -> Self {
        Self { api, max_bytes }
    }

    pub fn from_settings(settings: &TransferSettings) -> Result<Self, SetupError> {
        Ok(Self::new(
            Arc::new(ReqwestJobApi::new(settings)?),
            settings.max_pack_bytes,
        ))
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Oversized estimates are rejected without contacting the server.
    /// `proposed_id` is the id the caller already watches on the progress channel.
    pub async fn start_or_fetch(
        &self,
        context: &PackContext,
        estimated_bytes: Option<u64>,
        proposed_id: &str,
    ) -> Result<JobStart, TransferError> {
        if let Some(estimated_bytes) = estimated_bytes {
            if estimated_bytes > self.max_bytes {
                xfer_warn!(
                    "pack {} estimate {estimated_bytes} exceeds ceiling {}",
                    context.pack_id,
                    self.max_bytes
                );
                return Err(FailureKind::SizeExceeded {
                    estimated_bytes,
                    limit_bytes: self.max_bytes,
                }
                .into());
            }
        }
        xfer_debug!("requesting pack {} with proposed id {proposed_id}", context.pack_id);
        let start = self.api.start_or_fetch(context, proposed_id).await?;
        match &start {
            JobStart::Ready(link) => {
                xfer_info!("pack {} already available: {}", context.pack_id, link.url)
            }
            JobStart::Enqueued { job_id } => {
                xfer_info!("pack {} enqueued as {job_id}", context.pack_id)
            }
        }
        Ok(start)
    }
}

/// Waits on `subscription` until `job_id` reaches a terminal status. The
/// subscription's filter is narrowed to the job first and detached again on
/// return.
pub async fn await_job(
    subscription: &mut Subscription,
    job_id: &JobId,
    signal: &AbortSignal,
) -> Result<JobProgressEvent, TransferError> {
    subscription
        .filter()
        .set(RelevanceFilter::Only(job_id.clone()));
    let outcome = signal.guard(wait_terminal(subscription)).await;
    subscription.filter().set(RelevanceFilter::Detached);
    outcome?
}

async fn wait_terminal(subscription: &mut Subscription) -> Result<JobProgressEvent, TransferError> {
    while let Some(event) = subscription.next().await {
        match event.status {
            JobStatus::Completed => return Ok(event),
            JobStatus::Failed => {
                let message = event
                    .error_message
                    .filter(|message| !message.is_empty())
                    .unwrap_or_else(|| GENERIC_FAILURE.to_string());
                return Err(FailureKind::JobFailed(message).into());
            }
            _ => {}
        }
    }
    Err(FailureKind::JobFailed("Progress channel closed.".to_string()).into())
}
