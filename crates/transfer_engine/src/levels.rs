use serde::{Deserialize, Serialize};
use transfer_logging::xfer_info;

use crate::http::{build_client, describe, error_message};
use crate::{FailureKind, SetupError, TransferSettings};

const SELECT_FALLBACK: &str = "Failed to select level file";
const DELETE_FALLBACK: &str = "Failed to delete level file";

/// Follow-up calls on a level's committed upload.
#[derive(Debug, Clone)]
pub struct LevelFileClient {
    client: reqwest::Client,
    settings: TransferSettings,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SelectBody<'a> {
    selected_level: &'a str,
}

#[derive(Debug, Deserialize)]
struct SelectReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

impl LevelFileClient {
    pub fn new(settings: &TransferSettings) -> Result<Self, SetupError> {
        Ok(Self {
            client: build_client(settings.connect_timeout, Some(settings.commit_timeout))?,
            settings: settings.clone(),
        })
    }

    /// Marks `path` inside the uploaded archive as the playable level.
    pub async fn select_level(&self, level_id: u64, path: &str) -> Result<String, FailureKind> {
        let url = self
            .settings
            .endpoint_for(&self.settings.endpoints.select_level, &level_id.to_string())
            .map_err(|err| FailureKind::Commit(err.to_string()))?;
        let response = self
            .client
            .post(url)
            .json(&SelectBody {
                selected_level: path,
            })
            .send()
            .await
            .map_err(|err| FailureKind::Commit(format!("{SELECT_FALLBACK}: {}", describe(&err))))?;
        if !response.status().is_success() {
            return Err(FailureKind::Commit(error_message(response).await));
        }
        let reply: SelectReply = response
            .json()
            .await
            .map_err(|_| FailureKind::Commit(SELECT_FALLBACK.to_string()))?;
        if !reply.success {
            return Err(FailureKind::Commit(
                reply.error.unwrap_or_else(|| SELECT_FALLBACK.to_string()),
            ));
        }
        xfer_info!("level {level_id} now targets {path}");
        Ok(path.to_string())
    }

    pub async fn delete_upload(&self, level_id: u64) -> Result<(), FailureKind> {
        let url = self
            .settings
            .endpoint_for(&self.settings.endpoints.level_upload, &level_id.to_string())
            .map_err(|err| FailureKind::Commit(err.to_string()))?;
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|err| FailureKind::Commit(format!("{DELETE_FALLBACK}: {}", describe(&err))))?;
        if !response.status().is_success() {
            return Err(FailureKind::Commit(error_message(response).await));
        }
        xfer_info!("deleted upload of level {level_id}");
        Ok(())
    }
}
