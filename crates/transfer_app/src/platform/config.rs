use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use transfer_core::{summarize_folder_size, summarize_pack_size, PackItem, SizeSummary};
use transfer_engine::TransferSettings;
use transfer_logging::{xfer_info, xfer_warn};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Settings file contents. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_url: String,
    pub chunk_size_mb: u64,
    pub chunk_retries: u32,
    pub retry_backoff_ms: u64,
    pub connect_timeout_secs: u64,
    pub chunk_timeout_secs: u64,
    pub commit_timeout_secs: u64,
    pub max_upload_mb: u64,
    pub max_pack_gb: u64,
    pub reconnect_delay_ms: u64,
    pub liveness_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3002".to_string(),
            chunk_size_mb: 10,
            chunk_retries: 3,
            retry_backoff_ms: 500,
            connect_timeout_secs: 10,
            chunk_timeout_secs: 300,
            commit_timeout_secs: 300,
            max_upload_mb: 1024,
            max_pack_gb: 15,
            reconnect_delay_ms: 2000,
            liveness_timeout_secs: 60,
        }
    }
}

impl AppConfig {
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(MIB)
    }

    pub fn to_settings(&self) -> anyhow::Result<TransferSettings> {
        if self.chunk_size_mb == 0 {
            bail!("chunk_size_mb must be at least 1");
        }
        let api_base = self
            .api_url
            .parse::<url::Url>()
            .with_context(|| format!("invalid api url {:?}", self.api_url))?;
        let mut settings = TransferSettings::for_api(api_base);
        settings.chunk_size = self.chunk_size_mb.saturating_mul(MIB);
        settings.chunk_retries = self.chunk_retries;
        settings.retry_backoff = Duration::from_millis(self.retry_backoff_ms);
        settings.connect_timeout = Duration::from_secs(self.connect_timeout_secs);
        settings.chunk_timeout = Duration::from_secs(self.chunk_timeout_secs);
        settings.commit_timeout = Duration::from_secs(self.commit_timeout_secs);
        settings.max_upload_bytes = self.max_upload_bytes();
        settings.max_pack_bytes = self.max_pack_gb.saturating_mul(GIB);
        settings.reconnect_delay = Duration::from_millis(self.reconnect_delay_ms);
        settings.liveness_timeout = Duration::from_secs(self.liveness_timeout_secs);
        Ok(settings)
    }
}

/// Reads the settings file; a missing file yields the defaults.
pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            xfer_info!("no settings file at {path:?}; using defaults");
            return Ok(AppConfig::default());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("could not read settings from {path:?}"))
        }
    };
    let config = ron::from_str(&content)
        .with_context(|| format!("could not parse settings in {path:?}"))?;
    xfer_info!("loaded settings from {path:?}");
    Ok(config)
}

/// One node of a pack tree as written in a manifest file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum ManifestItem {
    /// Other fields (names, ids) are ignored.
    Level {
        #[serde(default)]
        size_bytes: Option<u64>,
    },
    Folder {
        #[serde(default)]
        id: Option<u64>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        children: Vec<ManifestItem>,
    },
}

impl ManifestItem {
    fn to_pack_item(&self) -> PackItem {
        match self {
            Self::Level { size_bytes, .. } => PackItem::Level {
                size_bytes: *size_bytes,
            },
            Self::Folder { children, .. } => PackItem::Folder {
                children: children.iter().map(Self::to_pack_item).collect(),
            },
        }
    }

    fn find_folder(&self, wanted: u64) -> Option<&ManifestItem> {
        match self {
            Self::Folder { id, children, .. } => {
                if *id == Some(wanted) {
                    return Some(self);
                }
                children.iter().find_map(|child| child.find_folder(wanted))
            }
            Self::Level { .. } => None,
        }
    }
}

pub fn load_manifest(path: &Path) -> anyhow::Result<Vec<ManifestItem>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("could not read items from {path:?}"))?;
    ron::from_str(&content).with_context(|| format!("could not parse items in {path:?}"))
}

/// Size estimate for the whole pack, or for one folder of it.
pub fn estimate(items: &[ManifestItem], folder: Option<u64>) -> anyhow::Result<SizeSummary> {
    match folder {
        None => {
            let tree: Vec<PackItem> = items.iter().map(ManifestItem::to_pack_item).collect();
            Ok(summarize_pack_size(&tree))
        }
        Some(folder_id) => {
            let Some(found) = items.iter().find_map(|item| item.find_folder(folder_id)) else {
                bail!("folder {folder_id} is not part of the items file");
            };
            if let ManifestItem::Folder {
                name: Some(name), ..
            } = found
            {
                xfer_info!("estimating folder {folder_id} ({name})");
            }
            let summary = summarize_folder_size(&found.to_pack_item());
            if summary.level_count == 0 {
                xfer_warn!("folder {folder_id} contains no levels");
            }
            Ok(summary)
        }
    }
}
