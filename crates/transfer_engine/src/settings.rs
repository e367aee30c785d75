use std::time::Duration;

use url::Url;

/// Server paths, relative to [`TransferSettings::api_base`]. `{id}` is replaced
/// with the level or pack identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub chunk: String,
    pub validate: String,
    pub level_upload: String,
    pub select_level: String,
    pub pack_download: String,
    pub events: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            chunk: "/v2/upload/chunk".to_string(),
            validate: "/v2/upload/validate".to_string(),
            level_upload: "/v2/database/levels/{id}/upload".to_string(),
            select_level: "/v2/database/levels/{id}/select-level".to_string(),
            pack_download: "/v2/database/levels/packs/{id}/download-link".to_string(),
            events: "/events".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub api_base: Url,
    pub endpoints: Endpoints,
    pub chunk_size: u64,
    /// Retries per chunk after the first attempt.
    pub chunk_retries: u32,
    /// Linear backoff step: attempt `n` waits `n * retry_backoff`.
    pub retry_backoff: Duration,
    pub connect_timeout: Duration,
    pub chunk_timeout: Duration,
    pub validate_timeout: Duration,
    pub commit_timeout: Duration,
    /// Largest archive a level upload accepts.
    pub max_upload_bytes: u64,
    pub max_pack_bytes: u64,
    pub reconnect_delay: Duration,
    /// The channel is considered dead if nothing (events or keepalives) arrives for this long.
    pub liveness_timeout: Duration,
    pub channel_capacity: usize,
}

impl TransferSettings {
    pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;
    pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 1024 * 1024 * 1024;
    pub const DEFAULT_MAX_PACK_BYTES: u64 = 15 * 1024 * 1024 * 1024;

    pub fn for_api(api_base: Url) -> Self {
        Self {
            api_base,
            endpoints: Endpoints::default(),
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            chunk_retries: 3,
            retry_backoff: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(10),
            chunk_timeout: Duration::from_secs(5 * 60),
            validate_timeout: Duration::from_secs(5 * 60),
            commit_timeout: Duration::from_secs(300),
            max_upload_bytes: Self::DEFAULT_MAX_UPLOAD_BYTES,
            max_pack_bytes: Self::DEFAULT_MAX_PACK_BYTES,
            reconnect_delay: Duration::from_secs(2),
            liveness_timeout: Duration::from_secs(60),
            channel_capacity: 256,
        }
    }

    /// Joins `path` onto the API base, keeping any path prefix the base carries.
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        let base = self.api_base.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{}", path.trim_start_matches('/')))
    }

    /// Like [`Self::endpoint`]; `id` is percent-encoded as a path segment.
    pub fn endpoint_for(&self, template: &str, id: &str) -> Result<Url, url::ParseError> {
        let mut url = self.endpoint("")?;
        url.path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(
                template
                    .split('/')
                    .filter(|segment| !segment.is_empty())
                    .map(|segment| segment.replace("{id}", id)),
            );
        Ok(url)
    }
}
