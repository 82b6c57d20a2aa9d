//! Direct-URL source adapter
//!
//! Claims http(s) URLs that already point at an audio file. Issues a HEAD
//! probe to confirm the URL is reachable before handing it to the pipeline;
//! the URL itself passes through unchanged.

use super::{SourceAdapter, StreamInfo};
use crate::error::{Error, Result};
use async_trait::async_trait;
use tracing::debug;

const AUDIO_EXTENSIONS: &[&str] = &[
    ".mp3", ".ogg", ".opus", ".flac", ".wav", ".m4a", ".aac", ".webm",
];

pub struct DirectUrlAdapter {
    client: reqwest::Client,
}

impl DirectUrlAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Path portion of the URL, lowercased, query stripped.
    fn path_of(url: &str) -> String {
        let without_scheme = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
        let path = without_scheme.split(['?', '#']).next().unwrap_or("");
        path.to_ascii_lowercase()
    }
}

impl Default for DirectUrlAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for DirectUrlAdapter {
    fn name(&self) -> &str {
        "direct"
    }

    fn can_handle(&self, url: &str) -> bool {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return false;
        }
        let path = Self::path_of(url);
        AUDIO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    }

    async fn resolve(&self, url: &str) -> Result<StreamInfo> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| Error::ExtractionFailed(format!("HEAD probe failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::ExtractionFailed(format!(
                "source answered {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");
        debug!(url, content_type, "direct source probed");

        let title = Self::path_of(url)
            .rsplit('/')
            .next()
            .unwrap_or("stream")
            .to_string();

        Ok(StreamInfo {
            url: url.to_string(),
            title,
            duration_secs: None,
            thumbnail: None,
            source: "direct".to_string(),
        })
    }
}
