//! yt-dlp source adapter
//!
//! Shells out to yt-dlp in JSON mode (`-j`) and maps its output document to
//! a `StreamInfo`. yt-dlp's extractor set covers effectively every hosted
//! media site, so this adapter claims any http(s) URL and is registered last.

use super::{SourceAdapter, StreamInfo};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Subset of the yt-dlp JSON document the engine cares about
#[derive(Debug, Deserialize)]
struct YtDlpOutput {
    url: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    extractor: Option<String>,
}

pub struct YtDlpAdapter {
    binary: String,
}

impl YtDlpAdapter {
    pub fn new(binary: String) -> Self {
        Self { binary }
    }
}

#[async_trait]
impl SourceAdapter for YtDlpAdapter {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    fn can_handle(&self, url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    async fn resolve(&self, url: &str) -> Result<StreamInfo> {
        let output = Command::new(&self.binary)
            .arg("-j")
            .arg("--no-playlist")
            .arg("--format")
            .arg("bestaudio/best")
            .arg("--")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Reap the child if the locator deadline cancels this future.
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::ExtractionFailed(format!("failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ExtractionFailed(format!(
                "{} exited {}: {}",
                self.binary,
                output.status,
                stderr.lines().last().unwrap_or("")
            )));
        }

        let doc: YtDlpOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::ExtractionFailed(format!("unparseable extractor output: {}", e)))?;

        let direct_url = doc
            .url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::ExtractionFailed("extractor returned no direct url".to_string()))?;

        debug!(title = ?doc.title, extractor = ?doc.extractor, "yt-dlp resolved");

        Ok(StreamInfo {
            url: direct_url,
            title: doc.title.unwrap_or_else(|| url.to_string()),
            duration_secs: doc.duration,
            thumbnail: doc.thumbnail,
            source: doc.extractor.unwrap_or_else(|| "yt-dlp".to_string()),
        })
    }
}
